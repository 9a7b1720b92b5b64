// ============================================================================
// LocalStore — Embedded Client State (redb)
// ============================================================================
// Persistent device-bound state: the PolyUser wallet, primary address
// override, TTS preference, training-debug flag, and reward milestone flags.
// Default path: ~/.polyworld/client.redb (override via POLYWORLD_DB_PATH)
// ============================================================================

use anyhow::{anyhow, Result};
use redb::{Database, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::PolyUser;

const CLIENT: TableDefinition<&str, &[u8]> = TableDefinition::new("client");

const KEY_USER: &str = "polyworld_user";
const KEY_PRIMARY_ADDRESS: &str = "primary_address";
const KEY_TTS_ENABLED: &str = "tts_enabled";
const KEY_TRAINING_DEBUG: &str = "training_debug";
const MILESTONE_PREFIX: &str = "milestone:";

/// Embedded key-value store for the Polyworld client
pub struct LocalStore {
    db: Database,
    path: PathBuf,
}

impl LocalStore {
    /// Open (or create) the store at the given path.
    /// If `path` is None, uses POLYWORLD_DB_PATH env var or
    /// ~/.polyworld/client.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("POLYWORLD_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let poly_dir = home.join(".polyworld");
            std::fs::create_dir_all(&poly_dir)
                .map_err(|e| anyhow!("Failed to create .polyworld directory: {}", e))?;
            poly_dir.join("client.redb")
        };

        info!("Opening client store at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open client store: {}", e))?;

        // Ensure the table exists by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(CLIENT)
                .map_err(|e| anyhow!("Failed to create client table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: db_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Raw key helpers
    // ========================================================================

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(CLIENT)
                .map_err(|e| anyhow!("Failed to open client table: {}", e))?;
            table
                .insert(key, value)
                .map_err(|e| anyhow!("Failed to insert {}: {}", key, e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(CLIENT)
            .map_err(|e| anyhow!("Failed to open client table: {}", e))?;
        Ok(table
            .get(key)
            .map_err(|e| anyhow!("Failed to get {}: {}", key, e))?
            .map(|v| v.value().to_vec()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(CLIENT)
                .map_err(|e| anyhow!("Failed to open client table: {}", e))?;
            table
                .remove(key)
                .map_err(|e| anyhow!("Failed to remove {}: {}", key, e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;
        Ok(())
    }

    fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self
            .get(key)?
            .map(|v| v.first().copied() == Some(1))
            .unwrap_or(default))
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.put(key, &[u8::from(value)])
    }

    // ========================================================================
    // User identity
    // ========================================================================

    pub fn save_user(&self, user: &PolyUser) -> Result<()> {
        let value =
            bincode::serialize(user).map_err(|e| anyhow!("Failed to serialize user: {}", e))?;
        self.put(KEY_USER, &value)?;
        debug!("Stored user: {}", user.address);
        Ok(())
    }

    pub fn load_user(&self) -> Result<Option<PolyUser>> {
        match self.get(KEY_USER)? {
            Some(value) => {
                let user: PolyUser = bincode::deserialize(&value)
                    .map_err(|e| anyhow!("Failed to deserialize user: {}", e))?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    pub fn clear_user(&self) -> Result<()> {
        self.remove(KEY_USER)?;
        self.remove(KEY_PRIMARY_ADDRESS)
    }

    pub fn save_primary_address(&self, address: &str) -> Result<()> {
        self.put(KEY_PRIMARY_ADDRESS, address.as_bytes())
    }

    pub fn primary_address(&self) -> Result<Option<String>> {
        Ok(self
            .get(KEY_PRIMARY_ADDRESS)?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    // ========================================================================
    // Preferences
    // ========================================================================

    /// Voice output defaults to on.
    pub fn tts_enabled(&self) -> Result<bool> {
        self.get_bool(KEY_TTS_ENABLED, true)
    }

    pub fn set_tts_enabled(&self, enabled: bool) -> Result<()> {
        self.set_bool(KEY_TTS_ENABLED, enabled)
    }

    pub fn training_debug(&self) -> Result<bool> {
        self.get_bool(KEY_TRAINING_DEBUG, false)
    }

    pub fn set_training_debug(&self, enabled: bool) -> Result<()> {
        self.set_bool(KEY_TRAINING_DEBUG, enabled)
    }

    // ========================================================================
    // Reward milestone flags
    // ========================================================================

    pub fn milestone_granted(&self, key: &str) -> Result<bool> {
        self.get_bool(&format!("{}{}", MILESTONE_PREFIX, key), false)
    }

    pub fn mark_milestone(&self, key: &str) -> Result<()> {
        self.set_bool(&format!("{}{}", MILESTONE_PREFIX, key), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_temp() -> (tempfile::TempDir, LocalStore) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.redb");
        let store = LocalStore::open(Some(path.to_str().unwrap())).unwrap();
        (dir, store)
    }

    #[test]
    fn test_user_roundtrip() {
        let (_dir, store) = open_temp();
        assert!(store.load_user().unwrap().is_none());

        let user = PolyUser {
            address: "0xabc".into(),
            private_key: Some("deadbeef".into()),
            generated: true,
        };
        store.save_user(&user).unwrap();
        assert_eq!(store.load_user().unwrap(), Some(user));

        store.clear_user().unwrap();
        assert!(store.load_user().unwrap().is_none());
    }

    #[test]
    fn test_primary_address() {
        let (_dir, store) = open_temp();
        assert!(store.primary_address().unwrap().is_none());
        store.save_primary_address("0x1234").unwrap();
        assert_eq!(store.primary_address().unwrap().as_deref(), Some("0x1234"));

        // clear_user wipes the override too
        store.clear_user().unwrap();
        assert!(store.primary_address().unwrap().is_none());
    }

    #[test]
    fn test_tts_defaults_on() {
        let (_dir, store) = open_temp();
        assert!(store.tts_enabled().unwrap());
        store.set_tts_enabled(false).unwrap();
        assert!(!store.tts_enabled().unwrap());
    }

    #[test]
    fn test_milestone_flags_idempotent() {
        let (_dir, store) = open_temp();
        assert!(!store.milestone_granted("signup").unwrap());
        store.mark_milestone("signup").unwrap();
        assert!(store.milestone_granted("signup").unwrap());
        // other milestones unaffected
        assert!(!store.milestone_granted("attention").unwrap());
    }
}
