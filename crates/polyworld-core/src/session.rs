//! ============================================================================
//! Session Context
//! ============================================================================
//! Per-conversation identity: the device-bound user, the wallet address the
//! wizards act on, and which character is currently speaking. An ephemeral
//! wallet is generated on first use when the store has none, so balances
//! work before any real wallet is connected.
//! ============================================================================

use anyhow::Result;
use rand::RngCore;
use tracing::info;

use crate::store::LocalStore;
use crate::types::PolyUser;

/// The active conversational character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Speaker {
    /// The default Polistar host.
    Polistar,
    /// A selected Ember persona.
    Ember { id: String, name: String },
}

impl Speaker {
    pub fn display_name(&self) -> &str {
        match self {
            Speaker::Polistar => "Polistar",
            Speaker::Ember { name, .. } => name,
        }
    }

    pub fn is_polistar(&self) -> bool {
        matches!(self, Speaker::Polistar)
    }
}

#[derive(Debug)]
pub struct SessionContext {
    pub user: Option<PolyUser>,
    /// Address the token wizards act on (connected wallet, or the stored
    /// primary address, or the device user's own address).
    pub wallet_address: Option<String>,
    /// Backend identity used for POLISTAR ledger operations.
    pub traveller_id: Option<String>,
    pub speaker: Speaker,
    /// Guest session id for the chat relay when no wallet exists yet.
    pub guest_id: String,
    /// Set once the first free-chat message has bootstrapped identity and
    /// balances.
    pub first_response_sent: bool,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            user: None,
            wallet_address: None,
            traveller_id: None,
            speaker: Speaker::Polistar,
            guest_id: format!("guest-{}", uuid::Uuid::new_v4()),
            first_response_sent: false,
        }
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session id for the chat relay: wallet address when known, otherwise
    /// the per-process guest id.
    pub fn chat_session_id(&self) -> String {
        self.wallet_address
            .clone()
            .unwrap_or_else(|| self.guest_id.clone())
    }

    /// Load the stored user, generating an ephemeral wallet the first time.
    /// The stored primary address, when present, wins over the user's own.
    pub fn load_or_create_user(&mut self, store: &LocalStore) -> Result<&PolyUser> {
        let user = match store.load_user()? {
            Some(user) => user,
            None => {
                let user = generate_ephemeral_wallet();
                info!("Generated ephemeral wallet: {}", user.address);
                store.save_user(&user)?;
                user
            }
        };

        let primary = store.primary_address()?;
        self.wallet_address = Some(primary.unwrap_or_else(|| user.address.clone()));
        self.traveller_id = Some(user.address.to_lowercase());
        self.user = Some(user);
        // load_or_create_user always leaves a user behind
        Ok(self.user.as_ref().ok_or_else(|| anyhow::anyhow!("user missing after load"))?)
    }

    /// Install a connected wallet as the session identity.
    pub fn adopt_wallet(&mut self, store: &LocalStore, address: &str) -> Result<()> {
        let user = PolyUser {
            address: address.to_string(),
            private_key: None,
            generated: false,
        };
        store.save_user(&user)?;
        store.save_primary_address(address)?;
        self.wallet_address = Some(address.to_string());
        self.traveller_id = Some(address.to_lowercase());
        self.user = Some(user);
        Ok(())
    }

    /// Forget the stored identity entirely.
    pub fn clear_identity(&mut self, store: &LocalStore) -> Result<()> {
        store.clear_user()?;
        self.user = None;
        self.wallet_address = None;
        self.traveller_id = None;
        Ok(())
    }

    /// Shortened badge form of the wallet address.
    pub fn short_address(&self) -> Option<String> {
        self.wallet_address
            .as_deref()
            .map(crate::types::pretty_recipient)
    }
}

/// Generate a random EVM-shaped address with its private key. Good enough
/// for a guest identity; a real wallet replaces it on connect.
pub fn generate_ephemeral_wallet() -> PolyUser {
    let mut rng = rand::thread_rng();
    let mut key = [0u8; 32];
    rng.fill_bytes(&mut key);
    let mut addr = [0u8; 20];
    rng.fill_bytes(&mut addr);
    PolyUser {
        address: format!("0x{}", hex::encode(addr)),
        private_key: Some(hex::encode(key)),
        generated: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn temp_store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.redb");
        let store = LocalStore::open(Some(path.to_str().unwrap())).unwrap();
        (dir, store)
    }

    #[test]
    fn test_ephemeral_wallet_shape() {
        let user = generate_ephemeral_wallet();
        assert!(crate::types::is_hex_address(&user.address));
        assert!(user.generated);
        assert_eq!(user.private_key.map(|k| k.len()), Some(64));
    }

    #[test]
    fn test_load_or_create_persists_and_reloads() {
        let (_dir, store) = temp_store();
        let mut session = SessionContext::new();
        let first = session.load_or_create_user(&store).unwrap().clone();

        let mut other = SessionContext::new();
        let second = other.load_or_create_user(&store).unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(other.wallet_address.as_deref(), Some(first.address.as_str()));
        assert_eq!(
            other.traveller_id.as_deref(),
            Some(first.address.to_lowercase().as_str())
        );
    }

    #[test]
    fn test_primary_address_override_wins() {
        let (_dir, store) = temp_store();
        store.save_primary_address("0xprimary").unwrap();
        let mut session = SessionContext::new();
        session.load_or_create_user(&store).unwrap();
        assert_eq!(session.wallet_address.as_deref(), Some("0xprimary"));
    }

    #[test]
    fn test_adopt_and_clear_wallet() {
        let (_dir, store) = temp_store();
        let mut session = SessionContext::new();
        session.load_or_create_user(&store).unwrap();
        assert!(session.user.as_ref().unwrap().generated);

        session.adopt_wallet(&store, "0xABCDEF").unwrap();
        assert!(!session.user.as_ref().unwrap().generated);
        assert_eq!(session.traveller_id.as_deref(), Some("0xabcdef"));

        session.clear_identity(&store).unwrap();
        assert!(session.user.is_none());
        assert!(store.load_user().unwrap().is_none());
    }

    #[test]
    fn test_chat_session_id_prefers_wallet() {
        let mut session = SessionContext::new();
        assert!(session.chat_session_id().starts_with("guest-"));
        session.wallet_address = Some("0xfeed".into());
        assert_eq!(session.chat_session_id(), "0xfeed");
    }
}
