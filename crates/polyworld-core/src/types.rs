//! ============================================================================
//! Core Types for the Polyworld Operator
//! ============================================================================
//! Defines the data structures shared across the conversation engine: Ember
//! persona records, Flame identity records, balance snapshots, and the
//! device-bound user. These mirror the JSON documents served by the remote
//! gateway and are serialized with camelCase field names on the wire.
//! ============================================================================

use serde::{Deserialize, Deserializer, Serialize};

/// Numeric field coercion for balance payloads: the backend sends null or an
/// empty string for zero, and sometimes numbers as strings.
pub(crate) fn lenient_num<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => 0.0,
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                0.0
            } else {
                t.parse().unwrap_or(0.0)
            }
        }
        Some(_) => 0.0,
    })
}

/// POLISTAR ledger balance for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    #[serde(default, deserialize_with = "lenient_num")]
    pub balance: f64,
    #[serde(default, deserialize_with = "lenient_num")]
    pub withdrawable: f64,
    #[serde(default, deserialize_with = "lenient_num")]
    pub pending: f64,
}

/// Persona text block entered during training step 7.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaText {
    #[serde(default)]
    pub tagline: String,
    #[serde(default)]
    pub long_bio: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub description: String,
}

/// Raw voice descriptor stored on an Ember record. Normalized into a
/// [`crate::voice::VoiceProfile`] before use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSpec {
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub speaking_rate: Option<f64>,
    /// Pitch offset in semitones, Google-TTS style (-20..20).
    #[serde(default)]
    pub pitch: Option<f64>,
    #[serde(default)]
    pub ssml_gender: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Storage references for an Ember's avatar and room background.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRefs {
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub background_url: Option<String>,
}

/// On-chain identity token reference, present once an Ember NFT is minted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftRef {
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(default)]
    pub token_id: Option<String>,
}

impl NftRef {
    /// A "true Ember" has both a contract and a token id.
    pub fn is_minted(&self) -> bool {
        self.token_id.is_some() && self.contract.as_deref().is_some_and(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmberStatus {
    Training,
    Active,
}

impl Default for EmberStatus {
    fn default() -> Self {
        EmberStatus::Training
    }
}

/// Server-side training progress marker. The `step` field is the single
/// source of truth for where a trainer resumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingProgress {
    #[serde(default)]
    pub step: u8,
    #[serde(default)]
    pub complete: bool,
}

/// A user-trainable AI character, distinct from the default Polistar host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmberRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub persona: Option<PersonaText>,
    #[serde(default)]
    pub voice: Option<VoiceSpec>,
    #[serde(default)]
    pub media: Option<MediaRefs>,
    #[serde(default)]
    pub nft: Option<NftRef>,
    #[serde(default)]
    pub status: EmberStatus,
    #[serde(default)]
    pub training_progress: Option<TrainingProgress>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub greeting: Option<String>,
}

impl EmberRecord {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn is_minted(&self) -> bool {
        self.nft.as_ref().is_some_and(NftRef::is_minted)
    }

    pub fn progress_step(&self) -> u8 {
        self.training_progress.as_ref().map(|p| p.step).unwrap_or(1)
    }
}

/// Per-user identity document shared across all Embers created by a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlameRecord {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub dob: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub identity_complete: bool,
}

impl FlameRecord {
    /// Training step 1 is skippable when the Flame already carries a name.
    pub fn has_name(&self) -> bool {
        self.first_name.as_deref().is_some_and(|s| !s.is_empty())
            && self.last_name.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Training step 5 is skippable when dob/email/mobile are all present.
    pub fn has_identity(&self) -> bool {
        self.dob.as_deref().is_some_and(|s| !s.is_empty())
            && self.email.as_deref().is_some_and(|s| !s.is_empty())
            && self.mobile.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Device-bound identity persisted in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolyUser {
    pub address: String,
    #[serde(default)]
    pub private_key: Option<String>,
    /// True for ephemeral wallets generated on-device, false once a real
    /// wallet has been connected.
    #[serde(default)]
    pub generated: bool,
}

/// True for a `0x`-prefixed 40-hex-digit address.
pub fn is_hex_address(s: &str) -> bool {
    let s = s.trim();
    s.len() == 42
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Shorten an address-shaped identifier to `prefix(6)…suffix(4)`; anything
/// else renders verbatim.
pub fn pretty_recipient(id: &str) -> String {
    let id = id.trim();
    if is_hex_address(id) {
        format!("{}…{}", &id[..6], &id[id.len() - 4..])
    } else {
        id.to_string()
    }
}

/// Format a token amount the way a user typed it: integers without a
/// trailing fraction, everything else with its natural decimal form.
pub fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 && amount.abs() < 1e15 {
        format!("{}", amount as i64)
    } else {
        format!("{}", amount)
    }
}
