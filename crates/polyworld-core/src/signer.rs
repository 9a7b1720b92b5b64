//! ============================================================================
//! Wallet Signer Interface
//! ============================================================================
//! Seam for the user's wallet: account access, message signing for login,
//! and transaction submission. The engine only distinguishes "the user said
//! no" from every other failure, because the wizards react differently to
//! the two.
//! ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// EVM-style transaction request produced by the remote transaction builder
/// and handed to the wallet for signing and submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequest {
    pub to: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub gas: Option<String>,
}

#[derive(Debug, Error)]
pub enum SignerError {
    /// The user declined in the wallet (code 4001 in EIP-1193 terms).
    #[error("transaction rejected by user")]
    Rejected,
    /// No wallet is reachable at all.
    #[error("wallet not available: {0}")]
    Unavailable(String),
    #[error("signer error: {0}")]
    Other(String),
}

impl SignerError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, SignerError::Rejected)
    }
}

/// Wallet collaborator. `send_transaction` resolves only once the
/// transaction is confirmed, so callers can announce completion directly.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Request account access and return the selected address.
    async fn connect(&self) -> Result<String, SignerError>;

    /// Sign a plain-text login challenge, returning the signature hex.
    async fn sign_message(&self, message: &str) -> Result<String, SignerError>;

    /// Submit a transaction and wait for confirmation; returns the tx hash.
    async fn send_transaction(&self, tx: &TxRequest) -> Result<String, SignerError>;
}
