//! ============================================================================
//! Remote Action Gateway
//! ============================================================================
//! Every remote effect the conversation engine can cause goes through the
//! `Gateway` trait: balances and rates, POLISTAR transfer/mint/burn, the
//! POLI bridge, the buy-POLI transaction builders, wallet authentication,
//! the Ember persona mutation suite, and the free-chat relay.
//!
//! `HttpGateway` is the production implementation: JSON over HTTPS against a
//! configurable endpoint table, with a bearer token attached when the
//! identity provider has one. Tests substitute scripted implementations of
//! the trait instead.
//! ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{GatewayConfig, FALLBACK_POLISTAR_PER_POLI, FALLBACK_POLI_PER_USDT};
use crate::signer::TxRequest;
use crate::types::{lenient_num, BalanceSnapshot, EmberRecord, FlameRecord, PersonaText};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),
    #[error("gateway returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("malformed gateway response: {0}")]
    Decode(String),
    /// User declined in the wallet; surfaced by operations that relay a
    /// signature request (EIP-1193 code 4001).
    #[error("operation rejected by user")]
    Rejected,
    #[error("{0}")]
    Remote(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Network(e.to_string())
    }
}

impl GatewayError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, GatewayError::Rejected)
    }
}

// ============================================================================
// Request/response payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    pub user_id: String,
    pub token_id: String,
    pub amount: f64,
    pub to_asset: String,
    pub direction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEmberRequest {
    pub creator: String,
    pub first_name: String,
    pub last_name: String,
    pub focus: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintReceipt {
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ember_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ember_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<PersonaText>,
}

// ============================================================================
// Gateway trait
// ============================================================================

#[async_trait]
pub trait Gateway: Send + Sync {
    // --- identity and balances ---
    async fn flame(&self, user_id: &str) -> Result<Option<FlameRecord>, GatewayError>;
    async fn polistar_balance(&self, user_id: &str) -> Result<BalanceSnapshot, GatewayError>;
    async fn poli_balance(&self, address: &str) -> Result<f64, GatewayError>;
    async fn usdt_balance(&self, address: &str) -> Result<f64, GatewayError>;

    // --- rates; implementations fall back to fixed defaults on failure ---
    async fn poli_per_usdt(&self) -> f64;
    async fn polistar_per_poli(&self) -> f64;

    // --- token movement ---
    async fn transfer_polistar(&self, from: &str, to: &str, amount: f64)
        -> Result<(), GatewayError>;
    async fn reward_polistar(
        &self,
        user_id: &str,
        address: &str,
        amount: f64,
        reason: &str,
    ) -> Result<(), GatewayError>;
    async fn burn_polistar(&self, user_id: &str, amount: f64, reason: &str)
        -> Result<(), GatewayError>;
    async fn bridge_token(&self, req: &BridgeRequest) -> Result<(), GatewayError>;

    // --- buy-POLI transaction builders ---
    /// Returns None when no approval is needed for this amount.
    async fn build_approve_usdt_tx(
        &self,
        traveller: &str,
        usdt_units: &str,
    ) -> Result<Option<TxRequest>, GatewayError>;
    async fn build_buy_poli_tx(
        &self,
        traveller: &str,
        usdt_units: &str,
    ) -> Result<TxRequest, GatewayError>;

    // --- authentication ---
    async fn authenticate_wallet(
        &self,
        address: &str,
        message: &str,
        signature: &str,
    ) -> Result<(), GatewayError>;
    async fn merge_sessions(&self, primary: &str, secondary: &str) -> Result<(), GatewayError>;
    /// Mint a one-shot device-login token; returns the login URL.
    async fn create_device_login(&self, user_id: &str) -> Result<String, GatewayError>;

    // --- ember directory ---
    async fn list_active_embers(&self) -> Result<Vec<EmberRecord>, GatewayError>;
    async fn list_embers_by_creator(&self, user_id: &str)
        -> Result<Vec<EmberRecord>, GatewayError>;

    // --- ember training mutations ---
    async fn create_ember(&self, req: &CreateEmberRequest) -> Result<String, GatewayError>;
    async fn set_ember_voice(&self, ember_id: &str, voice: &str) -> Result<(), GatewayError>;
    async fn set_flame_identity(
        &self,
        user_id: &str,
        dob: &str,
        email: &str,
        mobile: &str,
    ) -> Result<(), GatewayError>;
    async fn set_ember_wallet(&self, ember_id: &str, payout: &str) -> Result<(), GatewayError>;
    async fn set_ember_persona(
        &self,
        ember_id: &str,
        persona: &PersonaText,
    ) -> Result<(), GatewayError>;
    async fn upload_avatar(&self, ember_id: &str, image_data: &str) -> Result<(), GatewayError>;
    async fn upload_description(&self, ember_id: &str, content: &str)
        -> Result<(), GatewayError>;
    async fn mint_ember_nft(
        &self,
        user_id: &str,
        ember_id: &str,
        wallet: &str,
    ) -> Result<MintReceipt, GatewayError>;
    async fn finalize_ember(&self, user_id: &str, ember_id: &str) -> Result<(), GatewayError>;
    async fn save_training_step(&self, ember_id: &str, step: u8) -> Result<(), GatewayError>;

    // --- chat relay ---
    async fn chat_reply(&self, req: &ChatRequest) -> Result<String, GatewayError>;
}

// ============================================================================
// Identity provider
// ============================================================================

/// Supplies the bearer token attached to gateway calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn id_token(&self) -> Option<String>;
}

/// Fixed token (or none for anonymous access).
pub struct StaticToken(pub Option<String>);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn id_token(&self) -> Option<String> {
        self.0.clone()
    }
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Reply used when the chat backend answers without a usable reply field.
pub const CHAT_FALLBACK_REPLY: &str = "Hmm… I didn't quite catch that.";

pub struct HttpGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    tokens: Arc<dyn TokenProvider>,
}

#[derive(Debug, Deserialize)]
struct NumberReply {
    #[serde(default, deserialize_with = "lenient_num", alias = "amount", alias = "rate")]
    balance: f64,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    reply: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedReply {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceLoginReply {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmberListReply {
    #[serde(default)]
    embers: Vec<EmberRecord>,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            tokens,
        }
    }

    async fn request<R: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<R, GatewayError> {
        let builder = match self.tokens.id_token().await {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };
        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                message,
            });
        }
        resp.json::<R>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, GatewayError> {
        debug!("POST {}", path);
        self.request(self.client.post(self.config.endpoint(path)).json(body))
            .await
    }

    async fn get<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<R, GatewayError> {
        debug!("GET {}", path);
        self.request(self.client.get(self.config.endpoint(path)).query(query))
            .await
    }

    async fn post_ok<B: Serialize>(&self, path: &str, body: &B) -> Result<(), GatewayError> {
        let _: serde_json::Value = self.post(path, body).await?;
        Ok(())
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn flame(&self, user_id: &str) -> Result<Option<FlameRecord>, GatewayError> {
        match self
            .get::<FlameRecord>("getFlame", &[("uid", user_id)])
            .await
        {
            Ok(flame) => Ok(Some(flame)),
            Err(GatewayError::Http { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn polistar_balance(&self, user_id: &str) -> Result<BalanceSnapshot, GatewayError> {
        self.get("getBalance", &[("uid", user_id)]).await
    }

    async fn poli_balance(&self, address: &str) -> Result<f64, GatewayError> {
        let reply: NumberReply = self
            .get("getPoliBalance", &[("address", address)])
            .await?;
        Ok(reply.balance)
    }

    async fn usdt_balance(&self, address: &str) -> Result<f64, GatewayError> {
        let reply: NumberReply = self
            .get("getUsdtBalance", &[("address", address)])
            .await?;
        Ok(reply.balance)
    }

    async fn poli_per_usdt(&self) -> f64 {
        if let Some(rate) = self.config.dev.poli_per_usdt {
            return rate;
        }
        match self.get::<NumberReply>("getPoliRate", &[]).await {
            Ok(reply) if reply.balance > 0.0 => reply.balance,
            Ok(_) => FALLBACK_POLI_PER_USDT,
            Err(e) => {
                warn!("POLI rate fetch failed, using fallback: {}", e);
                FALLBACK_POLI_PER_USDT
            }
        }
    }

    async fn polistar_per_poli(&self) -> f64 {
        if let Some(rate) = self.config.dev.polistar_per_poli {
            return rate;
        }
        match self.get::<NumberReply>("getPolistarRate", &[]).await {
            Ok(reply) if reply.balance > 0.0 => reply.balance,
            Ok(_) => FALLBACK_POLISTAR_PER_POLI,
            Err(e) => {
                warn!("POLISTAR rate fetch failed, using fallback: {}", e);
                FALLBACK_POLISTAR_PER_POLI
            }
        }
    }

    async fn transfer_polistar(
        &self,
        from: &str,
        to: &str,
        amount: f64,
    ) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            from: &'a str,
            to: &'a str,
            amount: f64,
        }
        self.post_ok("transferPolistar", &Body { from, to, amount }).await
    }

    async fn reward_polistar(
        &self,
        user_id: &str,
        address: &str,
        amount: f64,
        reason: &str,
    ) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            uid: &'a str,
            address: &'a str,
            amount: f64,
            reason: &'a str,
        }
        self.post_ok(
            "mintPolistar",
            &Body {
                uid: user_id,
                address,
                amount,
                reason,
            },
        )
        .await
    }

    async fn burn_polistar(
        &self,
        user_id: &str,
        amount: f64,
        reason: &str,
    ) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            uid: &'a str,
            amount: f64,
            reason: &'a str,
        }
        self.post_ok(
            "burnPolistar",
            &Body {
                uid: user_id,
                amount,
                reason,
            },
        )
        .await
    }

    async fn bridge_token(&self, req: &BridgeRequest) -> Result<(), GatewayError> {
        self.post_ok("bridgeToken", req).await
    }

    async fn build_approve_usdt_tx(
        &self,
        traveller: &str,
        usdt_units: &str,
    ) -> Result<Option<TxRequest>, GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            traveller: &'a str,
            usdt_amount: &'a str,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Reply {
            #[serde(default)]
            tx: Option<TxRequest>,
        }
        let reply: Reply = self
            .post(
                "buildApproveUsdtTx",
                &Body {
                    traveller,
                    usdt_amount: usdt_units,
                },
            )
            .await?;
        Ok(reply.tx.filter(|tx| !tx.to.is_empty()))
    }

    async fn build_buy_poli_tx(
        &self,
        traveller: &str,
        usdt_units: &str,
    ) -> Result<TxRequest, GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            traveller: &'a str,
            usdt_amount: &'a str,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Reply {
            tx: TxRequest,
        }
        let reply: Reply = self
            .post(
                "buildBuyPoliTx",
                &Body {
                    traveller,
                    usdt_amount: usdt_units,
                },
            )
            .await?;
        Ok(reply.tx)
    }

    async fn authenticate_wallet(
        &self,
        address: &str,
        message: &str,
        signature: &str,
    ) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            address: &'a str,
            message: &'a str,
            signature: &'a str,
        }
        self.post_ok(
            "authMetamask",
            &Body {
                address,
                message,
                signature,
            },
        )
        .await
    }

    async fn merge_sessions(&self, primary: &str, secondary: &str) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            primary: &'a str,
            secondary: &'a str,
        }
        self.post_ok("mergeSessions", &Body { primary, secondary }).await
    }

    async fn create_device_login(&self, user_id: &str) -> Result<String, GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            uid: &'a str,
        }
        let reply: DeviceLoginReply = self
            .post("createDeviceLogin", &Body { uid: user_id })
            .await?;
        Ok(reply.url)
    }

    async fn list_active_embers(&self) -> Result<Vec<EmberRecord>, GatewayError> {
        let reply: EmberListReply = self.get("listEmbers", &[("status", "active")]).await?;
        Ok(reply.embers)
    }

    async fn list_embers_by_creator(
        &self,
        user_id: &str,
    ) -> Result<Vec<EmberRecord>, GatewayError> {
        let reply: EmberListReply = self.get("listEmbers", &[("creator", user_id)]).await?;
        Ok(reply.embers)
    }

    async fn create_ember(&self, req: &CreateEmberRequest) -> Result<String, GatewayError> {
        let reply: CreatedReply = self.post("createEmber", req).await?;
        Ok(reply.id)
    }

    async fn set_ember_voice(&self, ember_id: &str, voice: &str) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            ember_id: &'a str,
            voice: &'a str,
        }
        self.post_ok("setEmberVoice", &Body { ember_id, voice }).await
    }

    async fn set_flame_identity(
        &self,
        user_id: &str,
        dob: &str,
        email: &str,
        mobile: &str,
    ) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            uid: &'a str,
            dob: &'a str,
            email: &'a str,
            mobile: &'a str,
        }
        self.post_ok(
            "setFlameIdentity",
            &Body {
                uid: user_id,
                dob,
                email,
                mobile,
            },
        )
        .await
    }

    async fn set_ember_wallet(&self, ember_id: &str, payout: &str) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            ember_id: &'a str,
            payout: &'a str,
        }
        self.post_ok("setEmberWallet", &Body { ember_id, payout }).await
    }

    async fn set_ember_persona(
        &self,
        ember_id: &str,
        persona: &PersonaText,
    ) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            ember_id: &'a str,
            persona: &'a PersonaText,
        }
        self.post_ok("setEmberPersona", &Body { ember_id, persona }).await
    }

    async fn upload_avatar(&self, ember_id: &str, image_data: &str) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            ember_id: &'a str,
            image_data: &'a str,
        }
        self.post_ok("uploadAvatar", &Body { ember_id, image_data }).await
    }

    async fn upload_description(
        &self,
        ember_id: &str,
        content: &str,
    ) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            ember_id: &'a str,
            content: &'a str,
        }
        self.post_ok("uploadDescription", &Body { ember_id, content }).await
    }

    async fn mint_ember_nft(
        &self,
        user_id: &str,
        ember_id: &str,
        wallet: &str,
    ) -> Result<MintReceipt, GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            uid: &'a str,
            ember_id: &'a str,
            wallet: &'a str,
        }
        self.post(
            "mintEmberNft",
            &Body {
                uid: user_id,
                ember_id,
                wallet,
            },
        )
        .await
    }

    async fn finalize_ember(&self, user_id: &str, ember_id: &str) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            uid: &'a str,
            ember_id: &'a str,
        }
        self.post_ok(
            "finalizeEmber",
            &Body {
                uid: user_id,
                ember_id,
            },
        )
        .await
    }

    async fn save_training_step(&self, ember_id: &str, step: u8) -> Result<(), GatewayError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            ember_id: &'a str,
            step: u8,
        }
        self.post_ok("updateEmber", &Body { ember_id, step }).await
    }

    async fn chat_reply(&self, req: &ChatRequest) -> Result<String, GatewayError> {
        let reply: ChatReply = self.post("chat", req).await?;
        Ok(reply
            .reply
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| CHAT_FALLBACK_REPLY.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_reply_coercion() {
        let reply: NumberReply = serde_json::from_str(r#"{"balance": "7.5"}"#).unwrap();
        assert_eq!(reply.balance, 7.5);
        let reply: NumberReply = serde_json::from_str(r#"{"balance": null}"#).unwrap();
        assert_eq!(reply.balance, 0.0);
    }

    #[test]
    fn test_chat_request_skips_empty_context() {
        let req = ChatRequest {
            message: "hi".into(),
            session_id: "guest-1".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("emberId").is_none());
        assert!(json.get("persona").is_none());
    }

    #[test]
    fn test_bridge_request_wire_shape() {
        let req = BridgeRequest {
            user_id: "u1".into(),
            token_id: "POLISTAR".into(),
            amount: 3.0,
            to_asset: "POLI".into(),
            direction: "fromEVM".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["toAsset"], "POLI");
        assert_eq!(json["direction"], "fromEVM");
    }
}
