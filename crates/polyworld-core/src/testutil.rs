//! ============================================================================
//! Test Doubles
//! ============================================================================
//! Scripted collaborators shared by the unit tests: a configurable gateway,
//! a wallet signer with per-operation failure switches, and a recording
//! speech synthesizer.
//! ============================================================================

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::gateway::{
    BridgeRequest, ChatRequest, CreateEmberRequest, Gateway, GatewayError, MintReceipt,
};
use crate::signer::{SignerError, TxRequest, WalletSigner};
use crate::types::{BalanceSnapshot, EmberRecord, FlameRecord, PersonaText};
use crate::voice::{SpeechSynth, VoiceProfile};

/// Scripted gateway. Defaults are benign (empty lists, zero balances,
/// fallback-free rates); tests flip individual operations into failure or
/// rejection by name. Every call is appended to `calls` as
/// `"op arg1 arg2"` for assertion.
pub struct MockGateway {
    pub flame: Mutex<Option<FlameRecord>>,
    pub polistar: Mutex<BalanceSnapshot>,
    pub poli: Mutex<f64>,
    pub usdt: Mutex<f64>,
    pub poli_rate: Mutex<f64>,
    pub polistar_rate: Mutex<f64>,
    pub active_embers: Mutex<Vec<EmberRecord>>,
    pub my_embers: Mutex<Vec<EmberRecord>>,
    pub chat_response: Mutex<String>,
    pub next_ember_id: Mutex<String>,
    pub approve_tx: Mutex<Option<TxRequest>>,
    pub mint_receipt: Mutex<MintReceipt>,
    pub device_login_url: Mutex<String>,
    /// Operation names that fail with a generic remote error.
    pub failing: Mutex<HashSet<&'static str>>,
    /// Operation names that fail with `GatewayError::Rejected`.
    pub rejecting: Mutex<HashSet<&'static str>>,
    pub calls: Mutex<Vec<String>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self {
            flame: Mutex::new(None),
            polistar: Mutex::new(BalanceSnapshot {
                balance: 0.0,
                withdrawable: 0.0,
                pending: 0.0,
            }),
            poli: Mutex::new(0.0),
            usdt: Mutex::new(0.0),
            poli_rate: Mutex::new(10.0),
            polistar_rate: Mutex::new(1.0),
            active_embers: Mutex::new(Vec::new()),
            my_embers: Mutex::new(Vec::new()),
            chat_response: Mutex::new("ok".to_string()),
            next_ember_id: Mutex::new("ember-1".to_string()),
            approve_tx: Mutex::new(None),
            mint_receipt: Mutex::new(MintReceipt {
                contract: Some("0xc0ffee".into()),
                token_id: Some("1".into()),
                tx_hash: Some("0xhash".into()),
            }),
            device_login_url: Mutex::new("https://polyworld.test/device/abc".to_string()),
            failing: Mutex::new(HashSet::new()),
            rejecting: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn reject(&self, op: &'static str) {
        self.rejecting.lock().unwrap().insert(op);
    }

    pub fn set_flame(&self, flame: FlameRecord) {
        *self.flame.lock().unwrap() = Some(flame);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn check(&self, op: &'static str, call: String) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(call);
        if self.rejecting.lock().unwrap().contains(op) {
            return Err(GatewayError::Rejected);
        }
        if self.failing.lock().unwrap().contains(op) {
            return Err(GatewayError::Remote(format!("{} failed", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn flame(&self, user_id: &str) -> Result<Option<FlameRecord>, GatewayError> {
        self.check("flame", format!("flame {}", user_id))?;
        Ok(self.flame.lock().unwrap().clone())
    }

    async fn polistar_balance(&self, user_id: &str) -> Result<BalanceSnapshot, GatewayError> {
        self.check("polistar_balance", format!("polistar_balance {}", user_id))?;
        Ok(self.polistar.lock().unwrap().clone())
    }

    async fn poli_balance(&self, address: &str) -> Result<f64, GatewayError> {
        self.check("poli_balance", format!("poli_balance {}", address))?;
        Ok(*self.poli.lock().unwrap())
    }

    async fn usdt_balance(&self, address: &str) -> Result<f64, GatewayError> {
        self.check("usdt_balance", format!("usdt_balance {}", address))?;
        Ok(*self.usdt.lock().unwrap())
    }

    async fn poli_per_usdt(&self) -> f64 {
        *self.poli_rate.lock().unwrap()
    }

    async fn polistar_per_poli(&self) -> f64 {
        *self.polistar_rate.lock().unwrap()
    }

    async fn transfer_polistar(
        &self,
        from: &str,
        to: &str,
        amount: f64,
    ) -> Result<(), GatewayError> {
        self.check(
            "transfer_polistar",
            format!("transfer_polistar {} {} {}", from, to, amount),
        )
    }

    async fn reward_polistar(
        &self,
        user_id: &str,
        address: &str,
        amount: f64,
        reason: &str,
    ) -> Result<(), GatewayError> {
        self.check(
            "reward_polistar",
            format!("reward_polistar {} {} {} {}", user_id, address, amount, reason),
        )
    }

    async fn burn_polistar(
        &self,
        user_id: &str,
        amount: f64,
        reason: &str,
    ) -> Result<(), GatewayError> {
        self.check(
            "burn_polistar",
            format!("burn_polistar {} {} {}", user_id, amount, reason),
        )
    }

    async fn bridge_token(&self, req: &BridgeRequest) -> Result<(), GatewayError> {
        self.check(
            "bridge_token",
            format!(
                "bridge_token {} {} {} {}",
                req.user_id, req.token_id, req.amount, req.direction
            ),
        )
    }

    async fn build_approve_usdt_tx(
        &self,
        traveller: &str,
        usdt_units: &str,
    ) -> Result<Option<TxRequest>, GatewayError> {
        self.check(
            "build_approve_usdt_tx",
            format!("build_approve_usdt_tx {} {}", traveller, usdt_units),
        )?;
        Ok(self.approve_tx.lock().unwrap().clone())
    }

    async fn build_buy_poli_tx(
        &self,
        traveller: &str,
        usdt_units: &str,
    ) -> Result<TxRequest, GatewayError> {
        self.check(
            "build_buy_poli_tx",
            format!("build_buy_poli_tx {} {}", traveller, usdt_units),
        )?;
        Ok(TxRequest {
            to: "0xrouter".into(),
            data: Some("0xdeadbeef".into()),
            value: None,
            gas: None,
        })
    }

    async fn authenticate_wallet(
        &self,
        address: &str,
        _message: &str,
        _signature: &str,
    ) -> Result<(), GatewayError> {
        self.check("authenticate_wallet", format!("authenticate_wallet {}", address))
    }

    async fn merge_sessions(&self, primary: &str, secondary: &str) -> Result<(), GatewayError> {
        self.check(
            "merge_sessions",
            format!("merge_sessions {} {}", primary, secondary),
        )
    }

    async fn create_device_login(&self, user_id: &str) -> Result<String, GatewayError> {
        self.check("create_device_login", format!("create_device_login {}", user_id))?;
        Ok(self.device_login_url.lock().unwrap().clone())
    }

    async fn list_active_embers(&self) -> Result<Vec<EmberRecord>, GatewayError> {
        self.check("list_active_embers", "list_active_embers".to_string())?;
        Ok(self.active_embers.lock().unwrap().clone())
    }

    async fn list_embers_by_creator(
        &self,
        user_id: &str,
    ) -> Result<Vec<EmberRecord>, GatewayError> {
        self.check(
            "list_embers_by_creator",
            format!("list_embers_by_creator {}", user_id),
        )?;
        Ok(self.my_embers.lock().unwrap().clone())
    }

    async fn create_ember(&self, req: &CreateEmberRequest) -> Result<String, GatewayError> {
        self.check(
            "create_ember",
            format!(
                "create_ember {} {} {} {}",
                req.creator, req.first_name, req.last_name, req.focus
            ),
        )?;
        Ok(self.next_ember_id.lock().unwrap().clone())
    }

    async fn set_ember_voice(&self, ember_id: &str, voice: &str) -> Result<(), GatewayError> {
        self.check("set_ember_voice", format!("set_ember_voice {} {}", ember_id, voice))
    }

    async fn set_flame_identity(
        &self,
        user_id: &str,
        dob: &str,
        email: &str,
        mobile: &str,
    ) -> Result<(), GatewayError> {
        self.check(
            "set_flame_identity",
            format!("set_flame_identity {} {} {} {}", user_id, dob, email, mobile),
        )
    }

    async fn set_ember_wallet(&self, ember_id: &str, payout: &str) -> Result<(), GatewayError> {
        self.check(
            "set_ember_wallet",
            format!("set_ember_wallet {} {}", ember_id, payout),
        )
    }

    async fn set_ember_persona(
        &self,
        ember_id: &str,
        persona: &PersonaText,
    ) -> Result<(), GatewayError> {
        self.check(
            "set_ember_persona",
            format!("set_ember_persona {} {}", ember_id, persona.tagline),
        )
    }

    async fn upload_avatar(&self, ember_id: &str, _image_data: &str) -> Result<(), GatewayError> {
        self.check("upload_avatar", format!("upload_avatar {}", ember_id))
    }

    async fn upload_description(
        &self,
        ember_id: &str,
        _content: &str,
    ) -> Result<(), GatewayError> {
        self.check("upload_description", format!("upload_description {}", ember_id))
    }

    async fn mint_ember_nft(
        &self,
        user_id: &str,
        ember_id: &str,
        wallet: &str,
    ) -> Result<MintReceipt, GatewayError> {
        self.check(
            "mint_ember_nft",
            format!("mint_ember_nft {} {} {}", user_id, ember_id, wallet),
        )?;
        Ok(self.mint_receipt.lock().unwrap().clone())
    }

    async fn finalize_ember(&self, user_id: &str, ember_id: &str) -> Result<(), GatewayError> {
        self.check(
            "finalize_ember",
            format!("finalize_ember {} {}", user_id, ember_id),
        )
    }

    async fn save_training_step(&self, ember_id: &str, step: u8) -> Result<(), GatewayError> {
        self.check(
            "save_training_step",
            format!("save_training_step {} {}", ember_id, step),
        )
    }

    async fn chat_reply(&self, req: &ChatRequest) -> Result<String, GatewayError> {
        self.check("chat_reply", format!("chat_reply {}", req.message))?;
        Ok(self.chat_response.lock().unwrap().clone())
    }
}

/// Scripted wallet signer.
pub struct MockSigner {
    pub address: Mutex<String>,
    /// Operation names ("connect", "sign", "send") that return `Rejected`.
    pub rejecting: Mutex<HashSet<&'static str>>,
    /// Operation names that fail with a generic error.
    pub failing: Mutex<HashSet<&'static str>>,
    pub calls: Mutex<Vec<String>>,
}

impl Default for MockSigner {
    fn default() -> Self {
        Self {
            address: Mutex::new("0xSIGNER".to_string()),
            rejecting: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, op: &'static str) {
        self.rejecting.lock().unwrap().insert(op);
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self, op: &'static str, call: String) -> Result<(), SignerError> {
        self.calls.lock().unwrap().push(call);
        if self.rejecting.lock().unwrap().contains(op) {
            return Err(SignerError::Rejected);
        }
        if self.failing.lock().unwrap().contains(op) {
            return Err(SignerError::Other(format!("{} failed", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl WalletSigner for MockSigner {
    async fn connect(&self) -> Result<String, SignerError> {
        self.check("connect", "connect".to_string())?;
        Ok(self.address.lock().unwrap().clone())
    }

    async fn sign_message(&self, message: &str) -> Result<String, SignerError> {
        self.check("sign", format!("sign {}", message))?;
        Ok("0xsignature".to_string())
    }

    async fn send_transaction(&self, tx: &TxRequest) -> Result<String, SignerError> {
        self.check("send", format!("send {}", tx.to))?;
        Ok("0xtxhash".to_string())
    }
}

/// Recording synthesizer: keeps every utterance with its language tag.
#[derive(Default)]
pub struct MockSynth {
    pub utterances: Mutex<Vec<(String, String)>>,
}

impl MockSynth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.utterances
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }
}

#[async_trait]
impl SpeechSynth for MockSynth {
    async fn speak(&self, text: &str, profile: &VoiceProfile) {
        self.utterances
            .lock()
            .unwrap()
            .push((text.to_string(), profile.lang.clone()));
    }

    fn cancel(&self) {}
}

/// Fully wired engine over scripted collaborators and a throwaway store.
pub struct EngineFixture {
    pub gw: std::sync::Arc<MockGateway>,
    pub signer: std::sync::Arc<MockSigner>,
    pub synth: std::sync::Arc<MockSynth>,
    pub transcript: std::sync::Arc<crate::render::Transcript>,
    pub store: std::sync::Arc<crate::store::LocalStore>,
    pub engine: crate::chat::ChatEngine,
    _dir: tempfile::TempDir,
}

pub fn engine_fixture() -> EngineFixture {
    use std::sync::Arc;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client.redb");
    let store = Arc::new(crate::store::LocalStore::open(Some(path.to_str().unwrap())).unwrap());
    let gw = Arc::new(MockGateway::new());
    let signer = Arc::new(MockSigner::new());
    let synth = Arc::new(MockSynth::new());
    let transcript = Arc::new(crate::render::Transcript::new());
    let engine = crate::chat::ChatEngine::new(
        gw.clone(),
        signer.clone(),
        synth.clone(),
        transcript.clone(),
        store.clone(),
    );
    EngineFixture {
        gw,
        signer,
        synth,
        transcript,
        store,
        engine,
        _dir: dir,
    }
}
