//! ============================================================================
//! ChatEngine — Conversation State Machine
//! ============================================================================
//! One `process(text)` entry point per submitted line. Routing priority:
//!
//!   1. active token wizard        (buy / swap / transfer)
//!   2. active Ember training flow
//!   3. command vocabulary          (exact match, case-insensitive)
//!   4. free chat relayed to the backend through the active persona
//!
//! A case-insensitive "cancel" inside a wizard or training flow resets it
//! before any other rule runs. The engine owns all conversational state;
//! everything user-visible goes out through the `ChatSurface`, everything
//! remote through the `Gateway`, and everything audible through the
//! `VoiceRouter`.
//! ============================================================================

pub mod training;
pub mod wizard;

pub use training::{EmberTraining, TrainingStep};
pub use wizard::{parse_amount, WizardAction, WizardMode};

use std::sync::Arc;

use tracing::{info, warn};

use crate::balances;
use crate::directory::{card_for, EmberDirectory};
use crate::gateway::{ChatRequest, Gateway, CHAT_FALLBACK_REPLY};
use crate::render::{ChatSurface, EmberCard, RenderOp, Role};
use crate::session::{SessionContext, Speaker};
use crate::signer::WalletSigner;
use crate::store::LocalStore;
use crate::timers::{BurnLoop, BurnSession, RewardScheduler};
use crate::voice::{SpeechSynth, VoiceRouter};

/// Result of one `process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Input was consumed (wizard step, command, or chat relay).
    Handled,
    /// A previous `process` call is still running; input was dropped.
    Busy,
    /// Blank input, nothing to do.
    Empty,
}

// ============================================================================
// Command vocabulary
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    HideCamera,
    ShowCamera,
    MobileLogin,
    ClearAddress,
    HideChat,
    ShowChat,
    BuyPoli,
    SwapPolistar,
    TransferPolistar,
    ShowEmbers,
    ConnectMetamask,
    ShowMyEmbers,
    PolistarBack,
    Pause,
}

impl Command {
    /// Exact match against trimmed, lowercased input with inner whitespace
    /// removed, so "buy poli" and "buypoli" both work.
    pub fn parse(input: &str) -> Option<Command> {
        let key: String = input
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        Some(match key.as_str() {
            "hidecamera" => Command::HideCamera,
            "showcamera" => Command::ShowCamera,
            "mobilelogin" => Command::MobileLogin,
            "clearaddress" => Command::ClearAddress,
            "hidechat" => Command::HideChat,
            "showchat" => Command::ShowChat,
            "buypoli" => Command::BuyPoli,
            "swappolistar" | "buypolistar" => Command::SwapPolistar,
            "transferpolistar" => Command::TransferPolistar,
            "showembers" => Command::ShowEmbers,
            "connectmetamask" | "metamask" => Command::ConnectMetamask,
            "showmyembers" => Command::ShowMyEmbers,
            "polistarback" | "stop" => Command::PolistarBack,
            "pause" => Command::Pause,
            _ => return None,
        })
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct ChatEngine {
    pub(crate) gateway: Arc<dyn Gateway>,
    pub(crate) signer: Arc<dyn WalletSigner>,
    pub(crate) surface: Arc<dyn ChatSurface>,
    pub(crate) voice: VoiceRouter,
    pub(crate) store: Arc<LocalStore>,
    pub(crate) directory: EmberDirectory,
    pub(crate) session: SessionContext,
    pub(crate) rewards: RewardScheduler,
    pub(crate) burn: BurnLoop,
    pub(crate) action: Option<WizardAction>,
    pub(crate) training: Option<EmberTraining>,
    in_flight: bool,
}

impl ChatEngine {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        signer: Arc<dyn WalletSigner>,
        synth: Arc<dyn SpeechSynth>,
        surface: Arc<dyn ChatSurface>,
        store: Arc<LocalStore>,
    ) -> Self {
        let tts = store.tts_enabled().unwrap_or(true);
        let voice = VoiceRouter::new(synth, tts);
        let rewards = RewardScheduler::new(
            gateway.clone(),
            surface.clone(),
            voice.clone(),
            store.clone(),
        );
        let burn = BurnLoop::new(gateway.clone(), surface.clone(), voice.clone());
        Self {
            directory: EmberDirectory::new(gateway.clone()),
            gateway,
            signer,
            surface,
            voice,
            store,
            session: SessionContext::new(),
            rewards,
            burn,
            action: None,
            training: None,
            in_flight: false,
        }
    }

    /// Burn-loop handle for the host to drive (spawn / visibility events).
    pub fn burn_loop(&self) -> BurnLoop {
        self.burn.clone()
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn voice_router(&self) -> VoiceRouter {
        self.voice.clone()
    }

    pub fn set_tts_enabled(&self, enabled: bool) {
        self.voice.set_enabled(enabled);
        if let Err(e) = self.store.set_tts_enabled(enabled) {
            warn!("Could not persist TTS preference: {}", e);
        }
    }

    /// Tab hidden/visible: hold or resume the burn loop.
    pub fn set_visible(&self, visible: bool) {
        if visible {
            self.burn.resume();
        } else {
            self.burn.pause();
        }
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    pub async fn process(&mut self, input: &str) -> ProcessOutcome {
        let text = input.trim().to_string();
        if text.is_empty() {
            return ProcessOutcome::Empty;
        }
        if self.in_flight {
            return ProcessOutcome::Busy;
        }
        self.in_flight = true;
        self.dispatch(&text).await;
        self.in_flight = false;
        ProcessOutcome::Handled
    }

    async fn dispatch(&mut self, text: &str) {
        let lower = text.to_lowercase();
        if self.action.is_some() {
            self.handle_wizard_input(text, &lower).await;
            return;
        }
        if self.training.is_some() {
            self.handle_training_input(text, &lower).await;
            return;
        }
        if let Some(command) = Command::parse(&lower) {
            self.run_command(command).await;
            return;
        }
        self.relay_chat(text).await;
    }

    /// UI-affordance entry point: runs a command bypassing free text.
    pub async fn run_command(&mut self, command: Command) {
        info!("Command: {:?}", command);
        match command {
            Command::HideCamera => {
                self.surface.render(RenderOp::CameraVisible { visible: false });
                self.voice.speak_as_polistar("The camera is now hidden.").await;
            }
            Command::ShowCamera => {
                self.surface.render(RenderOp::CameraVisible { visible: true });
                self.voice.speak_as_polistar("The camera is back.").await;
            }
            Command::MobileLogin => self.device_login().await,
            Command::ClearAddress => self.clear_address(),
            Command::HideChat => {
                self.surface.render(RenderOp::ChatVisible { visible: false });
            }
            Command::ShowChat => {
                self.surface.render(RenderOp::ChatVisible { visible: true });
            }
            Command::BuyPoli => self.start_buy_poli().await,
            Command::SwapPolistar => self.start_swap_polistar().await,
            Command::TransferPolistar => self.start_transfer_polistar().await,
            Command::ShowEmbers => self.show_embers().await,
            Command::ConnectMetamask => self.connect_metamask().await,
            Command::ShowMyEmbers => self.show_my_embers().await,
            Command::PolistarBack => self.dismiss_ember().await,
            Command::Pause => self.pause_ember().await,
        }
    }

    // ========================================================================
    // Free chat relay
    // ========================================================================

    async fn relay_chat(&mut self, text: &str) {
        self.surface.render(RenderOp::Bubble {
            role: Role::User,
            text: text.to_string(),
        });
        let speaker_name = self.session.speaker.display_name().to_string();
        self.surface.render(RenderOp::Thinking {
            speaker: speaker_name.clone(),
            on: true,
        });

        let active = self.directory.active().cloned();
        let request = ChatRequest {
            message: text.to_string(),
            session_id: self.session.chat_session_id(),
            user_address: self.session.wallet_address.clone(),
            ember_id: active.as_ref().map(|e| e.id.clone()),
            ember_name: active.as_ref().map(|e| e.display_name().to_string()),
            persona: active.as_ref().and_then(|e| e.persona.clone()),
        };
        let reply = match self.gateway.chat_reply(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Chat relay failed: {}", e);
                CHAT_FALLBACK_REPLY.to_string()
            }
        };

        self.surface.render(RenderOp::Thinking {
            speaker: speaker_name,
            on: false,
        });
        self.surface.render(RenderOp::Bubble {
            role: Role::Assistant,
            text: reply.clone(),
        });
        match self.session.speaker {
            Speaker::Polistar => self.voice.speak_as_polistar(&reply).await,
            Speaker::Ember { .. } => self.voice.speak_as_ember(&reply).await,
        }

        if !self.session.first_response_sent {
            self.session.first_response_sent = true;
            self.bootstrap_identity().await;
        }
    }

    /// First free-chat message: load or generate the device identity, show
    /// the address badge, refresh balances, and arm the welcome rewards on a
    /// fresh (zero-balance) account.
    async fn bootstrap_identity(&mut self) {
        if let Err(e) = self.session.load_or_create_user(&self.store) {
            warn!("Identity bootstrap failed: {}", e);
            return;
        }
        self.surface.render(RenderOp::ShowAddress {
            short: self.session.short_address(),
        });

        let (Some(traveller), Some(address)) = (
            self.session.traveller_id.clone(),
            self.session.wallet_address.clone(),
        ) else {
            return;
        };

        let snapshot = balances::refresh_polistar(&self.gateway, &self.surface, &traveller).await;
        balances::refresh_onchain(&self.gateway, &self.surface, &address).await;

        match snapshot {
            Some(snap) if snap.balance == 0.0 => {
                self.surface.render(RenderOp::Status {
                    text: "✨ Poly is preparing your gift…".to_string(),
                });
                self.rewards.spawn_all(traveller, address);
            }
            Some(_) => {
                self.surface.render(RenderOp::Status {
                    text: "Your balance has been restored.".to_string(),
                });
            }
            None => {}
        }
    }

    /// Make sure a device identity exists; used by flows that act before any
    /// free chat happened. Returns (traveller_id, wallet_address).
    pub(crate) fn ensure_identity(&mut self) -> Option<(String, String)> {
        if self.session.traveller_id.is_none() {
            if let Err(e) = self.session.load_or_create_user(&self.store) {
                warn!("Could not load identity: {}", e);
                return None;
            }
            self.surface.render(RenderOp::ShowAddress {
                short: self.session.short_address(),
            });
        }
        match (
            self.session.traveller_id.clone(),
            self.session.wallet_address.clone(),
        ) {
            (Some(t), Some(w)) => Some((t, w)),
            _ => None,
        }
    }

    // ========================================================================
    // Login and identity commands
    // ========================================================================

    async fn connect_metamask(&mut self) {
        self.surface.render(RenderOp::BlinkStart {
            text: "Initiating MetaMask connection…".to_string(),
        });

        let result = async {
            let address = self.signer.connect().await?;
            let message = format!("Sign in to Polyworld as {}", address);
            let signature = self.signer.sign_message(&message).await?;
            Ok::<_, crate::signer::SignerError>((address, message, signature))
        }
        .await;

        let (address, message, signature) = match result {
            Ok(v) => v,
            Err(e) => {
                warn!("MetaMask connection failed: {}", e);
                self.surface.render(RenderOp::BlinkStop {
                    text: "MetaMask connection failed. Please try again.".to_string(),
                });
                return;
            }
        };

        if let Err(e) = self
            .gateway
            .authenticate_wallet(&address, &message, &signature)
            .await
        {
            warn!("Wallet authentication failed: {}", e);
            self.surface.render(RenderOp::BlinkStop {
                text: "MetaMask connection failed. Please try again.".to_string(),
            });
            return;
        }

        let changed = self.session.wallet_address.as_deref() != Some(address.as_str());
        let was_generated = self
            .session
            .user
            .as_ref()
            .map(|u| u.generated)
            .unwrap_or(true);
        if changed || was_generated {
            if let Err(e) = self.gateway.merge_sessions(&address, &address).await {
                warn!("Session merge failed: {}", e);
            }
            if let Err(e) = self.session.adopt_wallet(&self.store, &address) {
                warn!("Could not persist wallet: {}", e);
            }
        }

        info!("MetaMask authenticated: {}", address);
        self.surface.render(RenderOp::BlinkStop {
            text: "MetaMask is authenticated!".to_string(),
        });
        self.surface.render(RenderOp::ShowAddress {
            short: self.session.short_address(),
        });
        if let Some(traveller) = self.session.traveller_id.clone() {
            balances::refresh_polistar(&self.gateway, &self.surface, &traveller).await;
        }
        balances::refresh_onchain(&self.gateway, &self.surface, &address).await;
    }

    async fn device_login(&mut self) {
        let Some((traveller, _)) = self.ensure_identity() else {
            self.surface.render(RenderOp::Status {
                text: "Could not prepare a mobile login right now.".to_string(),
            });
            return;
        };
        match self.gateway.create_device_login(&traveller).await {
            Ok(url) => {
                self.surface.render(RenderOp::Qr { payload: url });
                self.surface.render(RenderOp::Status {
                    text: "📱 Scan this QR code to continue on your phone.".to_string(),
                });
            }
            Err(e) => {
                warn!("Device login failed: {}", e);
                self.surface.render(RenderOp::Status {
                    text: "Could not prepare a mobile login right now.".to_string(),
                });
            }
        }
    }

    fn clear_address(&mut self) {
        if let Err(e) = self.session.clear_identity(&self.store) {
            warn!("Could not clear identity: {}", e);
        }
        self.surface.render(RenderOp::ShowAddress { short: None });
        self.surface.render(RenderOp::Status {
            text: "Address cleared.".to_string(),
        });
    }

    // ========================================================================
    // Ember directory commands
    // ========================================================================

    async fn show_embers(&mut self) {
        if let Err(e) = self.directory.ensure_loaded().await {
            warn!("Ember gallery load failed: {}", e);
            self.surface.render(RenderOp::Status {
                text: "⚠️ Could not load the Ember gallery right now.".to_string(),
            });
            return;
        }
        self.surface.render(RenderOp::EmberGallery {
            cards: self.directory.gallery_cards(),
            offer_create: false,
        });
        self.voice
            .speak_as_polistar("Here are the Embers available to guide you.")
            .await;
    }

    async fn show_my_embers(&mut self) {
        let Some((traveller, _)) = self.ensure_identity() else {
            self.surface.render(RenderOp::Status {
                text: "Connect a wallet to see your Embers.".to_string(),
            });
            return;
        };
        let mine = match self.directory.my_embers(&traveller).await {
            Ok(mine) => mine,
            Err(e) => {
                warn!("My-embers load failed: {}", e);
                self.surface.render(RenderOp::Status {
                    text: "⚠️ Could not load your Embers right now.".to_string(),
                });
                return;
            }
        };
        let mut cards: Vec<EmberCard> = mine.trained.iter().map(card_for).collect();
        if let Some(wip) = &mine.in_progress {
            cards.push(card_for(wip));
        }
        self.surface.render(RenderOp::EmberGallery {
            cards,
            offer_create: mine.offers_create(),
        });
        self.surface.render(RenderOp::Status {
            text: "🔥 Your Embers".to_string(),
        });
    }

    /// Selection affordance from the gallery: switch the active persona.
    pub async fn select_ember(&mut self, id: &str) {
        if let Err(e) = self.directory.ensure_loaded().await {
            warn!("Ember gallery load failed: {}", e);
            return;
        }
        let Some(ember) = self.directory.select(id).cloned() else {
            self.surface.render(RenderOp::Status {
                text: "That Ember isn't available.".to_string(),
            });
            return;
        };

        // Voice first, so the greeting already speaks in the new voice.
        self.voice.set_ember_voice(ember.voice.as_ref());
        let name = ember.display_name().to_string();
        self.session.speaker = Speaker::Ember {
            id: ember.id.clone(),
            name: name.clone(),
        };
        self.surface.render(RenderOp::SelectEmber {
            id: ember.id.clone(),
            name: name.clone(),
        });

        let greeting = ember
            .greeting
            .clone()
            .filter(|g| !g.trim().is_empty())
            .unwrap_or_else(|| {
                let tagline = ember
                    .persona
                    .as_ref()
                    .map(|p| p.tagline.trim())
                    .filter(|t| !t.is_empty())
                    .map(|t| format!(" {}", t))
                    .unwrap_or_default();
                format!("Hi, I'm {}.{}", name, tagline)
            });
        self.surface.render(RenderOp::Bubble {
            role: Role::Assistant,
            text: greeting.clone(),
        });
        self.voice.speak_as_ember(&greeting).await;

        if let Some((traveller, wallet)) = self.ensure_identity() {
            self.burn.set_session(BurnSession {
                traveller_id: traveller,
                wallet_address: wallet,
                ember_name: name,
            });
        }
    }

    async fn dismiss_ember(&mut self) {
        self.burn.clear_session();
        self.directory.clear_active();
        self.voice.set_ember_voice(None);
        self.session.speaker = Speaker::Polistar;
        self.surface.render(RenderOp::RestoreHost);
        self.voice
            .speak_as_polistar("Polistar has returned. I'll guide you again.")
            .await;
    }

    async fn pause_ember(&mut self) {
        if self.session.speaker.is_polistar() {
            return;
        }
        self.burn.clear_session();
        self.voice.speak_as_ember("We'll pause our conversation here.").await;
        self.surface.render(RenderOp::Status {
            text: "⏸️ Conversation paused.".to_string(),
        });
    }

    // ========================================================================
    // Shared render shorthand for the wizard/training submodules
    // ========================================================================

    pub(crate) fn status(&self, text: impl Into<String>) {
        self.surface.render(RenderOp::Status { text: text.into() });
    }

    pub(crate) fn bubble(&self, role: Role, text: impl Into<String>) {
        self.surface.render(RenderOp::Bubble {
            role,
            text: text.into(),
        });
    }

    pub(crate) fn hint(&self, text: impl Into<String>) {
        self.surface.render(RenderOp::PromptHint { text: text.into() });
    }
}
