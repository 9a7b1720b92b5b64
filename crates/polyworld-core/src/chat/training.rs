//! ============================================================================
//! Ember Training Flow
//! ============================================================================
//! Ten ordered steps that turn a name and a focus into a finalized, public
//! Ember: name, focus (creates the remote record), avatar capture, voice,
//! Flame identity, payout wallet, persona text, long description upload,
//! NFT mint, and finalize. Steps 1 and 5 are skipped when the cached Flame
//! record already satisfies them. After every advance the step number is
//! persisted to the remote record, so a reload resumes from the server-side
//! `trainingProgress.step` rather than anything held in memory.
//! ============================================================================

use tracing::{info, warn};

use crate::gateway::CreateEmberRequest;
use crate::render::{RenderOp, Role};
use crate::types::{is_hex_address, EmberRecord, FlameRecord, PersonaText};

use super::ChatEngine;

// ============================================================================
// State
// ============================================================================

/// Training position. The avatar capture draft is part of the state rather
/// than a string sentinel; `Done` is terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingStep {
    Name,
    Focus,
    Avatar { draft: Option<String> },
    Voice,
    Identity,
    Wallet,
    Persona,
    Description,
    Mint,
    Finalize,
    Done,
}

impl TrainingStep {
    /// Persisted step number (the remote record only stores integers).
    pub fn number(&self) -> u8 {
        match self {
            TrainingStep::Name => 1,
            TrainingStep::Focus => 2,
            TrainingStep::Avatar { .. } => 3,
            TrainingStep::Voice => 4,
            TrainingStep::Identity => 5,
            TrainingStep::Wallet => 6,
            TrainingStep::Persona => 7,
            TrainingStep::Description => 8,
            TrainingStep::Mint => 9,
            TrainingStep::Finalize | TrainingStep::Done => 10,
        }
    }

    pub fn from_number(n: u8) -> TrainingStep {
        match n {
            0 | 1 => TrainingStep::Name,
            2 => TrainingStep::Focus,
            3 => TrainingStep::Avatar { draft: None },
            4 => TrainingStep::Voice,
            5 => TrainingStep::Identity,
            6 => TrainingStep::Wallet,
            7 => TrainingStep::Persona,
            8 => TrainingStep::Description,
            9 => TrainingStep::Mint,
            _ => TrainingStep::Finalize,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrainingStep::Name => "Your name",
            TrainingStep::Focus => "Focus",
            TrainingStep::Avatar { .. } => "Avatar",
            TrainingStep::Voice => "Voice",
            TrainingStep::Identity => "Flame identity",
            TrainingStep::Wallet => "Payout wallet",
            TrainingStep::Persona => "Persona",
            TrainingStep::Description => "Long description",
            TrainingStep::Mint => "Mint NFT",
            TrainingStep::Finalize => "Finalize",
            TrainingStep::Done => "Complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmberTraining {
    pub step: TrainingStep,
    pub ember_id: Option<String>,
    /// Cached identity record driving the step 1/5 skips.
    pub flame: Option<FlameRecord>,
    pub raw_name: Option<String>,
}

impl EmberTraining {
    fn new() -> Self {
        Self {
            step: TrainingStep::Name,
            ember_id: None,
            flame: None,
            raw_name: None,
        }
    }
}

/// Split "First Rest Of Name" at the first whitespace boundary.
pub(crate) fn split_full_name(raw: &str) -> (String, String) {
    match raw.trim().split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (raw.trim().to_string(), String::new()),
    }
}

/// Four pipe-separated, trimmed persona fields, or None.
pub(crate) fn parse_persona(input: &str) -> Option<PersonaText> {
    let parts: Vec<&str> = input.split('|').map(str::trim).collect();
    if parts.len() < 4 {
        return None;
    }
    Some(PersonaText {
        tagline: parts[0].to_string(),
        long_bio: parts[1].to_string(),
        tone: parts[2].to_string(),
        description: parts[3].to_string(),
    })
}

impl ChatEngine {
    // ========================================================================
    // Entry points
    // ========================================================================

    /// Begin training a brand-new Ember. Step 1 is skipped when the Flame
    /// record already carries a name.
    pub async fn start_ember_training(&mut self) {
        let Some((traveller, _)) = self.ensure_identity() else {
            self.status("Connect a wallet before raising an Ember.");
            return;
        };
        let flame = match self.gateway.flame(&traveller).await {
            Ok(flame) => flame,
            Err(e) => {
                warn!("Flame lookup failed: {}", e);
                None
            }
        };

        let mut training = EmberTraining::new();
        if flame.as_ref().is_some_and(FlameRecord::has_name) {
            training.step = TrainingStep::Focus;
        }
        training.flame = flame;
        let step = training.step.clone();
        self.training = Some(training);
        info!("Ember training started at step {}", step.number());
        self.prompt_for_step(&step);
    }

    /// Resume an in-progress Ember. The persisted `trainingProgress.step`
    /// decides where to continue, after rerouting for data the record is
    /// still missing (no name → step 1, no focus → step 2).
    pub async fn resume_training(&mut self, ember: &EmberRecord) {
        if ember
            .training_progress
            .as_ref()
            .is_some_and(|p| p.complete)
        {
            self.status("✨ Training complete");
            self.bubble(
                Role::Assistant,
                format!("✅ Your Ember \"{}\" is fully trained!", ember.display_name()),
            );
            return;
        }
        let Some((traveller, _)) = self.ensure_identity() else {
            self.status("Connect a wallet before raising an Ember.");
            return;
        };
        let creator = ember.created_by.clone().unwrap_or(traveller);
        let flame = match self.gateway.flame(&creator).await {
            Ok(flame) => flame,
            Err(e) => {
                warn!("Flame lookup failed: {}", e);
                None
            }
        };

        let has_name = flame.as_ref().is_some_and(FlameRecord::has_name);
        let has_identity = flame.as_ref().is_some_and(FlameRecord::has_identity);
        let step = if !has_name {
            TrainingStep::Name
        } else if ember.focus.as_deref().map(str::trim).unwrap_or("").is_empty() {
            TrainingStep::Focus
        } else {
            match TrainingStep::from_number(ember.progress_step()) {
                TrainingStep::Identity if has_identity => TrainingStep::Wallet,
                step => step,
            }
        };

        info!("Resuming training for {} at step {}", ember.id, step.number());
        self.training = Some(EmberTraining {
            step: step.clone(),
            ember_id: Some(ember.id.clone()),
            flame,
            raw_name: None,
        });
        self.status(format!(
            "✨ Continue training — Step {} of 10: {}",
            step.number(),
            step.label()
        ));
        self.prompt_for_step(&step);
    }

    /// Resume whichever of the caller's Embers is mid-training, or start a
    /// new one when none is.
    pub async fn continue_or_start_training(&mut self) {
        let Some((traveller, _)) = self.ensure_identity() else {
            self.status("Connect a wallet before raising an Ember.");
            return;
        };
        match self.directory.my_embers(&traveller).await {
            Ok(mine) => match mine.in_progress {
                Some(ember) => self.resume_training(&ember).await,
                None => self.start_ember_training().await,
            },
            Err(e) => {
                warn!("My-embers load failed: {}", e);
                self.status("⚠️ Could not load your Embers right now.");
            }
        }
    }

    /// Avatar capture callback from the host UI. Only meaningful while the
    /// flow sits at the avatar step.
    pub fn set_avatar_draft(&mut self, image_data: String) {
        if let Some(training) = self.training.as_mut() {
            if matches!(training.step, TrainingStep::Avatar { .. }) {
                training.step = TrainingStep::Avatar {
                    draft: Some(image_data),
                };
                self.status("📸 Avatar captured. Type SAVE to keep it or RETAKE to try again.");
            }
        }
    }

    /// Description file upload callback (step 8 advances out-of-band, not by
    /// typed text).
    pub async fn handle_description_upload(&mut self, content: &str) {
        let Some(id) = self.training_ember_id() else {
            return;
        };
        if !matches!(
            self.training.as_ref().map(|t| &t.step),
            Some(TrainingStep::Description)
        ) {
            return;
        }
        self.bubble(Role::Assistant, "Uploading the long description…");
        match self.gateway.upload_description(&id, content).await {
            Ok(()) => {
                self.surface.render(RenderOp::FileUploadVisible { visible: false });
                self.bubble(Role::Assistant, "✅ File uploaded. Next step: mint your Ember NFT!");
                self.advance_to(TrainingStep::Mint).await;
            }
            Err(e) => {
                warn!("Description upload failed: {}", e);
                self.status("❌ Upload failed. Please retry.");
            }
        }
    }

    // ========================================================================
    // Step routing
    // ========================================================================

    pub(super) async fn handle_training_input(&mut self, text: &str, lower: &str) {
        if lower == "cancel" {
            self.training = None;
            self.status("Cancelled Ember training.");
            self.surface.render(RenderOp::PromptReset);
            self.surface.render(RenderOp::FileUploadVisible { visible: false });
            return;
        }
        self.bubble(Role::User, text);

        let Some(step) = self.training.as_ref().map(|t| t.step.clone()) else {
            return;
        };
        match step {
            TrainingStep::Name => self.training_name(text).await,
            TrainingStep::Focus => self.training_focus(text).await,
            TrainingStep::Avatar { draft } => self.training_avatar(lower, draft).await,
            TrainingStep::Voice => self.training_voice(lower).await,
            TrainingStep::Identity => self.training_identity(text).await,
            TrainingStep::Wallet => self.training_wallet(text, lower).await,
            TrainingStep::Persona => self.training_persona(text).await,
            TrainingStep::Description => {
                self.bubble(
                    Role::Assistant,
                    "📄 Please attach a .txt file with your Ember's detailed description.",
                );
                self.surface.render(RenderOp::FileUploadVisible { visible: true });
            }
            TrainingStep::Mint => self.training_mint(lower).await,
            TrainingStep::Finalize => self.training_finalize(lower).await,
            TrainingStep::Done => {
                self.status("✅ Training already complete!");
            }
        }
    }

    // ========================================================================
    // Individual steps
    // ========================================================================

    async fn training_name(&mut self, text: &str) {
        let name = text.trim();
        if name.is_empty() {
            self.status("Please type your name.");
            return;
        }
        if let Some(training) = self.training.as_mut() {
            training.raw_name = Some(name.to_string());
        }
        self.advance_to(TrainingStep::Focus).await;
    }

    async fn training_focus(&mut self, text: &str) {
        let focus = text.trim().to_string();
        if focus.is_empty() {
            self.status("Please type a focus, e.g. Travel.");
            return;
        }
        let Some((traveller, _)) = self.ensure_identity() else {
            self.status("Connect a wallet before raising an Ember.");
            return;
        };
        let (first_name, last_name) = self
            .training
            .as_ref()
            .and_then(|t| {
                t.flame
                    .as_ref()
                    .filter(|f| f.has_name())
                    .map(|f| {
                        (
                            f.first_name.clone().unwrap_or_default(),
                            f.last_name.clone().unwrap_or_default(),
                        )
                    })
                    .or_else(|| t.raw_name.as_deref().map(split_full_name))
            })
            .unwrap_or_default();

        self.surface.render(RenderOp::BlinkStart {
            text: "🔥 Forging your Ember's soul…".to_string(),
        });
        let request = CreateEmberRequest {
            creator: traveller,
            first_name,
            last_name,
            focus,
        };
        match self.gateway.create_ember(&request).await {
            Ok(id) => {
                info!("Ember created: {}", id);
                self.surface.render(RenderOp::BlinkStop {
                    text: "✅ Your Ember has been created.".to_string(),
                });
                if let Some(training) = self.training.as_mut() {
                    training.ember_id = Some(id);
                }
                self.advance_to(TrainingStep::Avatar { draft: None }).await;
            }
            Err(e) => {
                // stays on step 2 for retry
                warn!("Ember creation failed: {}", e);
                self.surface.render(RenderOp::BlinkStop {
                    text: "Agent creation failed".to_string(),
                });
                self.bubble(Role::Assistant, "❌ Couldn't create the agent. Please try again.");
            }
        }
    }

    async fn training_avatar(&mut self, lower: &str, draft: Option<String>) {
        match lower {
            "retake" => {
                if let Some(training) = self.training.as_mut() {
                    training.step = TrainingStep::Avatar { draft: None };
                }
                self.bubble(Role::Assistant, "Okay, take another shot.");
                if let Some(id) = self.training_ember_id() {
                    self.surface.render(RenderOp::MountAvatarCapture { ember_id: id });
                }
            }
            "save" => {
                let Some(image_data) = draft else {
                    self.status("📷 Capture an avatar first.");
                    return;
                };
                let Some(id) = self.training_ember_id() else {
                    return;
                };
                self.status("⏳ Uploading avatar…");
                match self.gateway.upload_avatar(&id, &image_data).await {
                    Ok(()) => {
                        self.status("✅ Uploaded successfully");
                        self.bubble(
                            Role::System,
                            "✅ Avatar saved. Default background applied.",
                        );
                        self.advance_to(TrainingStep::Voice).await;
                    }
                    Err(e) => {
                        warn!("Avatar upload failed: {}", e);
                        self.status("❌ Upload failed. Please try again.");
                    }
                }
            }
            // anything else is ignored at this sub-step
            _ => {}
        }
    }

    async fn training_voice(&mut self, lower: &str) {
        if lower != "male" && lower != "female" {
            self.bubble(Role::Assistant, "❌ Please type MALE or FEMALE.");
            self.hint("MALE / FEMALE");
            return;
        }
        let Some(id) = self.training_ember_id() else {
            return;
        };
        let voice = lower.to_uppercase();
        match self.gateway.set_ember_voice(&id, &voice).await {
            Ok(()) => {
                self.bubble(Role::Assistant, format!("✅ Voice set to {}.", voice));
                let identity_done = self
                    .training
                    .as_ref()
                    .and_then(|t| t.flame.as_ref())
                    .is_some_and(|f| f.identity_complete || f.has_identity());
                if identity_done {
                    self.bubble(Role::Assistant, "✅ Your Flame identity is already saved.");
                    self.advance_to(TrainingStep::Wallet).await;
                } else {
                    self.advance_to(TrainingStep::Identity).await;
                }
            }
            Err(e) => {
                warn!("Voice save failed: {}", e);
                self.status("Save failed — try again");
                self.bubble(Role::Assistant, "❌ Couldn't save voice. Please try again.");
            }
        }
    }

    async fn training_identity(&mut self, text: &str) {
        // a Flame completed elsewhere skips this step on entry
        if self
            .training
            .as_ref()
            .and_then(|t| t.flame.as_ref())
            .is_some_and(FlameRecord::has_identity)
        {
            self.bubble(Role::Assistant, "✅ Flame identity already exists.");
            self.advance_to(TrainingStep::Wallet).await;
            return;
        }

        let parts: Vec<&str> = text.split(',').map(str::trim).collect();
        if parts.len() < 3 {
            self.bubble(
                Role::Assistant,
                "❌ Please provide DOB, Email, Mobile separated by commas.",
            );
            return;
        }
        let (dob, email, mobile) = (parts[0], parts[1], parts[2]);
        let Some((traveller, _)) = self.ensure_identity() else {
            return;
        };
        match self
            .gateway
            .set_flame_identity(&traveller, dob, email, mobile)
            .await
        {
            Ok(()) => {
                if let Some(training) = self.training.as_mut() {
                    let flame = training.flame.get_or_insert_with(FlameRecord::default);
                    flame.dob = Some(dob.to_string());
                    flame.email = Some(email.to_string());
                    flame.mobile = Some(mobile.to_string());
                    flame.identity_complete = true;
                }
                self.bubble(Role::Assistant, "✅ Flame identity saved.");
                self.advance_to(TrainingStep::Wallet).await;
            }
            Err(e) => {
                warn!("Identity save failed: {}", e);
                self.bubble(Role::Assistant, "❌ Failed to save identity. Try again.");
            }
        }
    }

    async fn training_wallet(&mut self, text: &str, lower: &str) {
        let payout = if lower == "current" {
            match self.session.wallet_address.clone() {
                Some(address) => address,
                None => {
                    self.bubble(Role::Assistant, "❌ No wallet is connected. Paste a 0x address.");
                    return;
                }
            }
        } else {
            let candidate = text.trim().to_string();
            if !is_hex_address(&candidate) {
                self.bubble(
                    Role::Assistant,
                    "❌ Invalid wallet address. Please enter a valid 0x address or type CURRENT.",
                );
                return;
            }
            candidate
        };
        let Some(id) = self.training_ember_id() else {
            return;
        };
        match self.gateway.set_ember_wallet(&id, &payout).await {
            Ok(()) => {
                self.bubble(Role::Assistant, "✅ Wallet saved.");
                self.advance_to(TrainingStep::Persona).await;
            }
            Err(e) => {
                warn!("Wallet save failed: {}", e);
                self.bubble(Role::Assistant, "❌ Failed to save wallet. Try again.");
            }
        }
    }

    async fn training_persona(&mut self, text: &str) {
        let Some(persona) = parse_persona(text) else {
            self.bubble(
                Role::Assistant,
                "❌ Please provide: Tagline | LongBio | Tone | Description",
            );
            return;
        };
        let Some(id) = self.training_ember_id() else {
            return;
        };
        match self.gateway.set_ember_persona(&id, &persona).await {
            Ok(()) => {
                self.bubble(Role::Assistant, "✅ Persona saved.");
                self.advance_to(TrainingStep::Description).await;
            }
            Err(e) => {
                warn!("Persona save failed: {}", e);
                self.bubble(Role::Assistant, "❌ Failed to save persona. Try again.");
            }
        }
    }

    async fn training_mint(&mut self, lower: &str) {
        if lower != "mint" {
            self.bubble(
                Role::Assistant,
                "✨ Type MINT to confirm creating your Ember NFT (50 POLI required).",
            );
            return;
        }
        let Some(id) = self.training_ember_id() else {
            return;
        };
        let Some((traveller, wallet)) = self.ensure_identity() else {
            return;
        };
        self.surface.render(RenderOp::BlinkStart {
            text: "⏳ Minting NFT…".to_string(),
        });
        self.hint("Please wait…");
        match self.gateway.mint_ember_nft(&traveller, &id, &wallet).await {
            Ok(receipt) => {
                info!("Ember NFT minted: {:?}", receipt.token_id);
                self.surface.render(RenderOp::BlinkStop {
                    text: "✅ NFT minted successfully!".to_string(),
                });
                self.bubble(
                    Role::Assistant,
                    "✅ NFT minted. Final step: type FINALIZE to complete training (100 POLI required).",
                );
                self.advance_to(TrainingStep::Finalize).await;
            }
            Err(e) => {
                warn!("Mint failed: {}", e);
                self.surface.render(RenderOp::BlinkStop {
                    text: "Minting failed".to_string(),
                });
                self.bubble(Role::Assistant, "❌ Minting failed. Please try again.");
            }
        }
    }

    async fn training_finalize(&mut self, lower: &str) {
        if lower != "finalize" {
            self.bubble(
                Role::Assistant,
                "Final step: type FINALIZE to complete training (100 POLI required).",
            );
            return;
        }
        let Some(id) = self.training_ember_id() else {
            return;
        };
        let Some((traveller, _)) = self.ensure_identity() else {
            return;
        };
        self.bubble(Role::Assistant, "Finalizing your Ember!");
        self.status("⏳ Finalizing…");
        match self.gateway.finalize_ember(&traveller, &id).await {
            Ok(()) => {
                info!("Ember finalized: {}", id);
                self.bubble(Role::Assistant, "✅ Your Ember is now finalized and public!");
                self.status("Training complete 🎉");
                if let Some(training) = self.training.as_mut() {
                    training.step = TrainingStep::Done;
                }
                self.surface.render(RenderOp::PromptReset);
                self.surface.render(RenderOp::FileUploadVisible { visible: false });
            }
            Err(e) => {
                // stays at finalize for retry
                warn!("Finalize failed: {}", e);
                self.status("Finalization failed.");
                self.bubble(Role::Assistant, format!("❌ Finalization failed: {}", e));
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn training_ember_id(&self) -> Option<String> {
        self.training.as_ref().and_then(|t| t.ember_id.clone())
    }

    /// Move to the next step, persist its number remotely, and emit the
    /// step's prompt.
    async fn advance_to(&mut self, step: TrainingStep) {
        let number = step.number();
        if let Some(training) = self.training.as_mut() {
            training.step = step.clone();
        }
        if let Some(id) = self.training_ember_id() {
            if let Err(e) = self.gateway.save_training_step(&id, number).await {
                warn!("Could not persist training step {}: {}", number, e);
            }
        }
        self.prompt_for_step(&step);
    }

    fn prompt_for_step(&mut self, step: &TrainingStep) {
        match step {
            TrainingStep::Name => {
                self.status("✨ Raising your Ember — Your name");
                self.bubble(Role::Assistant, "Please type your First + Last Name.");
                self.hint("First + Last Name");
            }
            TrainingStep::Focus => {
                self.status("✨ Raising your Ember — Focus");
                self.bubble(
                    Role::Assistant,
                    "Great. Now type your Ember's Focus (e.g. Travel, Finance, Personal).",
                );
                self.hint("Focus");
            }
            TrainingStep::Avatar { .. } => {
                self.status("📷 Next: capture your Ember's avatar");
                self.bubble(
                    Role::Assistant,
                    "Capture an avatar, then type SAVE to keep it or RETAKE to try again.",
                );
                if let Some(id) = self.training_ember_id() {
                    self.surface.render(RenderOp::MountAvatarCapture { ember_id: id });
                }
                self.hint("SAVE / RETAKE");
            }
            TrainingStep::Voice => {
                self.status("🗣️ Choose your Ember's voice");
                self.bubble(
                    Role::Assistant,
                    "Next, choose your Ember's voice. Please type MALE or FEMALE.",
                );
                self.hint("MALE / FEMALE");
            }
            TrainingStep::Identity => {
                self.status("🪪 Complete your Flame identity");
                self.bubble(
                    Role::Assistant,
                    "Now let's complete your Flame identity. Please enter: DOB, Email, Mobile",
                );
                self.hint("1995-10-20, sam@gmail.com, +61 400 000 000");
            }
            TrainingStep::Wallet => {
                self.status("Confirm payout wallet address");
                self.bubble(
                    Role::Assistant,
                    "Do you want to use your current wallet or enter another? Type CURRENT or paste a 0x address.",
                );
                self.hint("CURRENT / 0x address");
            }
            TrainingStep::Persona => {
                self.status("Enter persona details");
                self.bubble(
                    Role::Assistant,
                    "Now define your Ember's persona: Tagline | LongBio | Tone | Description",
                );
                self.hint("Tagline | LongBio | Tone | Description");
            }
            TrainingStep::Description => {
                self.status("Upload the long description file");
                self.bubble(
                    Role::Assistant,
                    "📄 Please attach a .txt file with your Ember's detailed description.",
                );
                self.surface.render(RenderOp::FileUploadVisible { visible: true });
                self.hint("Attach description file");
            }
            TrainingStep::Mint => {
                self.status("Ready to mint NFT");
                self.bubble(
                    Role::Assistant,
                    "✨ Type MINT to confirm creating your Ember NFT (50 POLI required).",
                );
                self.hint("Type MINT");
            }
            TrainingStep::Finalize => {
                self.status("Ready to finalize Ember");
                self.bubble(
                    Role::Assistant,
                    "Final step: type FINALIZE to complete training (100 POLI required).",
                );
                self.hint("Type FINALIZE");
            }
            TrainingStep::Done => {
                self.status("Training complete 🎉");
            }
        }
    }
}
