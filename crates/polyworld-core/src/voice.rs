//! ============================================================================
//! Voice I/O — Synthesis Routing and Recognition Control
//! ============================================================================
//! Speech output goes through a `SpeechSynth` implementation chosen by the
//! host process. The `VoiceRouter` decides WHICH voice speaks (the default
//! Polistar host or the active Ember's stored profile) and whether speech is
//! enabled at all. `RecognitionControl` is the listening-state machine:
//! recognition is suspended while synthesis plays so the microphone does not
//! hear the app talk to itself, and restarts automatically when the
//! recognizer ends unexpectedly.
//! ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::types::VoiceSpec;

// ============================================================================
// Voice profiles
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenderHint {
    Male,
    Female,
}

/// Normalized synthesis parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceProfile {
    pub lang: String,
    /// Playback rate, clamped to 0.1..=4.0.
    pub rate: f64,
    /// Playback pitch, clamped to 0.0..=2.0.
    pub pitch: f64,
    pub gender: Option<GenderHint>,
    pub voice_name: Option<String>,
}

impl VoiceProfile {
    /// The default Polistar host voice.
    pub fn polistar() -> Self {
        Self {
            lang: "en-GB".to_string(),
            rate: 1.1,
            pitch: 1.1,
            gender: Some(GenderHint::Female),
            voice_name: None,
        }
    }

    /// Fallback Ember voice when a record carries no descriptor.
    pub fn ember_default() -> Self {
        Self {
            lang: "en-US".to_string(),
            rate: 1.0,
            pitch: 1.0,
            gender: None,
            voice_name: None,
        }
    }

    /// Normalize a stored descriptor. Stored pitch is a semitone offset in
    /// -20..20; playback pitch is `1 + offset / 20`, clamped to 0..2.
    pub fn from_spec(spec: &VoiceSpec) -> Self {
        let rate = spec.speaking_rate.unwrap_or(1.0).clamp(0.1, 4.0);
        let pitch = (1.0 + spec.pitch.unwrap_or(0.0) / 20.0).clamp(0.0, 2.0);
        let gender = spec.ssml_gender.as_deref().and_then(|g| {
            if g.eq_ignore_ascii_case("male") {
                Some(GenderHint::Male)
            } else if g.eq_ignore_ascii_case("female") {
                Some(GenderHint::Female)
            } else {
                None
            }
        });
        Self {
            lang: spec
                .language_code
                .clone()
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| "en-US".to_string()),
            rate,
            pitch,
            gender,
            voice_name: spec.name.clone(),
        }
    }
}

// ============================================================================
// Synthesis
// ============================================================================

/// Text-to-speech backend. `speak` resolves when playback finishes.
#[async_trait]
pub trait SpeechSynth: Send + Sync {
    async fn speak(&self, text: &str, profile: &VoiceProfile);

    /// Cut off any in-flight utterance.
    fn cancel(&self);
}

/// Routes utterances to the host voice or the active Ember voice. Cheap to
/// clone; all clones share the enabled flag and the Ember profile so the
/// burn loop can speak through the same voice the engine configured.
#[derive(Clone)]
pub struct VoiceRouter {
    synth: Arc<dyn SpeechSynth>,
    ember: Arc<RwLock<Option<VoiceProfile>>>,
    enabled: Arc<AtomicBool>,
}

impl VoiceRouter {
    pub fn new(synth: Arc<dyn SpeechSynth>, enabled: bool) -> Self {
        Self {
            synth,
            ember: Arc::new(RwLock::new(None)),
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.synth.cancel();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Install the active Ember's voice, or clear it with None.
    pub fn set_ember_voice(&self, spec: Option<&VoiceSpec>) {
        let profile = spec.map(VoiceProfile::from_spec);
        debug!("Ember voice set: {:?}", profile);
        if let Ok(mut slot) = self.ember.write() {
            *slot = profile;
        }
    }

    pub async fn speak_as_polistar(&self, text: &str) {
        if self.is_enabled() {
            self.synth.speak(text, &VoiceProfile::polistar()).await;
        }
    }

    pub async fn speak_as_ember(&self, text: &str) {
        if !self.is_enabled() {
            return;
        }
        let profile = self
            .ember
            .read()
            .ok()
            .and_then(|slot| slot.clone())
            .unwrap_or_else(VoiceProfile::ember_default);
        self.synth.speak(text, &profile).await;
    }
}

// ============================================================================
// Recognition control
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// User toggled the microphone on.
    UserStart,
    /// User toggled the microphone off.
    UserStop,
    /// Synthesis is about to play.
    TtsStart,
    /// Synthesis finished.
    TtsEnd,
    /// The recognizer stopped on its own.
    Ended,
}

/// What the host should do with its recognizer after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionAction {
    None,
    Start,
    Stop,
}

/// Listening-state machine. The host owns the actual recognizer and applies
/// the returned actions.
#[derive(Debug, Default)]
pub struct RecognitionControl {
    listening: bool,
    suspended_for_tts: bool,
}

impl RecognitionControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn handle(&mut self, event: RecognitionEvent) -> RecognitionAction {
        match event {
            RecognitionEvent::UserStart => {
                self.listening = true;
                self.suspended_for_tts = false;
                RecognitionAction::Start
            }
            RecognitionEvent::UserStop => {
                self.listening = false;
                RecognitionAction::Stop
            }
            RecognitionEvent::TtsStart => {
                self.suspended_for_tts = true;
                if self.listening {
                    RecognitionAction::Stop
                } else {
                    RecognitionAction::None
                }
            }
            RecognitionEvent::TtsEnd => {
                self.suspended_for_tts = false;
                if self.listening {
                    RecognitionAction::Start
                } else {
                    RecognitionAction::None
                }
            }
            RecognitionEvent::Ended => {
                // Unexpected end while the user still wants to listen:
                // restart, unless we are deliberately quiet for TTS.
                if self.listening && !self.suspended_for_tts {
                    RecognitionAction::Start
                } else {
                    RecognitionAction::None
                }
            }
        }
    }
}
