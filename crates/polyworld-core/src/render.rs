//! ============================================================================
//! Chat Surface — Typed Render Channel
//! ============================================================================
//! The engine never draws anything itself; every user-visible effect is a
//! `RenderOp` handed to a `ChatSurface`. A terminal front-end prints them, a
//! GUI maps them onto widgets, and tests record them with [`Transcript`].
//! ============================================================================

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Who a chat bubble belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Compact card for the Ember gallery and the My-Embers panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmberCard {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tagline: Option<String>,
    pub minted: bool,
    pub in_training: bool,
}

/// One user-visible effect emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "op")]
pub enum RenderOp {
    /// Append a chat bubble.
    Bubble { role: Role, text: String },
    /// Replace the one-line status ticker.
    Status { text: String },
    /// Start a blinking status line (long-running remote work).
    BlinkStart { text: String },
    /// Stop the blinking status line, leaving `text` behind.
    BlinkStop { text: String },
    /// Set the input placeholder hint.
    PromptHint { text: String },
    /// Restore the default input placeholder.
    PromptReset,
    /// Show or hide the "thinking" indicator for the named speaker.
    Thinking { speaker: String, on: bool },
    /// Render a QR payload (device login URL).
    Qr { payload: String },
    /// Camera pane visibility.
    CameraVisible { visible: bool },
    /// Chat pane visibility.
    ChatVisible { visible: bool },
    /// Mount the avatar capture affordance for the Ember in training.
    MountAvatarCapture { ember_id: String },
    /// Show or hide the description file-upload affordance.
    FileUploadVisible { visible: bool },
    /// Present the Ember gallery.
    EmberGallery { cards: Vec<EmberCard>, offer_create: bool },
    /// Swap the visible host to the selected Ember.
    SelectEmber { id: String, name: String },
    /// Restore the default Polistar host.
    RestoreHost,
    /// Show (or clear, with None) the wallet address badge.
    ShowAddress { short: Option<String> },
    /// Update a labelled balance panel (POLISTAR, WITHDRAWABLE, POLI, USDT).
    BalanceUpdate { label: String, amount: f64 },
}

/// Sink for render operations. Implementations must be cheap; the engine
/// calls this inline while processing input.
pub trait ChatSurface: Send + Sync {
    fn render(&self, op: RenderOp);
}

/// Recording surface used by tests and by the CLI transcript printer.
#[derive(Default)]
pub struct Transcript {
    ops: Mutex<Vec<RenderOp>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<RenderOp> {
        self.ops.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut ops) = self.ops.lock() {
            ops.clear();
        }
    }

    /// All bubble texts for the given role, in order.
    pub fn bubbles(&self, role: Role) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RenderOp::Bubble { role: r, text } if r == role => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Last status-line text, if any was emitted.
    pub fn last_status(&self) -> Option<String> {
        self.ops().into_iter().rev().find_map(|op| match op {
            RenderOp::Status { text } => Some(text),
            RenderOp::BlinkStop { text } => Some(text),
            _ => None,
        })
    }

    pub fn contains_bubble(&self, needle: &str) -> bool {
        self.ops().iter().any(|op| match op {
            RenderOp::Bubble { text, .. } => text.contains(needle),
            _ => false,
        })
    }
}

impl ChatSurface for Transcript {
    fn render(&self, op: RenderOp) {
        if let Ok(mut ops) = self.ops.lock() {
            ops.push(op);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_records_in_order() {
        let t = Transcript::new();
        t.render(RenderOp::Status { text: "one".into() });
        t.render(RenderOp::Bubble { role: Role::User, text: "hi".into() });
        t.render(RenderOp::Status { text: "two".into() });

        assert_eq!(t.ops().len(), 3);
        assert_eq!(t.last_status().as_deref(), Some("two"));
        assert_eq!(t.bubbles(Role::User), vec!["hi".to_string()]);
    }

    #[test]
    fn test_contains_bubble() {
        let t = Transcript::new();
        t.render(RenderOp::Bubble {
            role: Role::Assistant,
            text: "✅ Transfer complete".into(),
        });
        assert!(t.contains_bubble("Transfer complete"));
        assert!(!t.contains_bubble("nope"));
    }
}
