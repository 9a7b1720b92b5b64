//! ============================================================================
//! Polyworld Core — Conversational Operator Engine
//! ============================================================================
//! The engine behind the Polyworld chat surface: a single-line-at-a-time
//! state machine that routes typed input between token wizards (buy POLI,
//! swap POLI to POLISTAR, transfer POLISTAR), the ten-step Ember training
//! flow, a small command vocabulary, and free chat relayed to the remote
//! gateway through the active persona.
//!
//! The crate is host-agnostic: everything user-visible is emitted as
//! [`render::RenderOp`] values through a [`render::ChatSurface`], everything
//! audible goes through a [`voice::VoiceRouter`], wallet interactions go
//! through a [`signer::WalletSigner`], and all remote calls go through the
//! [`gateway::Gateway`] trait. Local state (device identity, preferences,
//! reward flags) persists in a [`store::LocalStore`] backed by redb.
//! ============================================================================

pub mod balances;
pub mod chat;
pub mod config;
pub mod directory;
pub mod gateway;
pub mod render;
pub mod session;
pub mod signer;
pub mod store;
pub mod timers;
pub mod types;
pub mod voice;

#[cfg(test)]
pub(crate) mod testutil;

pub use chat::{ChatEngine, Command, ProcessOutcome};
pub use gateway::{Gateway, GatewayError, HttpGateway, StaticToken, TokenProvider};
pub use render::{ChatSurface, RenderOp, Role, Transcript};
pub use session::{SessionContext, Speaker};
pub use signer::{SignerError, TxRequest, WalletSigner};
pub use store::LocalStore;
pub use timers::{BurnLoop, Milestone, RewardScheduler};
pub use types::{BalanceSnapshot, EmberRecord, FlameRecord, PersonaText, PolyUser};
pub use voice::{SpeechSynth, VoiceProfile, VoiceRouter};
