//! ============================================================================
//! Background Timers — Reward Milestones and the Ember Burn Loop
//! ============================================================================
//! Two timed behaviors run beside the conversation:
//!
//! - Reward milestones: three one-shot POLISTAR grants (signup gift, then
//!   two presence rewards). Each is guarded by a persisted flag so a
//!   re-rendered front-end cannot double-grant.
//! - Burn loop: while an Ember session is active, 1 POLISTAR is burned every
//!   30 seconds. The loop pauses when the surface is hidden and survives
//!   individual burn failures.
//! ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::balances;
use crate::gateway::Gateway;
use crate::render::{ChatSurface, RenderOp};
use crate::store::LocalStore;
use crate::voice::VoiceRouter;

pub const BURN_INTERVAL: Duration = Duration::from_secs(30);
pub const BURN_AMOUNT: f64 = 1.0;

// ============================================================================
// Reward milestones
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    /// Welcome gift, 10 seconds after the first empty-balance sighting.
    Signup,
    /// Still here after a minute.
    Attention,
    /// Still here after three minutes.
    Presence,
}

impl Milestone {
    pub const ALL: [Milestone; 3] = [Milestone::Signup, Milestone::Attention, Milestone::Presence];

    pub fn flag_key(&self) -> &'static str {
        match self {
            Milestone::Signup => "signup",
            Milestone::Attention => "attention",
            Milestone::Presence => "presence",
        }
    }

    pub fn delay(&self) -> Duration {
        match self {
            Milestone::Signup => Duration::from_secs(10),
            Milestone::Attention => Duration::from_secs(60),
            Milestone::Presence => Duration::from_secs(180),
        }
    }

    pub fn amount(&self) -> f64 {
        match self {
            Milestone::Signup => 5.0,
            Milestone::Attention => 10.0,
            Milestone::Presence => 10.0,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Milestone::Signup => "Signup gift",
            Milestone::Attention => "One minute together",
            Milestone::Presence => "Three minutes together",
        }
    }

    fn status_line(&self) -> String {
        format!("🎁 You received {} POLISTAR!", crate::types::format_amount(self.amount()))
    }

    fn speech_line(&self) -> &'static str {
        match self {
            Milestone::Signup => "I've sent you five Polistar as a welcome gift.",
            Milestone::Attention => "Ten more Polistar, for staying with me.",
            Milestone::Presence => "Another ten Polistar. Thank you for your time.",
        }
    }
}

/// Cheap handle; clones share state.
#[derive(Clone)]
pub struct RewardScheduler {
    inner: Arc<RewardInner>,
}

struct RewardInner {
    gateway: Arc<dyn Gateway>,
    surface: Arc<dyn ChatSurface>,
    voice: VoiceRouter,
    store: Arc<LocalStore>,
}

impl RewardScheduler {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        surface: Arc<dyn ChatSurface>,
        voice: VoiceRouter,
        store: Arc<LocalStore>,
    ) -> Self {
        Self {
            inner: Arc::new(RewardInner {
                gateway,
                surface,
                voice,
                store,
            }),
        }
    }

    /// Grant a milestone once. Returns true when the mint actually happened.
    pub async fn grant(&self, milestone: Milestone, traveller_id: &str, address: &str) -> bool {
        let inner = &self.inner;
        match inner.store.milestone_granted(milestone.flag_key()) {
            Ok(true) => {
                debug!("Milestone {} already granted", milestone.flag_key());
                return false;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Milestone flag read failed: {}", e);
                return false;
            }
        }

        if let Err(e) = inner
            .gateway
            .reward_polistar(traveller_id, address, milestone.amount(), milestone.reason())
            .await
        {
            warn!("Milestone {} mint failed: {}", milestone.flag_key(), e);
            return false;
        }

        if let Err(e) = inner.store.mark_milestone(milestone.flag_key()) {
            warn!("Milestone flag write failed: {}", e);
        }

        info!("Granted milestone {}: +{}", milestone.flag_key(), milestone.amount());
        inner.surface.render(RenderOp::Status {
            text: milestone.status_line(),
        });
        inner.voice.speak_as_polistar(milestone.speech_line()).await;
        balances::refresh_polistar(&inner.gateway, &inner.surface, traveller_id).await;
        true
    }

    /// Arm all three milestones for this identity.
    pub fn spawn_all(&self, traveller_id: String, address: String) -> Vec<JoinHandle<()>> {
        Milestone::ALL
            .iter()
            .map(|&milestone| {
                let scheduler = self.clone();
                let traveller = traveller_id.clone();
                let address = address.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(milestone.delay()).await;
                    scheduler.grant(milestone, &traveller, &address).await;
                })
            })
            .collect()
    }
}

// ============================================================================
// Ember burn loop
// ============================================================================

#[derive(Debug, Clone)]
pub struct BurnSession {
    pub traveller_id: String,
    pub wallet_address: String,
    pub ember_name: String,
}

/// Cheap handle; clones share the running flag and session slot, so the
/// engine controls a loop spawned by the host process.
#[derive(Clone)]
pub struct BurnLoop {
    inner: Arc<BurnInner>,
}

struct BurnInner {
    gateway: Arc<dyn Gateway>,
    surface: Arc<dyn ChatSurface>,
    voice: VoiceRouter,
    running: AtomicBool,
    session: Mutex<Option<BurnSession>>,
}

impl BurnLoop {
    pub fn new(gateway: Arc<dyn Gateway>, surface: Arc<dyn ChatSurface>, voice: VoiceRouter) -> Self {
        Self {
            inner: Arc::new(BurnInner {
                gateway,
                surface,
                voice,
                running: AtomicBool::new(false),
                session: Mutex::new(None),
            }),
        }
    }

    /// Start burning for an Ember session.
    pub fn set_session(&self, session: BurnSession) {
        info!("Burn loop armed for {}", session.ember_name);
        if let Ok(mut slot) = self.inner.session.lock() {
            *slot = Some(session);
        }
        self.inner.running.store(true, Ordering::SeqCst);
    }

    /// Stop burning and forget the session (Ember dismissed or paused by
    /// command).
    pub fn clear_session(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.inner.session.lock() {
            *slot = None;
        }
    }

    /// Surface hidden: hold burns but keep the session.
    pub fn pause(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Surface visible again: resume if an Ember session survives.
    pub fn resume(&self) {
        let has_session = self
            .inner
            .session
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false);
        if has_session {
            self.inner.running.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// One burn attempt. Failures are logged; the loop keeps going.
    pub async fn tick(&self) {
        if !self.is_running() {
            return;
        }
        let session = match self.inner.session.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        let Some(session) = session else {
            return;
        };

        let reason = format!("Auto-burn during {} session", session.ember_name);
        match self
            .inner
            .gateway
            .burn_polistar(&session.traveller_id, BURN_AMOUNT, &reason)
            .await
        {
            Ok(()) => {
                debug!("Burned {} POLISTAR ({})", BURN_AMOUNT, reason);
                self.inner
                    .voice
                    .speak_as_ember("One Polistar for our time together.")
                    .await;
                balances::refresh_polistar(
                    &self.inner.gateway,
                    &self.inner.surface,
                    &session.traveller_id,
                )
                .await;
                balances::refresh_onchain(
                    &self.inner.gateway,
                    &self.inner.surface,
                    &session.wallet_address,
                )
                .await;
            }
            Err(e) => {
                warn!("Burn failed, will retry next interval: {}", e);
            }
        }
    }

    /// Drive ticks forever; the host keeps the handle for shutdown.
    pub fn spawn(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(BURN_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                this.tick().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Transcript;
    use crate::testutil::{MockGateway, MockSynth};
    use tempfile::tempdir;

    struct Fixture {
        gw: Arc<MockGateway>,
        transcript: Arc<Transcript>,
        voice: VoiceRouter,
        store: Arc<LocalStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.redb");
        Fixture {
            gw: Arc::new(MockGateway::new()),
            transcript: Arc::new(Transcript::new()),
            voice: VoiceRouter::new(Arc::new(MockSynth::new()), true),
            store: Arc::new(LocalStore::open(Some(path.to_str().unwrap())).unwrap()),
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_milestone_grants_once() {
        let f = fixture();
        let scheduler = RewardScheduler::new(
            f.gw.clone(),
            f.transcript.clone(),
            f.voice.clone(),
            f.store.clone(),
        );

        assert!(scheduler.grant(Milestone::Signup, "u1", "0xabc").await);
        assert!(!scheduler.grant(Milestone::Signup, "u1", "0xabc").await);
        assert_eq!(f.gw.call_count("reward_polistar"), 1);
        // other milestones still armed
        assert!(scheduler.grant(Milestone::Attention, "u1", "0xabc").await);
    }

    #[tokio::test]
    async fn test_milestone_mint_failure_leaves_flag_clear() {
        let f = fixture();
        let scheduler = RewardScheduler::new(
            f.gw.clone(),
            f.transcript.clone(),
            f.voice.clone(),
            f.store.clone(),
        );
        f.gw.fail("reward_polistar");
        assert!(!scheduler.grant(Milestone::Signup, "u1", "0xabc").await);
        assert!(!f.store.milestone_granted("signup").unwrap());
    }

    fn session() -> BurnSession {
        BurnSession {
            traveller_id: "u1".into(),
            wallet_address: "0xabc".into(),
            ember_name: "Aria".into(),
        }
    }

    #[tokio::test]
    async fn test_burn_tick_uses_session_reason() {
        let f = fixture();
        let burn = BurnLoop::new(f.gw.clone(), f.transcript.clone(), f.voice.clone());
        burn.set_session(session());
        burn.tick().await;

        let calls = f.gw.calls();
        assert!(calls
            .iter()
            .any(|c| c == "burn_polistar u1 1 Auto-burn during Aria session"));
    }

    #[tokio::test]
    async fn test_burn_pause_resume() {
        let f = fixture();
        let burn = BurnLoop::new(f.gw.clone(), f.transcript.clone(), f.voice.clone());
        burn.set_session(session());

        burn.pause();
        burn.tick().await;
        assert_eq!(f.gw.call_count("burn_polistar"), 0);

        burn.resume();
        burn.tick().await;
        assert_eq!(f.gw.call_count("burn_polistar"), 1);

        // no session, resume stays off
        burn.clear_session();
        burn.resume();
        assert!(!burn.is_running());
    }

    #[tokio::test]
    async fn test_burn_failure_keeps_running() {
        let f = fixture();
        let burn = BurnLoop::new(f.gw.clone(), f.transcript.clone(), f.voice.clone());
        burn.set_session(session());
        f.gw.fail("burn_polistar");

        burn.tick().await;
        assert!(burn.is_running());
    }
}
