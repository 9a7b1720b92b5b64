//! ============================================================================
//! Balance Display
//! ============================================================================
//! Refresh helpers for the two balance panels: the POLISTAR ledger balance
//! (with its withdrawable portion) and the on-chain POLI/USDT pair. Fetch
//! failures degrade to a status warning instead of breaking the caller.
//! ============================================================================

use std::sync::Arc;

use tracing::warn;

use crate::gateway::Gateway;
use crate::render::{ChatSurface, RenderOp};
use crate::types::BalanceSnapshot;

/// Refresh the POLISTAR panel. Returns the snapshot so the caller can react
/// to a zero balance (first-time gift flow).
pub async fn refresh_polistar(
    gateway: &Arc<dyn Gateway>,
    surface: &Arc<dyn ChatSurface>,
    traveller_id: &str,
) -> Option<BalanceSnapshot> {
    match gateway.polistar_balance(traveller_id).await {
        Ok(snapshot) => {
            surface.render(RenderOp::BalanceUpdate {
                label: "POLISTAR".to_string(),
                amount: snapshot.balance,
            });
            surface.render(RenderOp::BalanceUpdate {
                label: "WITHDRAWABLE".to_string(),
                amount: snapshot.withdrawable,
            });
            Some(snapshot)
        }
        Err(e) => {
            warn!("POLISTAR balance fetch failed: {}", e);
            surface.render(RenderOp::Status {
                text: "⚠️ Could not load your POLISTAR balance right now.".to_string(),
            });
            None
        }
    }
}

/// Refresh the on-chain POLI/USDT panel. A USDT failure alone falls back to
/// zero; a POLI failure degrades the whole panel.
pub async fn refresh_onchain(
    gateway: &Arc<dyn Gateway>,
    surface: &Arc<dyn ChatSurface>,
    address: &str,
) {
    let poli = match gateway.poli_balance(address).await {
        Ok(v) => v,
        Err(e) => {
            warn!("POLI balance fetch failed: {}", e);
            surface.render(RenderOp::Status {
                text: "⚠️ Could not load on-chain balances right now.".to_string(),
            });
            return;
        }
    };
    let usdt = match gateway.usdt_balance(address).await {
        Ok(v) => v,
        Err(e) => {
            warn!("USDT balance fetch failed: {}", e);
            0.0
        }
    };
    surface.render(RenderOp::BalanceUpdate {
        label: "POLI".to_string(),
        amount: poli,
    });
    surface.render(RenderOp::BalanceUpdate {
        label: "USDT".to_string(),
        amount: usdt,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Transcript;
    use crate::testutil::MockGateway;

    fn doubles() -> (Arc<MockGateway>, Arc<Transcript>, Arc<dyn Gateway>, Arc<dyn ChatSurface>) {
        let gw = Arc::new(MockGateway::new());
        let surface = Arc::new(Transcript::new());
        (gw.clone(), surface.clone(), gw, surface)
    }

    #[tokio::test]
    async fn test_polistar_panel_updates() {
        let (gw, transcript, gateway, surface) = doubles();
        gw.polistar.lock().unwrap().balance = 25.0;
        gw.polistar.lock().unwrap().withdrawable = 5.0;

        let snap = refresh_polistar(&gateway, &surface, "u1").await.unwrap();
        assert_eq!(snap.balance, 25.0);
        let ops = transcript.ops();
        assert!(ops.contains(&RenderOp::BalanceUpdate {
            label: "POLISTAR".into(),
            amount: 25.0
        }));
        assert!(ops.contains(&RenderOp::BalanceUpdate {
            label: "WITHDRAWABLE".into(),
            amount: 5.0
        }));
    }

    #[tokio::test]
    async fn test_polistar_failure_degrades_to_status() {
        let (gw, transcript, gateway, surface) = doubles();
        gw.fail("polistar_balance");
        assert!(refresh_polistar(&gateway, &surface, "u1").await.is_none());
        assert!(transcript
            .last_status()
            .unwrap()
            .contains("Could not load your POLISTAR balance"));
    }

    #[tokio::test]
    async fn test_onchain_usdt_failure_falls_back_to_zero() {
        let (gw, transcript, gateway, surface) = doubles();
        *gw.poli.lock().unwrap() = 3.0;
        gw.fail("usdt_balance");

        refresh_onchain(&gateway, &surface, "0xabc").await;
        let ops = transcript.ops();
        assert!(ops.contains(&RenderOp::BalanceUpdate {
            label: "POLI".into(),
            amount: 3.0
        }));
        assert!(ops.contains(&RenderOp::BalanceUpdate {
            label: "USDT".into(),
            amount: 0.0
        }));
    }
}
