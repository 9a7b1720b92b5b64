//! ============================================================================
//! Token Wizards — Buy, Swap, Transfer
//! ============================================================================
//! Three-step confirm-to-execute flows over the gateway and the wallet
//! signer. Step 1 collects an amount (or recipient), step 2 previews and
//! asks for YES, step 3 executes. "cancel" exits from any step. The three
//! wizards deliberately differ in how they treat a failed execution:
//!
//!   buy      — signer rejection AND generic failure both leave the wizard
//!              at the confirmation step for retry
//!   swap     — a rejection soft-cancels and exits; other failures stay
//!   transfer — failures stay for manual cancel
//! ============================================================================

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::balances;
use crate::gateway::BridgeRequest;
use crate::render::{RenderOp, Role};
use crate::signer::SignerError;
use crate::types::{format_amount, pretty_recipient};

use super::ChatEngine;

/// Bridge settlement is not observable client-side; the original waits a
/// fixed delay before declaring the swap complete.
const SWAP_SETTLE_DELAY: Duration = Duration::from_secs(3);
const SIMULATED_TRANSFER_DELAY: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardMode {
    BuyPoli,
    SwapPolistar,
    TransferPolistar,
}

/// Accumulated wizard inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WizardPayload {
    pub rate: f64,
    pub amount_in: f64,
    pub amount_out: f64,
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WizardAction {
    pub mode: WizardMode,
    pub step: u8,
    pub payload: WizardPayload,
}

impl WizardAction {
    fn new(mode: WizardMode) -> Self {
        Self {
            mode,
            step: 1,
            payload: WizardPayload::default(),
        }
    }
}

/// First decimal number found in the string, comma tolerated as the decimal
/// point. Returns None when no digits appear.
pub fn parse_amount(input: &str) -> Option<f64> {
    let chars: Vec<char> = input.replace(',', ".").chars().collect();
    let n = chars.len();
    let mut start = 0;
    while start < n {
        let mut i = start;
        if chars[i] == '+' || chars[i] == '-' {
            i += 1;
        }
        let int_begin = i;
        while i < n && chars[i].is_ascii_digit() {
            i += 1;
        }
        let int_len = i - int_begin;
        let mut frac_len = 0;
        if i < n && chars[i] == '.' {
            let mut j = i + 1;
            while j < n && chars[j].is_ascii_digit() {
                j += 1;
            }
            frac_len = j - (i + 1);
            if frac_len > 0 {
                i = j;
            }
        }
        if int_len > 0 || frac_len > 0 {
            let text: String = chars[start..i].iter().collect();
            if let Ok(value) = text.parse::<f64>() {
                return Some(value);
            }
        }
        start += 1;
    }
    None
}

fn is_yes(lower: &str) -> bool {
    lower == "yes" || lower == "y"
}

impl ChatEngine {
    // ========================================================================
    // Routing
    // ========================================================================

    pub(super) async fn handle_wizard_input(&mut self, text: &str, lower: &str) {
        if lower == "cancel" {
            self.status("Cancelled.");
            self.end_action();
            return;
        }
        let Some(action) = self.action.clone() else {
            return;
        };
        match (action.mode, action.step) {
            (WizardMode::BuyPoli, 1) => self.buy_amount_entered(text).await,
            (WizardMode::BuyPoli, _) => {
                if is_yes(lower) {
                    self.execute_buy_poli().await;
                } else {
                    self.status("Cancelled.");
                    self.end_action();
                }
            }
            (WizardMode::SwapPolistar, 1) => self.swap_amount_entered(text).await,
            (WizardMode::SwapPolistar, _) => {
                if is_yes(lower) {
                    self.execute_swap_polistar().await;
                } else {
                    self.status("Cancelled.");
                    self.end_action();
                }
            }
            (WizardMode::TransferPolistar, 1) => self.transfer_recipient_entered(text),
            (WizardMode::TransferPolistar, 2) => self.transfer_amount_entered(text),
            (WizardMode::TransferPolistar, _) => {
                self.bubble(Role::User, text);
                if is_yes(lower) {
                    self.execute_transfer_polistar().await;
                } else {
                    self.status("Cancelled.");
                    self.end_action();
                }
            }
        }
    }

    pub(crate) fn end_action(&mut self) {
        self.action = None;
        self.surface.render(RenderOp::PromptReset);
    }

    fn payload_mut(&mut self) -> Option<&mut WizardPayload> {
        self.action.as_mut().map(|a| &mut a.payload)
    }

    // ========================================================================
    // Buy POLI (USDT → POLI via signed on-chain swap)
    // ========================================================================

    pub(super) async fn start_buy_poli(&mut self) {
        if self.session.wallet_address.is_none() {
            self.status("Please connect MetaMask first.");
            return;
        }
        let rate = self.gateway.poli_per_usdt().await;
        let mut action = WizardAction::new(WizardMode::BuyPoli);
        action.payload.rate = rate;
        self.action = Some(action);

        info!("Buy wizard started, rate {}", rate);
        self.status("Buying POLI");
        self.bubble(
            Role::Assistant,
            format!(
                "Current exchange rate is {} POLI per 1 USDT.\nHow much USDT would you like to spend?",
                format_amount(rate)
            ),
        );
        self.hint("Amount in USDT");
    }

    async fn buy_amount_entered(&mut self, text: &str) {
        let Some(usdt) = parse_amount(text).filter(|a| a.is_finite() && *a > 0.0) else {
            self.status("Please enter a valid amount, e.g. 10 or 2.5.");
            return;
        };
        let Some(payload) = self.payload_mut() else {
            return;
        };
        payload.amount_in = usdt;
        payload.amount_out = usdt * payload.rate;
        let poli = payload.amount_out;
        if let Some(action) = self.action.as_mut() {
            action.step = 2;
        }
        self.bubble(
            Role::Assistant,
            format!(
                "You are about to purchase {:.2} POLI using {} USDT.\nYour MetaMask signature is required; a network fee may apply.\nType YES to continue, or CANCEL to abort.",
                poli,
                format_amount(usdt)
            ),
        );
        self.hint("YES / CANCEL");
    }

    async fn execute_buy_poli(&mut self) {
        let Some(payload) = self.action.as_ref().map(|a| a.payload.clone()) else {
            return;
        };
        let Some(traveller) = self.session.wallet_address.clone() else {
            self.status("Please connect MetaMask first.");
            return;
        };
        // USDT uses 6 decimals on the wire
        let usdt_units = ((payload.amount_in * 1e6).floor() as u64).to_string();

        self.status("Preparing transaction…");
        self.bubble(Role::Assistant, "Submitting transaction for signature…");

        // Approval is best-effort: a failed or rejected approval is treated
        // as "not needed" and the purchase still proceeds.
        match self.gateway.build_approve_usdt_tx(&traveller, &usdt_units).await {
            Ok(Some(approve_tx)) => {
                self.status("Approving USDT spend…");
                match self.signer.send_transaction(&approve_tx).await {
                    Ok(_) => self.bubble(Role::Assistant, "✅ USDT approved."),
                    Err(e) => debug!("Approval skipped: {}", e),
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Approval build skipped: {}", e),
        }

        let buy_tx = match self.gateway.build_buy_poli_tx(&traveller, &usdt_units).await {
            Ok(tx) => tx,
            Err(e) => {
                warn!("Buy tx build failed: {}", e);
                self.status("Purchase failed. Please try again.");
                self.bubble(
                    Role::Assistant,
                    "❌ Purchase failed. You can type CANCEL to abort or try again.",
                );
                return;
            }
        };

        self.status("💸 Swapping USDT for POLI…");
        match self.signer.send_transaction(&buy_tx).await {
            Ok(hash) => {
                info!("POLI purchase confirmed: {}", hash);
                self.bubble(
                    Role::Assistant,
                    format!(
                        "✅ Purchased {:.2} POLI with {} USDT.",
                        payload.amount_out,
                        format_amount(payload.amount_in)
                    ),
                );
                self.status("✅ POLI successfully received!");
                balances::refresh_onchain(&self.gateway, &self.surface, &traveller).await;
                self.end_action();
            }
            Err(SignerError::Rejected) => {
                // wizard stays active for retry
                self.status("Transaction rejected in MetaMask.");
                self.bubble(
                    Role::Assistant,
                    "❌ You rejected the transaction. Type YES to try again or CANCEL to abort.",
                );
            }
            Err(e) => {
                warn!("POLI purchase failed: {}", e);
                self.status("Purchase failed. Please try again.");
                self.bubble(
                    Role::Assistant,
                    "❌ Purchase failed. You can type CANCEL to abort or try again.",
                );
            }
        }
    }

    // ========================================================================
    // Swap POLI → POLISTAR (remote bridge, no local signing)
    // ========================================================================

    pub(super) async fn start_swap_polistar(&mut self) {
        if self.session.wallet_address.is_none() {
            self.status("Please connect MetaMask first.");
            return;
        }
        let rate = self.gateway.polistar_per_poli().await;
        let mut action = WizardAction::new(WizardMode::SwapPolistar);
        action.payload.rate = rate;
        self.action = Some(action);

        info!("Swap wizard started, rate {}", rate);
        self.status("Swapping POLI → POLISTAR");
        self.bubble(
            Role::Assistant,
            format!(
                "Current rate is {} POLISTAR per 1 POLI.\nHow much POLI would you like to swap?",
                format_amount(rate)
            ),
        );
        self.hint("Amount in POLI");
    }

    async fn swap_amount_entered(&mut self, text: &str) {
        let Some(poli) = parse_amount(text).filter(|a| a.is_finite() && *a > 0.0) else {
            self.status("Please enter a valid amount, e.g. 10 or 2.5.");
            return;
        };
        let Some(payload) = self.payload_mut() else {
            return;
        };
        payload.amount_in = poli;
        payload.amount_out = poli * payload.rate;
        let polistar = payload.amount_out;
        if let Some(action) = self.action.as_mut() {
            action.step = 2;
        }
        self.bubble(
            Role::Assistant,
            format!(
                "You are about to swap {} POLI for {:.2} POLISTAR.\nType YES to continue, or CANCEL to abort.",
                format_amount(poli),
                polistar
            ),
        );
        self.hint("YES / CANCEL");
    }

    async fn execute_swap_polistar(&mut self) {
        let Some(payload) = self.action.as_ref().map(|a| a.payload.clone()) else {
            return;
        };
        let Some((traveller, wallet)) = self.ensure_identity() else {
            self.status("Please connect MetaMask first.");
            return;
        };

        self.status("⏳ Preparing swap…");
        self.bubble(Role::Assistant, "Bridging POLI → POLISTAR…");

        let request = BridgeRequest {
            user_id: traveller.clone(),
            token_id: "POLISTAR".to_string(),
            amount: payload.amount_in,
            to_asset: "POLI".to_string(),
            direction: "fromEVM".to_string(),
        };
        match self.gateway.bridge_token(&request).await {
            Ok(()) => {
                tokio::time::sleep(SWAP_SETTLE_DELAY).await;
                info!("Bridge complete: {} POLI", payload.amount_in);
                self.bubble(
                    Role::Assistant,
                    format!(
                        "✅ Swapped {} POLI → {:.2} POLISTAR.",
                        format_amount(payload.amount_in),
                        payload.amount_out
                    ),
                );
                self.status("✅ Swap complete!");
                balances::refresh_polistar(&self.gateway, &self.surface, &traveller).await;
                balances::refresh_onchain(&self.gateway, &self.surface, &wallet).await;
                self.end_action();
            }
            Err(e) if e.is_rejection() => {
                // soft cancel: unlike the buy wizard, rejection exits here
                self.status("Operation cancelled.");
                self.bubble(Role::Assistant, "❌ You cancelled the operation.");
                self.end_action();
            }
            Err(e) => {
                warn!("Swap failed: {}", e);
                self.status("Swap failed. Please try again.");
                self.bubble(Role::Assistant, format!("❌ Swap failed: {}", e));
            }
        }
    }

    // ========================================================================
    // Transfer POLISTAR (peer-to-peer ledger move)
    // ========================================================================

    pub(super) async fn start_transfer_polistar(&mut self) {
        if self.ensure_identity().is_none() {
            self.status("Please connect a wallet first.");
            return;
        }
        self.action = Some(WizardAction::new(WizardMode::TransferPolistar));

        info!("Transfer wizard started");
        self.status("Transferring POLISTAR");
        self.bubble(
            Role::Assistant,
            "Who should receive your POLISTAR? Paste their wallet address or traveller ID.",
        );
        self.hint("Recipient");
    }

    fn transfer_recipient_entered(&mut self, text: &str) {
        self.bubble(Role::User, text);
        let recipient = text.trim().to_string();
        if recipient.is_empty() {
            self.status("Please enter a recipient.");
            return;
        }
        let pretty = pretty_recipient(&recipient);
        if let Some(payload) = self.payload_mut() {
            payload.recipient = Some(recipient);
        }
        if let Some(action) = self.action.as_mut() {
            action.step = 2;
        }
        self.bubble(
            Role::Assistant,
            format!("How much POLISTAR should I send to {}?", pretty),
        );
        self.hint("Amount");
    }

    fn transfer_amount_entered(&mut self, text: &str) {
        self.bubble(Role::User, text);
        let Some(amount) = parse_amount(text).filter(|a| a.is_finite() && *a > 0.0) else {
            self.status("Please enter a valid amount, e.g. 5 or 2.5.");
            return;
        };
        let Some(payload) = self.payload_mut() else {
            return;
        };
        payload.amount_in = amount;
        let pretty = payload
            .recipient
            .as_deref()
            .map(pretty_recipient)
            .unwrap_or_default();
        if let Some(action) = self.action.as_mut() {
            action.step = 3;
        }
        self.bubble(
            Role::Assistant,
            format!(
                "You are about to transfer {} POLISTAR to {}.\nType YES to continue, or CANCEL to abort.",
                format_amount(amount),
                pretty
            ),
        );
        self.hint("YES / CANCEL");
    }

    async fn execute_transfer_polistar(&mut self) {
        let Some(payload) = self.action.as_ref().map(|a| a.payload.clone()) else {
            return;
        };
        let Some(recipient) = payload.recipient.clone() else {
            return;
        };
        let Some((traveller, _)) = self.ensure_identity() else {
            self.status("Please connect a wallet first.");
            return;
        };

        self.status("⏳ Sending POLISTAR…");
        let simulated = self.transfer_simulated();
        if simulated {
            tokio::time::sleep(SIMULATED_TRANSFER_DELAY).await;
        } else if let Err(e) = self
            .gateway
            .transfer_polistar(&traveller, &recipient, payload.amount_in)
            .await
        {
            // wizard stays active for manual cancel
            warn!("Transfer failed: {}", e);
            self.status("Transfer failed. Please try again.");
            self.bubble(Role::Assistant, format!("❌ Transfer failed: {}", e));
            return;
        }

        info!(
            "Transferred {} POLISTAR to {}{}",
            payload.amount_in,
            recipient,
            if simulated { " (simulated)" } else { "" }
        );
        self.bubble(
            Role::Assistant,
            format!(
                "✅ Sent {} POLISTAR to {}{}.",
                format_amount(payload.amount_in),
                pretty_recipient(&recipient),
                if simulated { " (simulated)" } else { "" }
            ),
        );
        self.status("Transfer complete!");
        balances::refresh_polistar(&self.gateway, &self.surface, &traveller).await;
        self.end_action();
    }

    fn transfer_simulated(&self) -> bool {
        std::env::var("POLYWORLD_SIMULATE_TRANSFER")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ProcessOutcome;
    use crate::render::RenderOp;
    use crate::testutil::engine_fixture;

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount("10"), Some(10.0));
        assert_eq!(parse_amount("2,5"), Some(2.5));
        assert_eq!(parse_amount("send 3.75 please"), Some(3.75));
        assert_eq!(parse_amount("-1"), Some(-1.0));
        assert_eq!(parse_amount(".5"), Some(0.5));
        assert_eq!(parse_amount("about 12, I think"), Some(12.0));
        assert_eq!(parse_amount("no numbers here"), None);
        assert_eq!(parse_amount(""), None);
    }

    /// Scenario: 10 USDT at rate 10 previews 100.00 POLI and YES executes.
    #[tokio::test]
    async fn test_buy_preview_and_confirm() {
        let mut f = engine_fixture();
        f.engine.session.wallet_address = Some("0xwallet".into());
        *f.gw.poli_rate.lock().unwrap() = 10.0;

        f.engine.process("buypoli").await;
        f.engine.process("10").await;
        assert!(f.transcript.contains_bubble("100.00 POLI"));

        f.engine.process("yes").await;
        assert!(f.gw.called("build_buy_poli_tx 0xwallet 10000000"));
        assert!(f.transcript.contains_bubble("✅ Purchased 100.00 POLI with 10 USDT."));
        assert!(f.engine.action.is_none());
    }

    #[tokio::test]
    async fn test_buy_requires_wallet() {
        let mut f = engine_fixture();
        f.engine.process("buypoli").await;
        assert!(f.engine.action.is_none());
        assert!(f
            .transcript
            .last_status()
            .unwrap()
            .contains("connect MetaMask first"));
    }

    #[tokio::test]
    async fn test_invalid_amount_reprompts_without_advancing() {
        let mut f = engine_fixture();
        f.engine.session.wallet_address = Some("0xwallet".into());
        f.engine.process("buypoli").await;

        for bad in ["zero", "0", "-4", "abc"] {
            f.engine.process(bad).await;
            let action = f.engine.action.as_ref().unwrap();
            assert_eq!(action.step, 1, "input {:?} must not advance", bad);
            assert_eq!(action.payload.amount_in, 0.0);
        }
    }

    #[tokio::test]
    async fn test_cancel_any_case_resets_and_restores_prompt() {
        let mut f = engine_fixture();
        f.engine.session.wallet_address = Some("0xwallet".into());
        f.engine.process("buypoli").await;
        f.engine.process("10").await;

        f.engine.process("CaNcEl").await;
        assert!(f.engine.action.is_none());
        assert_eq!(f.transcript.last_status().as_deref(), Some("Cancelled."));
        assert!(f
            .transcript
            .ops()
            .iter()
            .any(|op| matches!(op, RenderOp::PromptReset)));
    }

    #[tokio::test]
    async fn test_buy_rejection_keeps_wizard_active() {
        let mut f = engine_fixture();
        f.engine.session.wallet_address = Some("0xwallet".into());
        f.signer.reject("send");

        f.engine.process("buypoli").await;
        f.engine.process("10").await;
        f.engine.process("yes").await;

        assert!(f.engine.action.is_some());
        assert!(f
            .transcript
            .last_status()
            .unwrap()
            .contains("rejected in MetaMask"));
    }

    #[tokio::test]
    async fn test_buy_generic_failure_keeps_wizard_active() {
        let mut f = engine_fixture();
        f.engine.session.wallet_address = Some("0xwallet".into());
        f.gw.fail("build_buy_poli_tx");

        f.engine.process("buypoli").await;
        f.engine.process("10").await;
        f.engine.process("yes").await;

        assert!(f.engine.action.is_some());
        assert!(f.transcript.contains_bubble("❌ Purchase failed"));
    }

    #[tokio::test]
    async fn test_buy_approval_failure_is_soft() {
        let mut f = engine_fixture();
        f.engine.session.wallet_address = Some("0xwallet".into());
        f.gw.fail("build_approve_usdt_tx");

        f.engine.process("buypoli").await;
        f.engine.process("10").await;
        f.engine.process("yes").await;

        // purchase proceeds despite the approval failing
        assert!(f.gw.called("build_buy_poli_tx"));
        assert!(f.engine.action.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_swap_happy_path() {
        let mut f = engine_fixture();
        f.engine.session.wallet_address = Some("0xwallet".into());
        *f.gw.polistar_rate.lock().unwrap() = 2.0;

        f.engine.process("swappolistar").await;
        f.engine.process("4").await;
        assert!(f.transcript.contains_bubble("8.00 POLISTAR"));

        f.engine.process("y").await;
        assert!(f.gw.called("bridge_token"));
        assert!(f.transcript.contains_bubble("✅ Swapped 4 POLI → 8.00 POLISTAR."));
        assert!(f.engine.action.is_none());
    }

    #[tokio::test]
    async fn test_swap_rejection_soft_cancels_and_exits() {
        let mut f = engine_fixture();
        f.engine.session.wallet_address = Some("0xwallet".into());
        f.gw.reject("bridge_token");

        f.engine.process("swappolistar").await;
        f.engine.process("4").await;
        f.engine.process("yes").await;

        // unlike buy, the wizard is gone after a rejection
        assert!(f.engine.action.is_none());
        assert_eq!(
            f.transcript.last_status().as_deref(),
            Some("Operation cancelled.")
        );
    }

    #[tokio::test]
    async fn test_swap_generic_failure_keeps_wizard() {
        let mut f = engine_fixture();
        f.engine.session.wallet_address = Some("0xwallet".into());
        f.gw.fail("bridge_token");

        f.engine.process("swappolistar").await;
        f.engine.process("4").await;
        f.engine.process("yes").await;

        assert!(f.engine.action.is_some());
        assert!(f.transcript.contains_bubble("❌ Swap failed"));
    }

    /// Scenario: address recipient shortened to prefix(6)…suffix(4) in the
    /// exact confirmation line.
    #[tokio::test]
    async fn test_transfer_confirmation_wording() {
        let mut f = engine_fixture();
        let recipient = format!("0xabc1{}cdef", "0".repeat(32));

        f.engine.process("transferpolistar").await;
        f.engine.process(&recipient).await;
        f.engine.process("5").await;

        assert!(f.transcript.contains_bubble(
            "You are about to transfer 5 POLISTAR to 0xabc1…cdef.\nType YES to continue, or CANCEL to abort."
        ));

        f.engine.process("yes").await;
        assert!(f.transcript.contains_bubble("✅ Sent 5 POLISTAR to 0xabc1…cdef."));
        assert_eq!(f.gw.call_count("transfer_polistar"), 1);
        assert!(f.engine.action.is_none());
    }

    #[tokio::test]
    async fn test_transfer_plain_recipient_renders_verbatim() {
        let mut f = engine_fixture();
        f.engine.process("transferpolistar").await;
        f.engine.process("traveller-42").await;
        f.engine.process("2.5").await;
        assert!(f
            .transcript
            .contains_bubble("You are about to transfer 2.5 POLISTAR to traveller-42."));
    }

    #[tokio::test]
    async fn test_transfer_failure_keeps_wizard_for_manual_cancel() {
        let mut f = engine_fixture();
        f.gw.fail("transfer_polistar");

        f.engine.process("transferpolistar").await;
        f.engine.process("traveller-42").await;
        f.engine.process("5").await;
        f.engine.process("yes").await;

        assert!(f.engine.action.is_some());
        assert!(f.transcript.contains_bubble("❌ Transfer failed"));

        f.engine.process("cancel").await;
        assert!(f.engine.action.is_none());
    }

    #[tokio::test]
    async fn test_non_yes_confirmation_cancels() {
        let mut f = engine_fixture();
        f.engine.process("transferpolistar").await;
        f.engine.process("traveller-42").await;
        f.engine.process("5").await;
        f.engine.process("maybe").await;

        assert!(f.engine.action.is_none());
        assert!(!f.gw.called("transfer_polistar"));
    }

    #[tokio::test]
    async fn test_wizard_input_not_treated_as_command() {
        let mut f = engine_fixture();
        f.engine.process("transferpolistar").await;
        // "stop" is a command, but an active wizard consumes it as a recipient
        assert_eq!(f.engine.process("stop").await, ProcessOutcome::Handled);
        assert_eq!(f.engine.action.as_ref().unwrap().step, 2);
        assert_eq!(
            f.engine.action.as_ref().unwrap().payload.recipient.as_deref(),
            Some("stop")
        );
    }
}
