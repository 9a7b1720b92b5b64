//! ============================================================================
//! Gateway Configuration
//! ============================================================================
//! Endpoint base resolution and developer overrides. Values come from the
//! environment so a local backend or simulated token flows can be wired in
//! without code changes.
//! ============================================================================

use std::env;

pub const DEFAULT_API_BASE: &str = "https://polyworld-2f581.web.app/api";

/// Exchange-rate defaults used whenever the live rate endpoints fail.
pub const FALLBACK_POLI_PER_USDT: f64 = 10.0;
pub const FALLBACK_POLISTAR_PER_POLI: f64 = 1.0;

/// Developer overrides, all off by default.
#[derive(Debug, Clone, Default)]
pub struct DevOverrides {
    /// Fixed POLI-per-USDT rate; wins over the network when set.
    pub poli_per_usdt: Option<f64>,
    /// Fixed POLISTAR-per-POLI rate; wins over the network when set.
    pub polistar_per_poli: Option<f64>,
    /// Pretend POLISTAR transfers succeed without calling the backend.
    pub simulate_transfer: bool,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub dev: DevOverrides,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            dev: DevOverrides::default(),
        }
    }
}

impl GatewayConfig {
    /// Build from the environment:
    /// - `POLYWORLD_API_BASE` overrides the endpoint base
    /// - `POLYWORLD_POLI_PER_USDT` / `POLYWORLD_POLISTAR_PER_POLI` pin rates
    /// - `POLYWORLD_SIMULATE_TRANSFER=1` short-circuits transfers
    pub fn from_env() -> Self {
        let base_url = env::var("POLYWORLD_API_BASE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let dev = DevOverrides {
            poli_per_usdt: env::var("POLYWORLD_POLI_PER_USDT")
                .ok()
                .and_then(|s| s.trim().parse().ok()),
            polistar_per_poli: env::var("POLYWORLD_POLISTAR_PER_POLI")
                .ok()
                .and_then(|s| s.trim().parse().ok()),
            simulate_transfer: env::var("POLYWORLD_SIMULATE_TRANSFER")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        };

        Self { base_url, dev }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        let cfg = GatewayConfig {
            base_url: "https://example.test/api/".into(),
            dev: DevOverrides::default(),
        };
        assert_eq!(cfg.endpoint("/getBalance"), "https://example.test/api/getBalance");
        assert_eq!(cfg.endpoint("chat"), "https://example.test/api/chat");
    }

    #[test]
    fn test_default_base() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.base_url, DEFAULT_API_BASE);
        assert!(cfg.dev.poli_per_usdt.is_none());
        assert!(!cfg.dev.simulate_transfer);
    }
}
