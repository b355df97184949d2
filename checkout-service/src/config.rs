use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

pub const DEFAULT_SERVICE_CHARGE_BPS: u32 = crate::totals::SERVICE_CHARGE_BPS;
pub const DEFAULT_HOLD_TTL_SECS: u64 = 600;
pub const DEFAULT_AMOUNT_TOLERANCE_BPS: u32 = 1_000;

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub backend_base_url: String,
    pub backend_timeout: Duration,
    pub service_charge_bps: u32,
    /// Backend hold TTL; the denominator of the countdown progress bar.
    pub hold_ttl: Duration,
    pub amount_tolerance_bps: u32,
    pub redirect_delay: Duration,
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl CheckoutConfig {
    pub fn from_env() -> Result<Self> {
        let backend_base_url = env::var("BACKEND_BASE_URL").context("BACKEND_BASE_URL must be set")?;
        let backend_timeout_secs = env::var("BACKEND_TIMEOUT_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(15);
        let service_charge_bps = env::var("SERVICE_CHARGE_BPS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(DEFAULT_SERVICE_CHARGE_BPS);
        let hold_ttl_secs = env::var("HOLD_TTL_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_HOLD_TTL_SECS);
        let amount_tolerance_bps = env::var("AMOUNT_TOLERANCE_BPS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(DEFAULT_AMOUNT_TOLERANCE_BPS);
        let redirect_delay_ms = env::var("PAYMENT_REDIRECT_DELAY_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(1_500);
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8090);
        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|raw| parse_origins(&raw))
            .unwrap_or_else(|_| default_origins());

        Ok(Self {
            backend_base_url: backend_base_url.trim_end_matches('/').to_string(),
            backend_timeout: Duration::from_secs(backend_timeout_secs.max(1)),
            service_charge_bps,
            hold_ttl: Duration::from_secs(hold_ttl_secs.max(60)),
            amount_tolerance_bps,
            redirect_delay: Duration::from_millis(redirect_delay_ms),
            host,
            port,
            cors_allowed_origins,
        })
    }

    /// Defaults with an explicit backend; used by tests and embedders.
    pub fn for_backend(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            backend_base_url: base_url.trim_end_matches('/').to_string(),
            backend_timeout: Duration::from_secs(15),
            service_charge_bps: DEFAULT_SERVICE_CHARGE_BPS,
            hold_ttl: Duration::from_secs(DEFAULT_HOLD_TTL_SECS),
            amount_tolerance_bps: DEFAULT_AMOUNT_TOLERANCE_BPS,
            redirect_delay: Duration::from_millis(1_500),
            host: "127.0.0.1".to_string(),
            port: 8090,
            cors_allowed_origins: default_origins(),
        }
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_origins() -> Vec<String> {
    ["http://localhost:3000", "http://localhost:5173"]
        .iter()
        .map(|o| o.to_string())
        .collect()
}
