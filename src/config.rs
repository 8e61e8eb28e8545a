//! Environment-driven configuration (§6, SPEC_FULL A.3). Every setting is a
//! process environment variable with a sane default; there is no config
//! file. `.env` is loaded once at startup via `dotenvy` if present, matching
//! the teacher's convention of keeping secrets out of version control.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::model::VenueId;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Key/value store address (`REDIS_HOST`, `REDIS_PORT`).
    pub redis_host: String,
    pub redis_port: u16,

    /// HTTP port serving `/metrics` and `/health` (`METRICS_PORT`).
    pub metrics_port: u16,

    /// `ENABLED_EXCHANGES` — comma-separated `VenueId` list. A name that
    /// fails to parse is fatal at configuration time (§4.1: "unknown-venue
    /// is fatal at configuration time").
    pub enabled_exchanges: Vec<VenueId>,

    /// Selects Phase 1+2 selective streaming vs legacy all-symbol mode
    /// (`USE_TWO_PHASE`).
    pub use_two_phase: bool,

    /// Credentials endpoint (`BACKEND_API_URL`, `SERVICE_SECRET`). Both
    /// optional: when absent, the Credentials Client is simply not
    /// started and every connector runs on public endpoints only.
    pub backend_api_url: Option<String>,
    pub service_secret: Option<String>,

    /// Minimum spread, in bps, for Spread Discovery to keep a pair (§4.4).
    pub min_spread_bps: f64,

    /// REST call timeout (§5: "REST calls 30s default").
    pub rest_timeout: Duration,
    /// WebSocket handshake timeout (§5: "10s").
    pub ws_handshake_timeout: Duration,
    /// Per-venue heartbeat interval (§4.2: "typically 20s").
    pub keepalive_interval: Duration,
    /// Staleness threshold before a reconnect candidate (§4.5, §5: "30s").
    pub staleness_threshold: Duration,
    /// REST Loader periodic refresh interval (§4.3, §5: "default 30s").
    pub refresh_interval: Duration,
}

impl Settings {
    /// Loads settings from the process environment. Returns
    /// `EngineError::Config` on a malformed setting or an
    /// `ENABLED_EXCHANGES` naming an unknown venue — the only
    /// fatal-at-startup conditions this step can produce (§7).
    pub fn from_env() -> Result<Self> {
        let enabled_exchanges = parse_enabled_exchanges(&env_var("ENABLED_EXCHANGES", "binance,bybit,okx"))?;
        if enabled_exchanges.is_empty() {
            return Err(EngineError::Config("ENABLED_EXCHANGES must name at least one venue".into()));
        }

        Ok(Self {
            redis_host: env_var("REDIS_HOST", "127.0.0.1"),
            redis_port: parse_env("REDIS_PORT", 6379)?,
            metrics_port: parse_env("METRICS_PORT", 9090)?,
            enabled_exchanges,
            use_two_phase: parse_env("USE_TWO_PHASE", true)?,
            backend_api_url: std::env::var("BACKEND_API_URL").ok(),
            service_secret: std::env::var("SERVICE_SECRET").ok(),
            min_spread_bps: parse_env("MIN_SPREAD_BPS", 5.0)?,
            rest_timeout: Duration::from_secs(parse_env("REST_TIMEOUT_SECS", 30)?),
            ws_handshake_timeout: Duration::from_secs(parse_env("WS_HANDSHAKE_TIMEOUT_SECS", 10)?),
            keepalive_interval: Duration::from_secs(parse_env("KEEPALIVE_INTERVAL_SECS", 20)?),
            staleness_threshold: Duration::from_secs(parse_env("STALENESS_THRESHOLD_SECS", 30)?),
            refresh_interval: Duration::from_secs(parse_env("REFRESH_INTERVAL_SECS", 30)?),
        })
    }

    /// Credentials endpoint is configured only when both pieces are
    /// present (§4.7); absent either, the Supervisor skips it.
    pub fn credentials_configured(&self) -> bool {
        self.backend_api_url.is_some() && self.service_secret.is_some()
    }
}

fn env_var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| EngineError::Config(format!("{name} is not a valid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn parse_enabled_exchanges(raw: &str) -> Result<Vec<VenueId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<VenueId>().map_err(|_| EngineError::Config(format!("unknown venue in ENABLED_EXCHANGES: {s}"))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_enabled_exchanges() {
        let venues = parse_enabled_exchanges("binance, bybit ,okx").unwrap();
        assert_eq!(venues, vec![VenueId::Binance, VenueId::Bybit, VenueId::Okx]);
    }

    #[test]
    fn rejects_unknown_venue() {
        assert!(parse_enabled_exchanges("binance,not-a-venue").is_err());
    }

    #[test]
    fn empty_string_yields_empty_list() {
        assert!(parse_enabled_exchanges("").unwrap().is_empty());
    }
}
