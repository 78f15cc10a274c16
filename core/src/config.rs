use crate::gate::OriginGate;
use crate::provider::DEFAULT_BASE_URL;
use std::env;
use std::time::Duration;
use tracing::{info, warn};

/// Knobs for the refresh sweep.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Age after which the cache is considered stale.
    pub ttl: Duration,
    /// Pause between provider calls within one sweep.
    pub request_delay: Duration,
    /// Minimum wait after a sweep in which every item failed.
    pub retry_backoff: Duration,
    pub blocked_origins: OriginGate,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(6 * 60 * 60),
            request_delay: Duration::from_millis(100),
            retry_backoff: Duration::from_secs(15 * 60),
            blocked_origins: OriginGate::default(),
        }
    }
}

impl RefreshConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            ttl: Duration::from_secs(try_load("RATINGS_TTL_SECS", d.ttl.as_secs())),
            request_delay: Duration::from_millis(try_load("RATINGS_REQUEST_DELAY_MS", d.request_delay.as_millis() as u64)),
            retry_backoff: Duration::from_secs(try_load("RATINGS_RETRY_BACKOFF_SECS", d.retry_backoff.as_secs())),
            blocked_origins: OriginGate::parse(&env::var("BLOCK_REFRESH_IPS").unwrap_or_default()),
        }
    }
}

/// Settings for reaching the rating provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        let api_key = env::var("RAINFOREST_API_KEY").ok().filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("RAINFOREST_API_KEY missing; ratings will be served from cache only");
        }
        Self {
            api_key,
            base_url: env::var("RAINFOREST_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            timeout: Duration::from_secs(try_load("RAINFOREST_TIMEOUT_SECS", 15)),
        }
    }
}

fn try_load(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_refresh_policy() {
        let c = RefreshConfig::default();
        assert_eq!(c.ttl, Duration::from_secs(21_600));
        assert_eq!(c.request_delay, Duration::from_millis(100));
        assert!(c.blocked_origins.entries().is_empty());
    }

    #[test]
    fn malformed_numbers_fall_back() {
        env::set_var("SHELF_TEST_BAD_NUMBER", "six hours");
        assert_eq!(try_load("SHELF_TEST_BAD_NUMBER", 7), 7);
        env::set_var("SHELF_TEST_GOOD_NUMBER", " 42 ");
        assert_eq!(try_load("SHELF_TEST_GOOD_NUMBER", 7), 42);
        assert_eq!(try_load("SHELF_TEST_UNSET_NUMBER", 9), 9);
    }
}
