use std::time::Duration;

use crate::cache::keys::CURRICULUM_STATE_TTL;
use crate::db::config::{env_bool, env_f64, env_u64};

pub const DEFAULT_PASSING_SCORE: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    /// Fraction of the TTL by which Redis expirations are spread, 0 disables.
    pub cache_ttl_jitter: f64,
    pub passing_score: f64,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            log_level,
            cache_enabled: env_bool("CURRICULUM_CACHE_ENABLED", true),
            cache_ttl: Duration::from_secs(env_u64(
                "CURRICULUM_CACHE_TTL_SECS",
                CURRICULUM_STATE_TTL.as_secs(),
            )),
            cache_ttl_jitter: env_f64("CACHE_TTL_JITTER", 0.0).clamp(0.0, 0.5),
            passing_score: env_f64("CURRICULUM_PASSING_SCORE", DEFAULT_PASSING_SCORE),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            cache_enabled: true,
            cache_ttl: CURRICULUM_STATE_TTL,
            cache_ttl_jitter: 0.0,
            passing_score: DEFAULT_PASSING_SCORE,
        }
    }
}
