//! Configuration module for import-service.

use crate::services::batch::BatchOptions;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub service_name: String,
    pub log_level: String,
    pub batch: BatchOptions,
    pub matching: MatchingConfig,
    pub fingerprint_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Amount difference, in cents, still treated as an exact match.
    pub amount_tolerance_cents: u32,
    /// Half-width of the date proximity window, in days.
    pub date_window_days: i64,
    /// Minimum confidence for an automatic link.
    pub auto_threshold: f64,
    /// Manually confirmed links required before automatic matching runs.
    pub min_confirmed_links: u64,
    /// Largest transaction group considered for an N:1 match.
    pub max_group_size: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            amount_tolerance_cents: 1,
            date_window_days: 7,
            auto_threshold: 0.8,
            min_confirmed_links: 10,
            max_group_size: 4,
        }
    }
}

impl ImportConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "import-service".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            batch: BatchOptions {
                batch_size: env_parse("IMPORT_BATCH_SIZE", 50),
                concurrency: env_parse("IMPORT_CONCURRENCY", 5),
                retry_count: env_parse("IMPORT_RETRY_COUNT", 3),
                retry_delay: Duration::from_millis(env_parse("IMPORT_RETRY_DELAY_MS", 1000)),
            },
            matching: MatchingConfig {
                amount_tolerance_cents: env_parse("MATCH_AMOUNT_TOLERANCE_CENTS", 1),
                date_window_days: env_parse("MATCH_DATE_WINDOW_DAYS", 7),
                auto_threshold: env_parse("MATCH_AUTO_THRESHOLD", 0.8),
                min_confirmed_links: env_parse("MATCH_MIN_CONFIRMED_LINKS", 10),
                max_group_size: env_parse("MATCH_MAX_GROUP_SIZE", 4),
            },
            fingerprint_ttl: Duration::from_secs(env_parse("FINGERPRINT_TTL_SECS", 3600)),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if !(0.0..=1.0).contains(&self.matching.auto_threshold) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MATCH_AUTO_THRESHOLD must be between 0.0 and 1.0, got {}",
                self.matching.auto_threshold
            )));
        }
        if self.matching.max_group_size == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MATCH_MAX_GROUP_SIZE must be at least 1"
            )));
        }
        if self.matching.date_window_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MATCH_DATE_WINDOW_DAYS must be positive"
            )));
        }
        Ok(())
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            service_name: "import-service".to_string(),
            log_level: "info".to_string(),
            batch: BatchOptions::default(),
            matching: MatchingConfig::default(),
            fingerprint_ttl: Duration::from_secs(3600),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
