//! Capture run configuration.
//!
//! All options are environment-driven with defaults; the only required
//! setting is the storage endpoint. The cron schedule is validated at load
//! time but the run itself is single-shot — the external scheduler owns
//! invocation timing.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ConfigError;

/// Default daily capture time: 07:00 UTC (sec min hour dom mon dow).
pub const DEFAULT_SCHEDULE: &str = "0 0 7 * * *";

/// Default per-run wall-clock budget.
const DEFAULT_TIME_BUDGET_SECS: u64 = 900;

/// Configuration for a capture run.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Base URL of the durable object store (bucket endpoint).
    pub store_url: String,
    /// Identifier of the credential secret.
    pub secret_id: String,
    /// Secrets endpoint; when unset, credentials come from the environment.
    pub secrets_url: Option<String>,
    /// Portal landing page the capability starts from.
    pub portal_url: String,
    /// Whether diagnostic artifacts (log/trace/screenshot) are uploaded.
    pub log_upload_enabled: bool,
    /// Cron schedule the external scheduler is expected to use.
    pub schedule: String,
    /// Total wall-clock budget for one run.
    pub time_budget: Duration,
    /// Days stored artifacts are retained (advertised in object metadata).
    pub storage_retention_days: u32,
    /// Concurrent upload workers.
    pub upload_workers: usize,
    /// Base delay for upload retry backoff.
    pub upload_backoff: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            store_url: "http://localhost:9000/mail-capture".to_string(),
            secret_id: "mail-capture/portal".to_string(),
            secrets_url: None,
            portal_url: "https://www.usps.com/".to_string(),
            log_upload_enabled: true,
            schedule: DEFAULT_SCHEDULE.to_string(),
            time_budget: Duration::from_secs(DEFAULT_TIME_BUDGET_SECS),
            storage_retention_days: 10,
            upload_workers: 4,
            upload_backoff: Duration::from_millis(500),
        }
    }
}

impl CaptureConfig {
    /// Load configuration from the environment.
    ///
    /// `MAIL_CAPTURE_STORE_URL` is required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_url = std::env::var("MAIL_CAPTURE_STORE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("MAIL_CAPTURE_STORE_URL".to_string()))?;

        let defaults = Self::default();

        let secret_id =
            std::env::var("MAIL_CAPTURE_SECRET_ID").unwrap_or(defaults.secret_id);
        let secrets_url = std::env::var("MAIL_CAPTURE_SECRETS_URL").ok();
        let portal_url =
            std::env::var("MAIL_CAPTURE_PORTAL_URL").unwrap_or(defaults.portal_url);

        let log_upload_enabled = std::env::var("MAIL_CAPTURE_UPLOAD_LOGS")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let schedule =
            std::env::var("MAIL_CAPTURE_SCHEDULE").unwrap_or(defaults.schedule);

        let time_budget_secs: u64 = std::env::var("MAIL_CAPTURE_TIME_BUDGET_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIME_BUDGET_SECS);

        let storage_retention_days: u32 = std::env::var("MAIL_CAPTURE_RETENTION_DAYS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.storage_retention_days);

        let upload_workers: usize = std::env::var("MAIL_CAPTURE_UPLOAD_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.upload_workers);

        let config = Self {
            store_url,
            secret_id,
            secrets_url,
            portal_url,
            log_upload_enabled,
            schedule,
            time_budget: Duration::from_secs(time_budget_secs),
            storage_retention_days,
            upload_workers,
            upload_backoff: defaults.upload_backoff,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the schedule and numeric bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        cron::Schedule::from_str(&self.schedule)
            .map_err(|e| ConfigError::InvalidSchedule(format!("{}: {e}", self.schedule)))?;
        if self.upload_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "upload_workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.time_budget.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "time_budget".to_string(),
                message: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Next scheduled fire time, for the startup banner.
    pub fn next_fire(&self) -> Result<Option<DateTime<Utc>>, ConfigError> {
        let schedule = cron::Schedule::from_str(&self.schedule)
            .map_err(|e| ConfigError::InvalidSchedule(format!("{}: {e}", self.schedule)))?;
        Ok(schedule.upcoming(Utc).next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.time_budget, Duration::from_secs(900));
        assert_eq!(config.storage_retention_days, 10);
        assert!(config.log_upload_enabled);
    }

    #[test]
    fn default_schedule_fires() {
        let config = CaptureConfig::default();
        assert!(config.next_fire().unwrap().is_some());
    }

    #[test]
    fn rejects_invalid_schedule() {
        let config = CaptureConfig {
            schedule: "not a cron".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn rejects_zero_workers() {
        let config = CaptureConfig {
            upload_workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn from_env_requires_store_url() {
        // SAFETY: no other test reads MAIL_CAPTURE_STORE_URL concurrently.
        unsafe { std::env::remove_var("MAIL_CAPTURE_STORE_URL") };
        assert!(matches!(
            CaptureConfig::from_env(),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn rejects_zero_budget() {
        let config = CaptureConfig {
            time_budget: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
