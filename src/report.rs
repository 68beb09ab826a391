//! Execution reporting — deadline, error records, and the result object.
//!
//! The `ExecutionResult` is the run's sole externally observable output.
//! Error messages are credential-redacted at construction; no path exists
//! from a secret value into the result.

use std::time::{Duration, Instant};

use chrono::NaiveDate;
use secrecy::ExposeSecret;
use serde::Serialize;
use uuid::Uuid;

use crate::credentials::Credentials;
use crate::storage::StoredArtifact;

/// Trailing reserve kept out of the budget so diagnostics and finalization
/// always have room, even under worst-case classification latency.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Replacement for secret values in redacted text.
const REDACTED: &str = "[redacted]";

/// Where in the run an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Auth,
    Enumeration,
    Classification,
    Upload,
    Deadline,
}

/// One recorded run error. Messages are credential-redacted.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub stage: Stage,
    pub message: String,
    pub recoverable: bool,
}

impl ErrorRecord {
    /// Record an error from a stage where no credentials are live yet.
    pub fn new(stage: Stage, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            stage,
            message: message.into(),
            recoverable,
        }
    }

    /// Record an error with the live credentials scrubbed from the message.
    pub fn redacted(
        stage: Stage,
        message: impl Into<String>,
        recoverable: bool,
        credentials: &Credentials,
    ) -> Self {
        Self {
            stage,
            message: redact(&message.into(), credentials),
            recoverable,
        }
    }
}

/// Replace any occurrence of either secret with a placeholder.
pub fn redact(message: &str, credentials: &Credentials) -> String {
    let mut out = message.to_string();
    for secret in [&credentials.username, &credentials.password] {
        let value = secret.expose_secret();
        if !value.is_empty() {
            out = out.replace(value, REDACTED);
        }
    }
    out
}

/// Wall-clock budget for one run, minus the safety margin.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Budget left before the safety margin is eaten into.
    pub fn remaining(&self) -> Duration {
        self.budget
            .saturating_sub(SAFETY_MARGIN)
            .saturating_sub(self.elapsed())
    }

    /// True once no budget remains for further candidate work.
    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// The structured result of one capture run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub success: bool,
    pub candidates_seen: usize,
    pub images_accepted: usize,
    pub images_stored: usize,
    /// Mail images sorted by candidate ordinal, then diagnostics in fixed
    /// order; deterministic regardless of upload completion order.
    pub artifacts: Vec<StoredArtifact>,
    pub errors: Vec<ErrorRecord>,
    pub elapsed_seconds: f64,
    pub run_date: NaiveDate,
}

impl ExecutionResult {
    /// HTTP-style status for the invocation boundary: 200 for success or
    /// deadline-bounded partial success, 500 for unrecoverable failure.
    pub fn status_code(&self) -> u16 {
        if self.success { 200 } else { 500 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("alice@example.com", "s3cr3t-pass")
    }

    #[test]
    fn redact_scrubs_both_secrets() {
        let message = "login failed for alice@example.com with s3cr3t-pass";
        let out = redact(message, &creds());
        assert!(!out.contains("alice@example.com"));
        assert!(!out.contains("s3cr3t-pass"));
        assert_eq!(out.matches(REDACTED).count(), 2);
    }

    #[test]
    fn redact_leaves_clean_messages_alone() {
        let message = "no signed-in marker in observation";
        assert_eq!(redact(message, &creds()), message);
    }

    #[test]
    fn redacted_record_carries_stage_and_flag() {
        let record = ErrorRecord::redacted(
            Stage::Auth,
            "bad credential s3cr3t-pass",
            false,
            &creds(),
        );
        assert_eq!(record.stage, Stage::Auth);
        assert!(!record.recoverable);
        assert!(!record.message.contains("s3cr3t-pass"));
    }

    #[test]
    fn zero_budget_deadline_is_expired() {
        let deadline = Deadline::new(Duration::ZERO);
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn generous_budget_deadline_is_not_expired() {
        let deadline = Deadline::new(Duration::from_secs(900));
        assert!(!deadline.expired());
        assert!(deadline.remaining() <= Duration::from_secs(840));
    }

    #[test]
    fn status_code_maps_success() {
        let mut result = ExecutionResult {
            run_id: Uuid::new_v4(),
            success: true,
            candidates_seen: 0,
            images_accepted: 0,
            images_stored: 0,
            artifacts: vec![],
            errors: vec![],
            elapsed_seconds: 0.1,
            run_date: NaiveDate::from_ymd_opt(2026, 8, 6).unwrap(),
        };
        assert_eq!(result.status_code(), 200);
        result.success = false;
        assert_eq!(result.status_code(), 500);
    }

    #[test]
    fn result_serializes_without_credentials_fields() {
        let result = ExecutionResult {
            run_id: Uuid::new_v4(),
            success: true,
            candidates_seen: 2,
            images_accepted: 1,
            images_stored: 1,
            artifacts: vec![],
            errors: vec![ErrorRecord::new(Stage::Deadline, "budget exhausted", true)],
            elapsed_seconds: 12.5,
            run_date: NaiveDate::from_ymd_opt(2026, 8, 6).unwrap(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["images_stored"], 1);
        assert_eq!(json["errors"][0]["stage"], "deadline");
        assert!(json.get("username").is_none());
        assert!(json.get("password").is_none());
    }
}
