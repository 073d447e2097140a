//! Configuration for the audit service.

use attest_seal::RetryPolicy;
use attest_types::RiskLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Minimum risk level for events to enter the deviation report.
    #[serde(default = "default_risk_threshold")]
    pub risk_threshold: RiskLevel,

    /// Cap on the number of deviation events carried in a package. The
    /// intervention count is never capped.
    #[serde(default = "default_max_deviations")]
    pub max_deviations: usize,

    /// When set, non-critical coverage gaps also block sealing.
    #[serde(default)]
    pub strict_mode: bool,

    /// Wall-clock budget for one generation job, in seconds.
    #[serde(default = "default_job_budget_secs")]
    pub job_budget_secs: u64,

    /// Maximum attempts against an external service (session source,
    /// signing authority) before a job fails.
    #[serde(default = "default_external_attempts")]
    pub external_max_attempts: u32,

    /// Initial backoff between external-service attempts, in
    /// milliseconds. Doubles per attempt up to `external_max_backoff_ms`.
    #[serde(default = "default_external_backoff_ms")]
    pub external_initial_backoff_ms: u64,

    #[serde(default = "default_external_max_backoff_ms")]
    pub external_max_backoff_ms: u64,

    /// Identity recorded as `generated_by` when the submission names none.
    #[serde(default = "default_generated_by")]
    pub default_generated_by: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            risk_threshold: default_risk_threshold(),
            max_deviations: default_max_deviations(),
            strict_mode: false,
            job_budget_secs: default_job_budget_secs(),
            external_max_attempts: default_external_attempts(),
            external_initial_backoff_ms: default_external_backoff_ms(),
            external_max_backoff_ms: default_external_max_backoff_ms(),
            default_generated_by: default_generated_by(),
        }
    }
}

impl ServiceConfig {
    pub fn job_budget(&self) -> Duration {
        Duration::from_secs(self.job_budget_secs)
    }

    pub fn external_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.external_max_attempts,
            initial_backoff: Duration::from_millis(self.external_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.external_max_backoff_ms),
        }
    }
}

fn default_risk_threshold() -> RiskLevel {
    RiskLevel::High
}

fn default_max_deviations() -> usize {
    10
}

fn default_job_budget_secs() -> u64 {
    300
}

fn default_external_attempts() -> u32 {
    3
}

fn default_external_backoff_ms() -> u64 {
    100
}

fn default_external_max_backoff_ms() -> u64 {
    2_000
}

fn default_generated_by() -> String {
    "system-auditor".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.risk_threshold, RiskLevel::High);
        assert_eq!(config.max_deviations, 10);
        assert!(!config.strict_mode);
        assert_eq!(config.job_budget(), Duration::from_secs(300));
        assert_eq!(config.default_generated_by, "system-auditor");
    }

    #[test]
    fn partial_config_deserializes_with_defaults() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{"strict_mode": true, "max_deviations": 3}"#).unwrap();
        assert!(config.strict_mode);
        assert_eq!(config.max_deviations, 3);
        assert_eq!(config.risk_threshold, RiskLevel::High);
    }
}
