//! Core types for plan execution

use crate::address::ResourceAddress;
use crate::context::CancellationToken;
use crate::diff::Action;
use crate::error::ProviderErrorKind;
use crate::planner::StepOp;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    ///
    /// Never exceeds `max_delay`; a factor that yields a negative or
    /// non-finite delay falls back to `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max = self.max_delay.as_secs_f64();
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        if !delay.is_finite() || delay < 0.0 {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay.min(max))
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Stabilisation polling after create and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Give up and fail the step after this long
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of steps run concurrently
    pub jobs: usize,
    pub retry: RetryConfig,
    pub poll: PollConfig,
    pub cancel: CancellationToken,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Succeeded,
    /// Provider or engine failure, with the provider's reason
    Failed {
        reason: String,
        kind: Option<ProviderErrorKind>,
    },
    /// Not attempted because a step it depends on failed
    Blocked { by: ResourceAddress },
    /// Not attempted because the apply was cancelled
    Cancelled,
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed { reason, .. } => write!(f, "failed: {reason}"),
            Self::Blocked { by } => write!(f, "blocked by {by}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Outcome of one plan step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub address: ResourceAddress,
    pub action: Action,
    pub op: StepOp,
    pub result: StepResult,
}

/// Per-resource summary of an apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub failed: usize,
    pub blocked: usize,
    pub cancelled: usize,
}

impl ExecuteSummary {
    /// Summarise step outcomes per resource; a resource counts by the
    /// first of its steps that did not succeed.
    pub fn from_outcomes(outcomes: &[StepOutcome]) -> Self {
        let mut per_resource: BTreeMap<&ResourceAddress, (Action, &StepResult)> = BTreeMap::new();
        for outcome in outcomes {
            per_resource
                .entry(&outcome.address)
                .and_modify(|(_, result)| {
                    if result.is_success() {
                        *result = &outcome.result;
                    }
                })
                .or_insert((outcome.action, &outcome.result));
        }

        let mut summary = Self::default();
        for (action, result) in per_resource.into_values() {
            match (result, action) {
                (StepResult::Succeeded, Action::Create) => summary.created += 1,
                (StepResult::Succeeded, Action::Update) => summary.updated += 1,
                (StepResult::Succeeded, Action::Replace) => summary.replaced += 1,
                (StepResult::Succeeded, Action::Delete) => summary.deleted += 1,
                (StepResult::Failed { .. }, _) => summary.failed += 1,
                (StepResult::Blocked { .. }, _) => summary.blocked += 1,
                (StepResult::Cancelled, _) => summary.cancelled += 1,
            }
        }
        summary
    }

    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// Check if execution was fully successful
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.blocked == 0 && self.cancelled == 0
    }
}

impl fmt::Display for ExecuteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} replaced, {} destroyed",
            self.created, self.updated, self.replaced, self.deleted
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        if self.blocked > 0 {
            write!(f, ", {} blocked", self.blocked)?;
        }
        if self.cancelled > 0 {
            write!(f, ", {} cancelled", self.cancelled)?;
        }
        Ok(())
    }
}

/// Everything an execution produced.
#[derive(Debug, Clone, Default)]
pub struct ExecuteReport {
    /// Outcome of every step, in completion order
    pub outcomes: Vec<StepOutcome>,
    pub summary: ExecuteSummary,
}

impl ExecuteReport {
    pub fn new(outcomes: Vec<StepOutcome>) -> Self {
        let summary = ExecuteSummary::from_outcomes(&outcomes);
        Self { outcomes, summary }
    }

    /// Failed steps with their reasons.
    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, StepResult::Failed { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(address: &str, action: Action, op: StepOp, result: StepResult) -> StepOutcome {
        StepOutcome {
            address: address.parse().unwrap(),
            action,
            op,
            result,
        }
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_for_attempt_with_bad_factor() {
        for factor in [-2.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let config = RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                backoff_factor: factor,
                max_delay: Duration::from_secs(2),
            };
            for attempt in 0..3 {
                assert!(config.delay_for_attempt(attempt) <= Duration::from_secs(2));
            }
        }

        let huge = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_secs(u64::MAX / 2),
            backoff_factor: 1e300,
            max_delay: Duration::from_secs(30),
        };
        assert_eq!(huge.delay_for_attempt(2), Duration::from_secs(30));
    }

    #[test]
    fn test_summary_counts_resources_not_steps() {
        let outcomes = vec![
            outcome("aws_vpc.main", Action::Replace, StepOp::Destroy, StepResult::Succeeded),
            outcome("aws_vpc.main", Action::Replace, StepOp::Create, StepResult::Succeeded),
            outcome("aws_subnet.a", Action::Create, StepOp::Create, StepResult::Failed {
                reason: "bad cidr".into(),
                kind: Some(ProviderErrorKind::Rejected),
            }),
            outcome("aws_instance.web", Action::Create, StepOp::Create, StepResult::Blocked {
                by: "aws_subnet.a".parse().unwrap(),
            }),
            outcome("aws_s3_bucket.logs", Action::Delete, StepOp::Destroy, StepResult::Succeeded),
        ];
        let report = ExecuteReport::new(outcomes);
        assert_eq!(report.summary.replaced, 1);
        assert_eq!(report.summary.deleted, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.blocked, 1);
        assert!(!report.summary.is_success());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(
            report.summary.to_string(),
            "0 created, 0 updated, 1 replaced, 1 destroyed, 1 failed, 1 blocked"
        );
    }

    #[test]
    fn test_replace_with_failed_create_counts_as_failed() {
        let outcomes = vec![
            outcome("aws_vpc.main", Action::Replace, StepOp::Destroy, StepResult::Succeeded),
            outcome("aws_vpc.main", Action::Replace, StepOp::Create, StepResult::Failed {
                reason: "quota".into(),
                kind: None,
            }),
        ];
        let summary = ExecuteSummary::from_outcomes(&outcomes);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_changes(), 0);
    }
}
