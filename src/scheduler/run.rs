//! Scheduled run definitions.
//!
//! A [`ScheduledRun`] is one entry on the run timeline. Its [`RunStatus`]
//! only moves along the edges encoded by [`RunTransition`]:
//!
//! ```text
//! Scheduled ──► Executing ──► Completed
//!     │                  └──► Failed
//!     └──► Cancelled   (supersession only)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a scheduled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Scheduled,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [RunStatus; 5] = [
        RunStatus::Scheduled,
        RunStatus::Executing,
        RunStatus::Completed,
        RunStatus::Failed,
        RunStatus::Cancelled,
    ];

    /// Stable storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `true` once the run can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// `true` for the statuses that count against the single active timeline.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Scheduled | Self::Executing)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown run status: {s}"))
    }
}

/// One committed future action of the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledRun {
    pub id: String,
    /// Instant the run is committed to fire.
    pub scheduled_time: DateTime<Utc>,
    /// Set when the timer actually fired.
    pub actual_execution_time: Option<DateTime<Utc>>,
    pub reason: String,
    pub topic: String,
    pub details: Option<String>,
    pub status: RunStatus,
    /// Present only for `Failed`.
    pub error_message: Option<String>,
    /// Wall-clock duration of the action; present only for `Completed`/`Failed`.
    pub execution_duration_ms: Option<u64>,
    /// Action output; present only for `Completed`.
    pub result_payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledRun {
    /// Build a fresh `Scheduled` run from a decision whose time has already
    /// been clamped to the temporal floor.
    pub fn from_decision(
        decision: RunDecision,
        scheduled_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_run_id(),
            scheduled_time,
            actual_execution_time: None,
            reason: decision.reason,
            topic: decision.topic,
            details: decision.details,
            status: RunStatus::Scheduled,
            error_message: None,
            execution_duration_ms: None,
            result_payload: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a transition to this in-memory copy, mirroring what the store does.
    ///
    /// Returns `false` (leaving the run untouched) when the transition is not
    /// legal from the current status.
    pub fn apply(&mut self, transition: &RunTransition, at: DateTime<Utc>) -> bool {
        if self.status != transition.source() {
            return false;
        }
        match transition {
            RunTransition::Executing { started_at } => {
                self.actual_execution_time = Some(*started_at);
            }
            RunTransition::Completed {
                duration_ms,
                result_payload,
            } => {
                self.execution_duration_ms = Some(*duration_ms);
                self.result_payload = Some(result_payload.clone());
            }
            RunTransition::Failed {
                duration_ms,
                error_message,
            } => {
                self.execution_duration_ms = *duration_ms;
                self.error_message = Some(error_message.clone());
            }
            RunTransition::Cancelled => {}
        }
        self.status = transition.target();
        self.updated_at = at;
        true
    }
}

/// A status change together with the fields it records.
#[derive(Debug, Clone, PartialEq)]
pub enum RunTransition {
    /// The timer fired and the action is about to be invoked.
    Executing { started_at: DateTime<Utc> },
    /// The action returned successfully.
    Completed {
        duration_ms: u64,
        result_payload: String,
    },
    /// The action raised or timed out. Duration is absent when the run
    /// never reached the invoker (e.g. interrupted by a restart).
    Failed {
        duration_ms: Option<u64>,
        error_message: String,
    },
    /// Superseded by a newer commit before firing.
    Cancelled,
}

impl RunTransition {
    /// The only status this transition may start from.
    pub fn source(&self) -> RunStatus {
        match self {
            Self::Executing { .. } | Self::Cancelled => RunStatus::Scheduled,
            Self::Completed { .. } | Self::Failed { .. } => RunStatus::Executing,
        }
    }

    /// The status the run ends up in.
    pub fn target(&self) -> RunStatus {
        match self {
            Self::Executing { .. } => RunStatus::Executing,
            Self::Completed { .. } => RunStatus::Completed,
            Self::Failed { .. } => RunStatus::Failed,
            Self::Cancelled => RunStatus::Cancelled,
        }
    }
}

/// What the decision gateway proposes for the next run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDecision {
    pub next_run_at: DateTime<Utc>,
    pub reason: String,
    pub topic: String,
    #[serde(default)]
    pub details: Option<String>,
}

impl RunDecision {
    pub fn new(
        next_run_at: DateTime<Utc>,
        reason: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            next_run_at,
            reason: reason.into(),
            topic: topic.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Output of a successful action invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    pub result_payload: String,
}

impl ActionOutput {
    pub fn new(result_payload: impl Into<String>) -> Self {
        Self {
            result_payload: result_payload.into(),
        }
    }
}

/// Aggregate view of the run timeline over a period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub period_days: u32,
    pub total_runs: u64,
    pub completed_runs: u64,
    pub failed_runs: u64,
    pub cancelled_runs: u64,
    pub scheduled_runs: u64,
    /// Completed share of all runs created in the period, in percent.
    pub success_rate: f64,
    pub average_execution_duration_ms: u64,
}

/// Generate a new opaque run id.
pub fn new_run_id() -> String {
    format!("run-{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::Duration;

    fn sample_run() -> ScheduledRun {
        let now = Utc::now();
        ScheduledRun::from_decision(
            RunDecision::new(now + Duration::hours(1), "check-in", "daily_summary")
                .with_details("summarise the day"),
            now + Duration::hours(1),
            now,
        )
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in RunStatus::ALL {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn terminal_and_active_partition_statuses() {
        for status in RunStatus::ALL {
            assert_ne!(status.is_terminal(), status.is_active(), "{status}");
        }
    }

    #[test]
    fn from_decision_starts_scheduled_with_no_outcome() {
        let run = sample_run();
        assert!(run.id.starts_with("run-"));
        assert_eq!(run.status, RunStatus::Scheduled);
        assert_eq!(run.reason, "check-in");
        assert_eq!(run.details.as_deref(), Some("summarise the day"));
        assert!(run.actual_execution_time.is_none());
        assert!(run.execution_duration_ms.is_none());
        assert!(run.result_payload.is_none());
        assert!(run.error_message.is_none());
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(new_run_id(), new_run_id());
    }

    #[test]
    fn apply_follows_legal_edges_only() {
        let mut run = sample_run();
        let at = Utc::now();

        // Cannot complete a run that never started.
        let complete = RunTransition::Completed {
            duration_ms: 12,
            result_payload: "sent".to_owned(),
        };
        assert!(!run.apply(&complete, at));
        assert_eq!(run.status, RunStatus::Scheduled);

        assert!(run.apply(&RunTransition::Executing { started_at: at }, at));
        assert_eq!(run.actual_execution_time, Some(at));

        // Executing runs cannot be cancelled.
        assert!(!run.apply(&RunTransition::Cancelled, at));

        assert!(run.apply(&complete, at));
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.execution_duration_ms, Some(12));
        assert_eq!(run.result_payload.as_deref(), Some("sent"));

        // Terminal runs are immutable.
        assert!(!run.apply(
            &RunTransition::Failed {
                duration_ms: None,
                error_message: "late".to_owned(),
            },
            at
        ));
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn transition_sources_match_state_machine() {
        let at = Utc::now();
        assert_eq!(
            RunTransition::Executing { started_at: at }.source(),
            RunStatus::Scheduled
        );
        assert_eq!(RunTransition::Cancelled.source(), RunStatus::Scheduled);
        assert_eq!(
            RunTransition::Failed {
                duration_ms: Some(1),
                error_message: "x".to_owned()
            }
            .source(),
            RunStatus::Executing
        );
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
