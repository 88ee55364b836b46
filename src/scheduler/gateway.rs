//! External collaborator seams and decision post-processing.
//!
//! The [`DecisionGateway`] proposes when the assistant should act next; the
//! [`ActionInvoker`] performs the action when a run fires. Both are opaque
//! and may fail; the scheduler bounds them with timeouts and turns failures
//! into recorded outcomes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;

use super::context::SchedulerContext;
use super::run::{ActionOutput, RunDecision, ScheduledRun};
use crate::error::{Result, YumeError};

/// Computes the next desired run from the current context.
#[async_trait]
pub trait DecisionGateway: Send + Sync {
    async fn decide_next_run(&self, context: &SchedulerContext) -> anyhow::Result<RunDecision>;
}

/// Performs the assistant action for a fired run.
///
/// Duration is measured by the caller.
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    async fn execute(&self, run: &ScheduledRun) -> anyhow::Result<ActionOutput>;
}

// ---------------------------------------------------------------------------
// Temporal floor
// ---------------------------------------------------------------------------

/// Result of applying the temporal floor to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloorClamp {
    /// What the gateway asked for.
    pub requested: DateTime<Utc>,
    /// What will be committed.
    pub scheduled_time: DateTime<Utc>,
    /// `true` when the requested time was raised to the floor.
    pub raised: bool,
}

/// Raise `decision.next_run_at` to at least `now + floor`.
///
/// # Errors
///
/// Returns [`YumeError::Decision`] when `now + floor` is not representable.
pub fn clamp_to_floor(
    decision: &RunDecision,
    now: DateTime<Utc>,
    floor: Duration,
) -> Result<FloorClamp> {
    let earliest = now.checked_add_signed(floor).ok_or_else(|| {
        YumeError::Decision(format!(
            "temporal floor of {}s is out of range",
            floor.num_seconds()
        ))
    })?;
    let requested = decision.next_run_at;
    let clamp = if requested < earliest {
        FloorClamp {
            requested,
            scheduled_time: earliest,
            raised: true,
        }
    } else {
        FloorClamp {
            requested,
            scheduled_time: requested,
            raised: false,
        }
    };
    Ok(clamp)
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct DecisionReply {
    next_run_time: String,
    #[serde(default)]
    reason: String,
    #[serde(default = "default_topic")]
    topic: String,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

fn default_topic() -> String {
    "general".to_owned()
}

impl RunDecision {
    /// Parse a gateway's JSON reply.
    ///
    /// `next_run_time` is RFC 3339; a timestamp without an offset is read as
    /// local time. Structured `details` are kept as their JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`YumeError::Decision`] for malformed JSON, an unparseable
    /// time, or an empty reason.
    pub fn from_json(text: &str) -> Result<Self> {
        let reply: DecisionReply = serde_json::from_str(text)
            .map_err(|e| YumeError::Decision(format!("malformed decision: {e}")))?;

        if reply.reason.trim().is_empty() {
            return Err(YumeError::Decision("decision has no reason".to_owned()));
        }
        let next_run_at = parse_run_time(&reply.next_run_time)?;
        let details = reply.details.and_then(|d| match d {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        });

        Ok(Self {
            next_run_at,
            reason: reply.reason,
            topic: reply.topic,
            details,
        })
    }
}

fn parse_run_time(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| YumeError::Decision(format!("invalid next_run_time {raw:?}: {e}")))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|at| at.with_timezone(&Utc))
        .ok_or_else(|| YumeError::Decision(format!("nonexistent local time {raw:?}")))
}

// ---------------------------------------------------------------------------
// Gateway combinators
// ---------------------------------------------------------------------------

/// Always proposes `now + offset`.
pub struct FixedDelayGateway {
    offset: Duration,
    reason: String,
    topic: String,
}

impl FixedDelayGateway {
    pub fn new(offset: Duration) -> Self {
        Self {
            offset,
            reason: "periodic check-in".to_owned(),
            topic: "check_in".to_owned(),
        }
    }

    /// One hour ahead.
    pub fn hourly() -> Self {
        Self::new(Duration::hours(1))
    }

    pub fn with_reason(mut self, reason: impl Into<String>, topic: impl Into<String>) -> Self {
        self.reason = reason.into();
        self.topic = topic.into();
        self
    }
}

#[async_trait]
impl DecisionGateway for FixedDelayGateway {
    async fn decide_next_run(&self, context: &SchedulerContext) -> anyhow::Result<RunDecision> {
        Ok(RunDecision::new(
            context.captured_at + self.offset,
            self.reason.clone(),
            self.topic.clone(),
        ))
    }
}

/// Asks every gateway and keeps the earliest successful proposal.
///
/// Used to let a deterministic reminder source win over a slower
/// heuristic whenever it wants to act sooner.
pub struct SoonestDecision {
    gateways: Vec<Arc<dyn DecisionGateway>>,
}

impl SoonestDecision {
    pub fn new(gateways: Vec<Arc<dyn DecisionGateway>>) -> Self {
        Self { gateways }
    }
}

#[async_trait]
impl DecisionGateway for SoonestDecision {
    async fn decide_next_run(&self, context: &SchedulerContext) -> anyhow::Result<RunDecision> {
        let mut best: Option<RunDecision> = None;
        let mut last_error = None;

        for gateway in &self.gateways {
            match gateway.decide_next_run(context).await {
                Ok(decision) => {
                    if best
                        .as_ref()
                        .is_none_or(|b| decision.next_run_at < b.next_run_at)
                    {
                        best = Some(decision);
                    }
                }
                Err(e) => {
                    tracing::warn!("decision source failed: {e:#}");
                    last_error = Some(e);
                }
            }
        }

        match (best, last_error) {
            (Some(decision), _) => Ok(decision),
            (None, Some(e)) => Err(e),
            (None, None) => Err(anyhow::anyhow!("no decision sources configured")),
        }
    }
}

/// Falls back to a second gateway when the primary fails.
pub struct FallbackGateway {
    primary: Arc<dyn DecisionGateway>,
    fallback: Arc<dyn DecisionGateway>,
}

impl FallbackGateway {
    pub fn new(primary: Arc<dyn DecisionGateway>, fallback: Arc<dyn DecisionGateway>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl DecisionGateway for FallbackGateway {
    async fn decide_next_run(&self, context: &SchedulerContext) -> anyhow::Result<RunDecision> {
        match self.primary.decide_next_run(context).await {
            Ok(decision) => Ok(decision),
            Err(e) => {
                tracing::warn!("primary decision source failed, using fallback: {e:#}");
                self.fallback.decide_next_run(context).await
            }
        }
    }
}
