//! Routes host commands onto a running scheduler.

use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::contract::{CommandEnvelope, CommandName, ContractError, ResponseEnvelope};
use crate::error::Result;
use crate::scheduler::{RunStatus, SchedulerHandle};

/// Default page size for run queries.
pub const DEFAULT_LIMIT: usize = 20;
/// Default statistics window in days.
pub const DEFAULT_STATISTICS_DAYS: u32 = 7;

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_days() -> u32 {
    DEFAULT_STATISTICS_DAYS
}

#[derive(Debug, Default, Deserialize)]
struct TriggerPayload {
    delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PlanChangedPayload {
    date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct RecentPayload {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    status: Option<RunStatus>,
    #[serde(default)]
    statuses: Vec<RunStatus>,
}

impl Default for RecentPayload {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            status: None,
            statuses: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LimitPayload {
    #[serde(default = "default_limit")]
    limit: usize,
}

impl Default for LimitPayload {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunIdPayload {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TopicPayload {
    topic: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct StatisticsPayload {
    #[serde(default = "default_days")]
    days: u32,
}

impl Default for StatisticsPayload {
    fn default() -> Self {
        Self {
            days: DEFAULT_STATISTICS_DAYS,
        }
    }
}

/// Optional payloads: `null` means "all defaults".
fn optional_payload<T: DeserializeOwned + Default>(
    value: &serde_json::Value,
) -> std::result::Result<T, ContractError> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone()).map_err(|e| ContractError::invalid_payload(e.to_string()))
}

fn required_payload<T: DeserializeOwned>(
    value: &serde_json::Value,
) -> std::result::Result<T, ContractError> {
    serde_json::from_value(value.clone()).map_err(|e| ContractError::invalid_payload(e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| crate::YumeError::Channel(format!("cannot serialize response: {e}")))
}

/// Applies [`CommandEnvelope`]s to a [`SchedulerHandle`].
#[derive(Clone)]
pub struct CommandHandler {
    scheduler: SchedulerHandle,
}

impl CommandHandler {
    pub fn new(scheduler: SchedulerHandle) -> Self {
        Self { scheduler }
    }

    /// Handle one command. Failures become error responses.
    pub async fn handle(&self, envelope: CommandEnvelope) -> ResponseEnvelope {
        if let Err(e) = envelope.validate() {
            return ResponseEnvelope::error(envelope.request_id, e.to_string());
        }
        debug!(command = envelope.command.as_str(), request_id = %envelope.request_id, "host command");

        match self.dispatch(envelope.command, &envelope.payload).await {
            Ok(payload) => ResponseEnvelope::ok(envelope.request_id, payload),
            Err(e) => ResponseEnvelope::error(envelope.request_id, e.to_string()),
        }
    }

    async fn dispatch(
        &self,
        command: CommandName,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let s = &self.scheduler;
        match command {
            CommandName::HostPing => Ok(serde_json::json!({ "pong": true })),
            CommandName::RuntimeStop => Ok(serde_json::json!({ "stopping": true })),
            CommandName::SchedulerTrigger => {
                let p: TriggerPayload = optional_payload(payload)?;
                s.trigger(p.delay_secs.map(Duration::from_secs));
                Ok(serde_json::json!({ "accepted": true }))
            }
            CommandName::SchedulerPlanChanged => {
                let p: PlanChangedPayload = required_payload(payload)?;
                s.on_plan_changed(p.date)?;
                Ok(serde_json::json!({ "accepted": true }))
            }
            CommandName::SchedulerUserInteraction => {
                s.on_user_interaction()?;
                Ok(serde_json::json!({ "accepted": true }))
            }
            CommandName::RunsRecent => {
                let p: RecentPayload = optional_payload(payload)?;
                let mut statuses = p.statuses;
                statuses.extend(p.status);
                to_json(&s.get_recent_runs_with(p.limit, &statuses)?)
            }
            CommandName::RunsFailed => {
                let p: LimitPayload = optional_payload(payload)?;
                to_json(&s.get_failed_runs(p.limit)?)
            }
            CommandName::RunsGet => {
                let p: RunIdPayload = required_payload(payload)?;
                to_json(&s.get_run_by_id(&p.id)?)
            }
            CommandName::RunsByTopic => {
                let p: TopicPayload = required_payload(payload)?;
                to_json(&s.get_runs_by_topic(&p.topic, p.limit)?)
            }
            CommandName::RunsNext => to_json(&s.next_scheduled_run()?),
            CommandName::RunsStatistics => {
                let p: StatisticsPayload = optional_payload(payload)?;
                let stats = s.statistics(p.days)?;
                let completed = s.completed_runs_count(p.days)?;
                Ok(serde_json::json!({ "statistics": to_json(&stats)?, "completed": completed }))
            }
            CommandName::InteractionsList => {
                let p: LimitPayload = optional_payload(payload)?;
                to_json(&s.interactions().recent(p.limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn null_payload_uses_defaults() {
        let p: RecentPayload = optional_payload(&serde_json::Value::Null).unwrap();
        assert_eq!(p.limit, DEFAULT_LIMIT);
        assert!(p.status.is_none());
        let p: StatisticsPayload = optional_payload(&serde_json::Value::Null).unwrap();
        assert_eq!(p.days, 7);
    }

    #[test]
    fn recent_payload_accepts_status_filters() {
        let p: RecentPayload = optional_payload(&serde_json::json!({
            "limit": 5,
            "statuses": ["failed", "cancelled"]
        }))
        .unwrap();
        assert_eq!(p.limit, 5);
        assert_eq!(p.statuses, vec![RunStatus::Failed, RunStatus::Cancelled]);
    }

    #[test]
    fn required_payload_reports_missing_fields() {
        let err = required_payload::<RunIdPayload>(&serde_json::json!({})).unwrap_err();
        assert_eq!(err.kind, super::super::contract::ContractErrorKind::InvalidPayload);
    }

    struct Idle;

    #[async_trait::async_trait]
    impl crate::scheduler::ActionInvoker for Idle {
        async fn execute(
            &self,
            _run: &crate::scheduler::ScheduledRun,
        ) -> anyhow::Result<crate::scheduler::ActionOutput> {
            Ok(crate::scheduler::ActionOutput::default())
        }
    }

    async fn handler() -> (CommandHandler, SchedulerHandle) {
        let store = std::sync::Arc::new(
            crate::scheduler::SqliteRunTimeline::open_in_memory().unwrap(),
        );
        let scheduler = crate::scheduler::AdaptiveScheduler::new(
            crate::config::SchedulerConfig::default(),
            store,
            std::sync::Arc::new(crate::scheduler::FixedDelayGateway::hourly()),
            std::sync::Arc::new(Idle),
        )
        .start()
        .await
        .unwrap();
        (CommandHandler::new(scheduler.clone()), scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn statistics_with_huge_window_answers() {
        let (handler, scheduler) = handler().await;

        let response = handler
            .handle(CommandEnvelope::new(
                "s1",
                CommandName::RunsStatistics,
                serde_json::json!({ "days": 4_000_000_000_u32 }),
            ))
            .await;

        assert!(response.ok, "{:?}", response.error);
        assert_eq!(response.payload["statistics"]["period_days"], 4_000_000_000_u32);
        assert_eq!(response.payload["completed"], 0);
        scheduler.shutdown().await;
    }

    #[test]
    fn plan_changed_parses_iso_date() {
        let p: PlanChangedPayload =
            required_payload(&serde_json::json!({ "date": "2026-04-02" })).unwrap();
        assert_eq!(p.date, NaiveDate::from_ymd_opt(2026, 4, 2).unwrap());
    }
}
