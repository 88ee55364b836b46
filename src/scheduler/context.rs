//! Decision context snapshots.
//!
//! The scheduler hands whatever a [`ContextProvider`] returns straight to the
//! decision gateway without looking inside it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::interactions::{AgentInteraction, InteractionTracker};
use super::run::ScheduledRun;
use super::timeline::RunTimeline;

/// Read-only view of the world at decision time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerContext {
    pub captured_at: DateTime<Utc>,
    /// Most recently updated runs first.
    pub recent_runs: Vec<ScheduledRun>,
    /// Newest first.
    pub recent_interactions: Vec<AgentInteraction>,
    /// Host-supplied payload (plans, location, memory summaries, ...).
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl SchedulerContext {
    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            recent_runs: Vec::new(),
            recent_interactions: Vec::new(),
            extra: serde_json::Value::Null,
        }
    }
}

/// Supplies the snapshot the decision gateway reads.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn snapshot(&self) -> anyhow::Result<SchedulerContext>;
}

/// Builds the context from run history and tracked interactions.
pub struct HistoryContextProvider {
    store: Arc<dyn RunTimeline>,
    interactions: Option<Arc<InteractionTracker>>,
    run_limit: usize,
    interaction_limit: usize,
    extra: serde_json::Value,
}

impl HistoryContextProvider {
    pub fn new(store: Arc<dyn RunTimeline>, run_limit: usize) -> Self {
        Self {
            store,
            interactions: None,
            run_limit,
            interaction_limit: 0,
            extra: serde_json::Value::Null,
        }
    }

    pub fn with_interactions(mut self, tracker: Arc<InteractionTracker>, limit: usize) -> Self {
        self.interactions = Some(tracker);
        self.interaction_limit = limit;
        self
    }

    /// Static payload attached to every snapshot.
    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = extra;
        self
    }
}

#[async_trait]
impl ContextProvider for HistoryContextProvider {
    async fn snapshot(&self) -> anyhow::Result<SchedulerContext> {
        let recent_runs = self.store.recent(self.run_limit, &[])?;
        let recent_interactions = self
            .interactions
            .as_ref()
            .map(|t| t.recent(self.interaction_limit))
            .unwrap_or_default();

        Ok(SchedulerContext {
            captured_at: Utc::now(),
            recent_runs,
            recent_interactions,
            extra: self.extra.clone(),
        })
    }
}
