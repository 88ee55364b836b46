//! Wiring and public facade for the adaptive interaction scheduler.
//!
//! [`AdaptiveScheduler`] assembles the store, collaborators, dispatcher,
//! debounce coordinator, reactor and optional janitor. [`start`] returns a
//! [`SchedulerHandle`], the only surface the rest of the assistant talks to.
//!
//! [`start`]: AdaptiveScheduler::start

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::context::{ContextProvider, HistoryContextProvider};
use super::debounce::DebounceCoordinator;
use super::dispatcher::ExecutionDispatcher;
use super::gateway::{ActionInvoker, DecisionGateway};
use super::interactions::InteractionTracker;
use super::janitor::spawn_retention_janitor;
use super::reactor::{EventReactor, SchedulerEvent};
use super::run::{RunStatistics, RunStatus, ScheduledRun};
use super::timeline::{RunTimeline, days_before};
use crate::config::SchedulerConfig;
use crate::error::{Result, YumeError};

/// Builder for a running scheduler.
pub struct AdaptiveScheduler {
    config: SchedulerConfig,
    store: Arc<dyn RunTimeline>,
    gateway: Arc<dyn DecisionGateway>,
    invoker: Arc<dyn ActionInvoker>,
    context: Option<Arc<dyn ContextProvider>>,
    interactions: Arc<InteractionTracker>,
    retention: Option<(u32, Duration)>,
}

impl AdaptiveScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn RunTimeline>,
        gateway: Arc<dyn DecisionGateway>,
        invoker: Arc<dyn ActionInvoker>,
    ) -> Self {
        Self {
            config,
            store,
            gateway,
            invoker,
            context: None,
            interactions: Arc::new(InteractionTracker::default()),
            retention: None,
        }
    }

    /// Replace the default history-backed context provider.
    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context = Some(provider);
        self
    }

    /// Share an interaction tracker with the rest of the assistant.
    pub fn with_interaction_tracker(mut self, tracker: Arc<InteractionTracker>) -> Self {
        self.interactions = tracker;
        self
    }

    /// Prune terminal runs older than `days`, sweeping every `interval`.
    pub fn with_retention(mut self, days: u32, interval: Duration) -> Self {
        self.retention = Some((days, interval));
        self
    }

    /// Recover persisted state and start the control loop.
    ///
    /// If no pending run was recovered, a first decision cycle is armed
    /// with the default debounce delay.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read during recovery.
    pub async fn start(self) -> Result<SchedulerHandle> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let dispatcher = ExecutionDispatcher::new(
            &self.config,
            Arc::clone(&self.store),
            self.invoker,
            events_tx.clone(),
        );

        let context = self.context.unwrap_or_else(|| {
            Arc::new(
                HistoryContextProvider::new(Arc::clone(&self.store), self.config.context_recent_runs)
                    .with_interactions(
                        Arc::clone(&self.interactions),
                        self.config.context_recent_interactions,
                    ),
            )
        });

        let debounce = DebounceCoordinator::new(
            &self.config,
            context,
            self.gateway,
            dispatcher.clone(),
            Some(Arc::clone(&self.interactions)),
        );
        let reactor = EventReactor::new(debounce.clone(), self.config.urgent_debounce_delay());

        let resumed = dispatcher.resume().await?;

        let cancel = CancellationToken::new();
        let mut tasks = vec![reactor.spawn(events_rx, cancel.clone())];
        if let Some((days, interval)) = self.retention {
            tasks.push(spawn_retention_janitor(
                Arc::clone(&self.store),
                days,
                interval,
                cancel.clone(),
            ));
        }

        match &resumed {
            Some(run) => info!(run_id = %run.id, "scheduler started with pending run"),
            None => {
                debounce.trigger(None);
                info!("scheduler started, initial evaluation armed");
            }
        }

        Ok(SchedulerHandle {
            store: self.store,
            dispatcher,
            debounce,
            events: events_tx,
            interactions: self.interactions,
            cancel,
            tasks: Arc::new(Mutex::new(tasks)),
        })
    }
}

/// Handle to a running scheduler. Cheap to clone.
#[derive(Clone)]
pub struct SchedulerHandle {
    store: Arc<dyn RunTimeline>,
    dispatcher: ExecutionDispatcher,
    debounce: DebounceCoordinator,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    interactions: Arc<InteractionTracker>,
    cancel: CancellationToken,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SchedulerHandle {
    /// Fire-and-forget re-evaluation request.
    pub fn trigger(&self, delay: Option<Duration>) {
        self.debounce.trigger(delay);
    }

    pub fn on_plan_changed(&self, date: NaiveDate) -> Result<()> {
        self.emit(SchedulerEvent::PlanChanged { date })
    }

    pub fn on_user_interaction(&self) -> Result<()> {
        self.emit(SchedulerEvent::UserInteraction)
    }

    /// Sender for components that raise lifecycle events themselves.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<SchedulerEvent> {
        self.events.clone()
    }

    fn emit(&self, event: SchedulerEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| YumeError::Channel("scheduler event loop has stopped".to_owned()))
    }

    // -- read-only queries ---------------------------------------------------

    /// Most recently updated runs, optionally filtered by one status.
    pub fn get_recent_runs(
        &self,
        limit: usize,
        status: Option<RunStatus>,
    ) -> Result<Vec<ScheduledRun>> {
        let filter: &[RunStatus] = match &status {
            Some(s) => std::slice::from_ref(s),
            None => &[],
        };
        self.get_recent_runs_with(limit, filter)
    }

    /// Most recently updated runs with any of `statuses` (all when empty).
    pub fn get_recent_runs_with(
        &self,
        limit: usize,
        statuses: &[RunStatus],
    ) -> Result<Vec<ScheduledRun>> {
        Ok(self.store.recent(limit, statuses)?)
    }

    pub fn get_run_by_id(&self, id: &str) -> Result<Option<ScheduledRun>> {
        Ok(self.store.find_by_id(id)?)
    }

    pub fn get_failed_runs(&self, limit: usize) -> Result<Vec<ScheduledRun>> {
        Ok(self.store.failed(limit)?)
    }

    pub fn get_runs_by_topic(&self, topic: &str, limit: usize) -> Result<Vec<ScheduledRun>> {
        Ok(self.store.find_by_topic(topic, limit)?)
    }

    pub fn next_scheduled_run(&self) -> Result<Option<ScheduledRun>> {
        Ok(self.store.next_scheduled()?)
    }

    /// Aggregates over runs created in the last `days` days.
    pub fn statistics(&self, days: u32) -> Result<RunStatistics> {
        Ok(self.store.statistics(days, Utc::now())?)
    }

    /// Runs completed in the last `days` days.
    pub fn completed_runs_count(&self, days: u32) -> Result<u64> {
        let since = days_before(Utc::now(), days);
        Ok(self
            .store
            .count_with_status_since(RunStatus::Completed, since)?)
    }

    pub fn interactions(&self) -> Arc<InteractionTracker> {
        Arc::clone(&self.interactions)
    }

    pub fn is_evaluation_pending(&self) -> bool {
        self.debounce.is_pending()
    }

    /// Number of decision cycles run since start.
    pub fn evaluations(&self) -> u64 {
        self.debounce.evaluations()
    }

    pub fn dispatcher(&self) -> &ExecutionDispatcher {
        &self.dispatcher
    }

    /// Stop timers and background tasks. An in-flight action may finish
    /// but no new run is committed or fired afterwards.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.debounce.stop();
        self.dispatcher.shutdown().await;

        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for task in tasks {
            if let Err(e) = task.await {
                tracing::debug!("scheduler task ended abnormally: {e}");
            }
        }
        info!("scheduler stopped");
    }
}
