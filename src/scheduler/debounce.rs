//! Debounce trigger coordinator.
//!
//! Collapses bursts of "re-evaluate" requests into one decision cycle. Each
//! trigger replaces the pending one, so the cycle runs once, `delay` after
//! the last trigger, against whatever context is current at that moment.
//!
//! A failed cycle (context error, gateway error, timeout, or commit error)
//! is logged and the coordinator re-arms itself with the default delay, so
//! the loop never goes silent.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context as _;
use tracing::{debug, info, warn};

use super::context::ContextProvider;
use super::dispatcher::{CommitOutcome, ExecutionDispatcher};
use super::gateway::DecisionGateway;
use super::interactions::InteractionTracker;
use super::run::RunDecision;
use super::timer::TimerSlot;
use crate::config::SchedulerConfig;

struct CoordinatorInner {
    timer: Arc<TimerSlot>,
    default_delay: Duration,
    decision_timeout: Duration,
    context: Arc<dyn ContextProvider>,
    gateway: Arc<dyn DecisionGateway>,
    dispatcher: ExecutionDispatcher,
    interactions: Option<Arc<InteractionTracker>>,
    evaluations: AtomicU64,
    stopped: AtomicBool,
}

/// Cloneable handle to the debounce timer and decision cycle.
#[derive(Clone)]
pub struct DebounceCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl DebounceCoordinator {
    /// Build the coordinator. When `interactions` is set, every decision is
    /// recorded there under the `"scheduler"` agent.
    pub fn new(
        config: &SchedulerConfig,
        context: Arc<dyn ContextProvider>,
        gateway: Arc<dyn DecisionGateway>,
        dispatcher: ExecutionDispatcher,
        interactions: Option<Arc<InteractionTracker>>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                timer: TimerSlot::new(),
                default_delay: config.debounce_delay(),
                decision_timeout: config.decision_timeout(),
                context,
                gateway,
                dispatcher,
                interactions,
                evaluations: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Request a decision cycle after `delay` (default when `None`),
    /// replacing any pending one.
    pub fn trigger(&self, delay: Option<Duration>) {
        let delay = delay.unwrap_or(self.inner.default_delay);
        if self.inner.arm(delay) {
            debug!(delay_ms = delay.as_millis() as u64, "decision cycle armed");
        }
    }

    /// `true` while a decision cycle is waiting to run.
    pub fn is_pending(&self) -> bool {
        self.inner.timer.is_armed()
    }

    /// Number of decision cycles started so far.
    pub fn evaluations(&self) -> u64 {
        self.inner.evaluations.load(Ordering::SeqCst)
    }

    pub fn default_delay(&self) -> Duration {
        self.inner.default_delay
    }

    /// Drop the pending cycle, if any.
    pub fn cancel(&self) -> bool {
        self.inner.timer.cancel()
    }

    /// Cancel the pending cycle and ignore every later trigger.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.timer.cancel();
    }
}

impl CoordinatorInner {
    fn arm(self: &Arc<Self>, delay: Duration) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        let inner: Weak<Self> = Arc::downgrade(self);
        self.timer.arm_after(delay, move |_| async move {
            if let Some(inner) = inner.upgrade() {
                inner.evaluate().await;
            }
        });
        true
    }

    async fn evaluate(self: Arc<Self>) {
        self.evaluations.fetch_add(1, Ordering::SeqCst);

        let decision = match tokio::time::timeout(self.decision_timeout, self.decide()).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                warn!(
                    retry_in_secs = self.default_delay.as_secs(),
                    "decision cycle failed: {e:#}"
                );
                self.rearm();
                return;
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.decision_timeout.as_secs(),
                    retry_in_secs = self.default_delay.as_secs(),
                    "decision cycle timed out"
                );
                self.rearm();
                return;
            }
        };

        match self.dispatcher.schedule_next_run(decision).await {
            Ok(CommitOutcome::Committed(run)) => {
                debug!(run_id = %run.id, "decision cycle committed run");
            }
            Ok(CommitOutcome::Deferred) => {
                info!("decision deferred until the executing run finishes");
            }
            Err(e) => {
                warn!(
                    retry_in_secs = self.default_delay.as_secs(),
                    "decision not committed: {e}"
                );
                self.rearm();
            }
        }
    }

    fn rearm(self: &Arc<Self>) {
        self.arm(self.default_delay);
    }

    async fn decide(&self) -> anyhow::Result<RunDecision> {
        let context = self
            .context
            .snapshot()
            .await
            .context("context snapshot failed")?;
        let decision = self
            .gateway
            .decide_next_run(&context)
            .await
            .context("decision gateway failed")?;

        if let Some(tracker) = &self.interactions {
            tracker.track(
                "scheduler",
                format!(
                    "{} recent runs, {} recent interactions",
                    context.recent_runs.len(),
                    context.recent_interactions.len()
                ),
                format!("{} at {}: {}", decision.topic, decision.next_run_at, decision.reason),
                Some(serde_json::json!({ "topic": decision.topic })),
            );
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::scheduler::context::SchedulerContext;
    use crate::scheduler::gateway::ActionInvoker;
    use crate::scheduler::run::{ActionOutput, ScheduledRun};
    use crate::scheduler::timeline::{RunTimeline, SqliteRunTimeline};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    struct EmptyContext;

    #[async_trait]
    impl ContextProvider for EmptyContext {
        async fn snapshot(&self) -> anyhow::Result<SchedulerContext> {
            Ok(SchedulerContext::empty(Utc::now()))
        }
    }

    struct CountingGateway {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl DecisionGateway for CountingGateway {
        async fn decide_next_run(&self, ctx: &SchedulerContext) -> anyhow::Result<RunDecision> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("model offline");
            }
            Ok(RunDecision::new(
                ctx.captured_at + chrono::Duration::hours(1),
                "check in",
                "check_in",
            ))
        }
    }

    struct NoopInvoker;

    #[async_trait]
    impl ActionInvoker for NoopInvoker {
        async fn execute(&self, _: &ScheduledRun) -> anyhow::Result<ActionOutput> {
            Ok(ActionOutput::default())
        }
    }

    fn coordinator(fail: bool) -> (DebounceCoordinator, Arc<CountingGateway>, Arc<SqliteRunTimeline>) {
        coordinator_with(fail, None)
    }

    fn coordinator_with(
        fail: bool,
        interactions: Option<Arc<InteractionTracker>>,
    ) -> (DebounceCoordinator, Arc<CountingGateway>, Arc<SqliteRunTimeline>) {
        let config = SchedulerConfig::default();
        let store = Arc::new(SqliteRunTimeline::open_in_memory().unwrap());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let dispatcher = ExecutionDispatcher::new(
            &config,
            Arc::clone(&store) as Arc<dyn RunTimeline>,
            Arc::new(NoopInvoker),
            tx,
        );
        let gateway = Arc::new(CountingGateway {
            calls: AtomicUsize::new(0),
            fail,
        });
        let coordinator = DebounceCoordinator::new(
            &config,
            Arc::new(EmptyContext),
            Arc::clone(&gateway) as Arc<dyn DecisionGateway>,
            dispatcher,
            interactions,
        );
        (coordinator, gateway, store)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_triggers_runs_one_cycle() {
        let (debounce, gateway, store) = coordinator(false);
        for _ in 0..3 {
            debounce.trigger(None);
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        assert!(debounce.is_pending());
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        assert_eq!(debounce.evaluations(), 1);
        assert!(!debounce.is_pending());
        assert!(store.next_scheduled().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_delay_overrides_default() {
        let (debounce, gateway, _store) = coordinator(false);
        debounce.trigger(Some(Duration::from_secs(10)));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gateway_failure_rearms_with_default_delay() {
        let (debounce, gateway, store) = coordinator(true);
        debounce.trigger(Some(Duration::from_secs(1)));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        assert!(debounce.is_pending(), "failure must re-arm the cycle");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
        assert!(store.next_scheduled().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_cycle() {
        let (debounce, gateway, _store) = coordinator(false);
        debounce.trigger(None);
        assert!(debounce.cancel());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_coordinator_ignores_triggers() {
        let (debounce, gateway, _store) = coordinator(false);
        debounce.stop();
        debounce.trigger(Some(Duration::from_secs(1)));
        assert!(!debounce.is_pending());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn decisions_are_logged_as_interactions() {
        let tracker = Arc::new(InteractionTracker::default());
        let (debounce, _gateway, _store) = coordinator_with(false, Some(Arc::clone(&tracker)));
        let clone = debounce.clone();
        clone.trigger(Some(Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_secs(2)).await;

        let logged = tracker.all();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].agent_type, "scheduler");
        assert_eq!(logged[0].metadata["topic"], "check_in");
    }
}
