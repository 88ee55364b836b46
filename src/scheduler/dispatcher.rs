//! Execution dispatcher: commits decisions and fires them.
//!
//! The dispatcher owns the single execution timer and is the only writer of
//! run status. Every store mutation and every timer arm/cancel happens under
//! one async mutex, so a commit racing with a firing timer is resolved by
//! whoever takes the lock first; the loser sees the updated status and
//! does nothing. The action itself runs outside the lock.
//!
//! While a run is executing, new decisions are parked (the newest wins) and
//! committed as soon as the run reaches a terminal state. This keeps at most
//! one run `Scheduled` or `Executing` at any time.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use super::gateway::{ActionInvoker, clamp_to_floor};
use super::reactor::SchedulerEvent;
use super::run::{RunDecision, RunStatus, RunTransition, ScheduledRun};
use super::timeline::{RunTimeline, TimelineError};
use super::timer::TimerSlot;
use crate::config::SchedulerConfig;
use crate::error::{Result, YumeError};

/// Error message recorded for runs found `Executing` at startup.
pub const INTERRUPTED_MESSAGE: &str = "interrupted before completion";

/// What [`ExecutionDispatcher::schedule_next_run`] did with a decision.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// The run was persisted and its timer armed.
    Committed(ScheduledRun),
    /// A run is executing; the decision will be committed when it finishes.
    Deferred,
}

/// The run currently backed by the execution timer.
struct ArmedRun {
    run: ScheduledRun,
    generation: u64,
}

#[derive(Default)]
struct DispatchState {
    armed: Option<ArmedRun>,
    executing: Option<String>,
    deferred: Option<RunDecision>,
    stopped: bool,
}

struct Inner {
    store: Arc<dyn RunTimeline>,
    invoker: Arc<dyn ActionInvoker>,
    timer: Arc<TimerSlot>,
    state: Mutex<DispatchState>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    floor: chrono::Duration,
    action_timeout: Duration,
    store_retry_delay: Duration,
}

/// Cloneable handle to the execution state machine.
#[derive(Clone)]
pub struct ExecutionDispatcher {
    inner: Arc<Inner>,
}

impl ExecutionDispatcher {
    pub fn new(
        config: &SchedulerConfig,
        store: Arc<dyn RunTimeline>,
        invoker: Arc<dyn ActionInvoker>,
        events: mpsc::UnboundedSender<SchedulerEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                invoker,
                timer: TimerSlot::new(),
                state: Mutex::new(DispatchState::default()),
                events,
                floor: config.min_temporal_distance(),
                action_timeout: config.action_timeout(),
                store_retry_delay: config.store_retry_delay(),
            }),
        }
    }

    /// Commit `decision` as the single pending run.
    ///
    /// Supersedes any pending run, persists the new one and arms the timer
    /// for its (floor-clamped) scheduled time.
    ///
    /// # Errors
    ///
    /// Returns [`YumeError::Store`] when the commit fails twice; the
    /// previously armed run, if any, stays armed. Returns
    /// [`YumeError::Scheduler`] after [`shutdown`](Self::shutdown).
    pub async fn schedule_next_run(&self, decision: RunDecision) -> Result<CommitOutcome> {
        let mut state = self.inner.state.lock().await;
        if state.stopped {
            return Err(YumeError::Scheduler("dispatcher is shut down".to_owned()));
        }
        if let Some(executing) = &state.executing {
            debug!(run_id = %executing, topic = %decision.topic, "run executing, deferring decision");
            state.deferred = Some(decision);
            return Ok(CommitOutcome::Deferred);
        }
        let run = self.inner.commit_locked(&mut state, decision).await?;
        Ok(CommitOutcome::Committed(run))
    }

    /// Recover after a restart.
    ///
    /// Runs left `Executing` are marked `Failed`, with the time elapsed since
    /// they started as their duration. The newest `Scheduled` run
    /// is re-armed (firing immediately if its time has passed) and any older
    /// ones are cancelled. Returns the re-armed run.
    pub async fn resume(&self) -> Result<Option<ScheduledRun>> {
        let mut state = self.inner.state.lock().await;
        let mut rearm: Option<ScheduledRun> = None;
        let now = Utc::now();

        for run in self.inner.store.active_runs()? {
            match run.status {
                RunStatus::Executing => {
                    let transition = RunTransition::Failed {
                        duration_ms: run.actual_execution_time.map(|started| {
                            u64::try_from((now - started).num_milliseconds()).unwrap_or(0)
                        }),
                        error_message: INTERRUPTED_MESSAGE.to_owned(),
                    };
                    self.inner.store.update_status(&run.id, &transition)?;
                    warn!(run_id = %run.id, topic = %run.topic, "run interrupted by restart, marked failed");
                }
                RunStatus::Scheduled if rearm.is_none() => rearm = Some(run),
                RunStatus::Scheduled => {
                    self.inner
                        .store
                        .update_status(&run.id, &RunTransition::Cancelled)?;
                    info!(run_id = %run.id, "cancelled stale scheduled run");
                }
                _ => {}
            }
        }

        if let Some(run) = &rearm {
            let generation = self.inner.arm(run);
            state.armed = Some(ArmedRun {
                run: run.clone(),
                generation,
            });
            info!(run_id = %run.id, scheduled_time = %run.scheduled_time, "resumed scheduled run");
        }
        Ok(rearm)
    }

    /// The run the timer is currently armed for.
    pub async fn armed_run(&self) -> Option<ScheduledRun> {
        let state = self.inner.state.lock().await;
        state.armed.as_ref().map(|a| a.run.clone())
    }

    /// Id of the run whose action is in flight.
    pub async fn executing_run_id(&self) -> Option<String> {
        self.inner.state.lock().await.executing.clone()
    }

    /// `true` when a decision is parked behind an executing run.
    pub async fn has_deferred(&self) -> bool {
        self.inner.state.lock().await.deferred.is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.inner.timer.is_armed()
    }

    /// Cancel the execution timer and refuse further commits. An in-flight
    /// action is left to finish.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        state.stopped = true;
        self.inner.timer.cancel();
        state.armed = None;
        state.deferred = None;
        debug!("execution dispatcher stopped");
    }
}

impl Inner {
    async fn commit_locked(
        self: &Arc<Self>,
        state: &mut DispatchState,
        decision: RunDecision,
    ) -> Result<ScheduledRun> {
        let now = Utc::now();
        let clamp = clamp_to_floor(&decision, now, self.floor)?;
        if clamp.raised {
            info!(
                requested = %clamp.requested,
                committed = %clamp.scheduled_time,
                topic = %decision.topic,
                "decision raised to temporal floor"
            );
        }

        // The timer goes first so a superseded run can never fire unchecked.
        self.timer.cancel();
        let previous = state.armed.take();

        let run = ScheduledRun::from_decision(decision, clamp.scheduled_time, now);
        let superseded = match self
            .with_store_retry("commit run", || self.store.commit(&run))
            .await
        {
            Ok(n) => n,
            Err(e) => {
                error!(run_id = %run.id, "store inconsistency: commit failed after retry: {e}");
                if let Some(previous) = previous {
                    let generation = self.arm(&previous.run);
                    state.armed = Some(ArmedRun {
                        run: previous.run,
                        generation,
                    });
                }
                return Err(YumeError::Store(e));
            }
        };

        let generation = self.arm(&run);
        state.armed = Some(ArmedRun {
            run: run.clone(),
            generation,
        });
        info!(
            run_id = %run.id,
            topic = %run.topic,
            scheduled_time = %run.scheduled_time,
            superseded,
            "committed run"
        );
        Ok(run)
    }

    fn arm(self: &Arc<Self>, run: &ScheduledRun) -> u64 {
        let inner: Weak<Self> = Arc::downgrade(self);
        let run_id = run.id.clone();
        self.timer
            .arm_at(run.scheduled_time, move |generation| async move {
                if let Some(inner) = inner.upgrade() {
                    inner.fire(run_id, generation).await;
                }
            })
    }

    async fn fire(self: Arc<Self>, run_id: String, generation: u64) {
        let started_at = Utc::now();

        let run = {
            let mut state = self.state.lock().await;
            let transition = RunTransition::Executing { started_at };
            let claimed = match self
                .with_store_retry("mark run executing", || {
                    self.store.update_status(&run_id, &transition)
                })
                .await
            {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(%run_id, "store inconsistency: cannot mark executing: {e}");
                    self.timer.is_current(generation)
                }
            };
            if !claimed {
                if state
                    .armed
                    .as_ref()
                    .is_some_and(|a| a.run.id == run_id && a.generation == generation)
                {
                    state.armed = None;
                }
                debug!(%run_id, "run no longer scheduled, skipping");
                return;
            }

            let mut run = match state.armed.take() {
                Some(armed) if armed.run.id == run_id && armed.generation == generation => {
                    armed.run
                }
                other => {
                    state.armed = other;
                    match self.store.find_by_id(&run_id) {
                        Ok(Some(run)) => run,
                        Ok(None) | Err(_) => {
                            error!(%run_id, "fired run is missing from the timeline");
                            return;
                        }
                    }
                }
            };
            run.apply(&transition, started_at);
            state.executing = Some(run_id.clone());
            run
        };

        info!(%run_id, topic = %run.topic, "executing run");
        let transition = self.invoke(&run).await;
        let status = transition.target();

        {
            let mut state = self.state.lock().await;
            match self
                .with_store_retry("record run outcome", || {
                    self.store.update_status(&run_id, &transition)
                })
                .await
            {
                Ok(true) => {}
                Ok(false) => warn!(%run_id, "run left executing state early, outcome not recorded"),
                Err(e) => error!(%run_id, "store inconsistency: cannot record {status}: {e}"),
            }
            state.executing = None;

            if let Some(decision) = state.deferred.take() {
                if let Err(e) = self.commit_locked(&mut state, decision).await {
                    warn!("deferred decision not committed: {e}");
                }
            }
        }

        match &transition {
            RunTransition::Failed { error_message, .. } => {
                warn!(%run_id, "run failed: {error_message}");
            }
            _ => info!(%run_id, "run completed"),
        }
        if self
            .events
            .send(SchedulerEvent::RunExecuted { run_id, status })
            .is_err()
        {
            debug!("event reactor gone, run-executed signal dropped");
        }
    }

    /// Run the action in its own task so a panic is recorded as a failure.
    async fn invoke(&self, run: &ScheduledRun) -> RunTransition {
        let invoker = Arc::clone(&self.invoker);
        let action_run = run.clone();
        let clock = tokio::time::Instant::now();
        let mut task = tokio::spawn(async move { invoker.execute(&action_run).await });

        let outcome = tokio::time::timeout(self.action_timeout, &mut task).await;
        let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(Ok(Ok(output))) => RunTransition::Completed {
                duration_ms,
                result_payload: output.result_payload,
            },
            Ok(Ok(Err(e))) => RunTransition::Failed {
                duration_ms: Some(duration_ms),
                error_message: format!("{e:#}"),
            },
            Ok(Err(join_error)) => RunTransition::Failed {
                duration_ms: Some(duration_ms),
                error_message: format!("action task aborted: {join_error}"),
            },
            Err(_) => {
                task.abort();
                RunTransition::Failed {
                    duration_ms: Some(duration_ms),
                    error_message: YumeError::Timeout {
                        what: "action invoker".to_owned(),
                        secs: self.action_timeout.as_secs(),
                    }
                    .to_string(),
                }
            }
        }
    }

    /// Run a store write, retrying once after a short pause.
    async fn with_store_retry<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> std::result::Result<T, TimelineError>,
    ) -> std::result::Result<T, TimelineError> {
        match op() {
            Ok(value) => Ok(value),
            Err(first) => {
                warn!("store write failed ({what}), retrying once: {first}");
                tokio::time::sleep(self.store_retry_delay).await;
                op()
            }
        }
    }
}
