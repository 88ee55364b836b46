//! Event reactor: turns lifecycle signals into debounce triggers.
//!
//! Signals arrive as [`SchedulerEvent`]s over an unbounded channel, which is
//! also how the dispatcher reports a finished run. The loop restarts itself
//! by message passing rather than by calling back into the scheduler.

use std::time::Duration;

use chrono::{Local, NaiveDate};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::debounce::DebounceCoordinator;
use super::run::RunStatus;

/// Something happened that warrants re-evaluating the next run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// The plan for `date` changed.
    PlanChanged { date: NaiveDate },
    /// A run reached `Completed` or `Failed`.
    RunExecuted { run_id: String, status: RunStatus },
    /// The user talked to the assistant.
    UserInteraction,
}

/// Stateless mapping from events to triggers.
#[derive(Clone)]
pub struct EventReactor {
    debounce: DebounceCoordinator,
    urgent_delay: Duration,
}

impl EventReactor {
    pub fn new(debounce: DebounceCoordinator, urgent_delay: Duration) -> Self {
        Self {
            debounce,
            urgent_delay,
        }
    }

    /// Plans for today or tomorrow use the urgent delay.
    pub fn on_plan_changed(&self, date: NaiveDate) {
        let today = Local::now().date_naive();
        let delay = plan_change_delay(date, today, self.urgent_delay);
        debug!(%date, urgent = delay.is_some(), "plan changed");
        self.debounce.trigger(delay);
    }

    pub fn on_run_executed(&self) {
        self.debounce.trigger(None);
    }

    pub fn on_user_interaction(&self) {
        self.debounce.trigger(None);
    }

    pub fn handle(&self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::PlanChanged { date } => self.on_plan_changed(date),
            SchedulerEvent::RunExecuted { run_id, status } => {
                debug!(%run_id, %status, "run executed, re-evaluating");
                self.on_run_executed();
            }
            SchedulerEvent::UserInteraction => self.on_user_interaction(),
        }
    }

    /// Consume events until the channel closes or `cancel` fires.
    pub fn spawn(
        self,
        mut events: mpsc::UnboundedReceiver<SchedulerEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => self.handle(event),
                        None => break,
                    },
                }
            }
            debug!("event reactor stopped");
        })
    }
}

/// Debounce override for a plan change on `date`: urgent for today and
/// tomorrow, default otherwise.
pub fn plan_change_delay(date: NaiveDate, today: NaiveDate, urgent: Duration) -> Option<Duration> {
    let days_ahead = (date - today).num_days();
    (0..=1).contains(&days_ahead).then_some(urgent)
}
