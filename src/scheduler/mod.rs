//! Adaptive interaction scheduler.
//!
//! Decides when the assistant should act next and turns that decision into
//! a reliably fired, auditable run:
//!
//! ```text
//! event ─► EventReactor ─► DebounceCoordinator ─► DecisionGateway
//!                ▲                                      │ clamp to floor
//!                │                                      ▼
//!        RunExecuted ◄── ActionInvoker ◄── ExecutionDispatcher ─► RunTimeline
//! ```
//!
//! At most one run is `Scheduled` or `Executing` at any time; committing a
//! new run supersedes (cancels) the pending one.

pub mod context;
pub mod debounce;
pub mod dispatcher;
pub mod gateway;
pub mod interactions;
pub mod janitor;
pub mod reactor;
pub mod reminders;
pub mod run;
mod schema;
pub mod service;
pub mod timeline;
pub mod timer;

pub use context::{ContextProvider, HistoryContextProvider, SchedulerContext};
pub use debounce::DebounceCoordinator;
pub use dispatcher::{CommitOutcome, ExecutionDispatcher};
pub use gateway::{
    ActionInvoker, DecisionGateway, FallbackGateway, FixedDelayGateway, FloorClamp,
    SoonestDecision, clamp_to_floor,
};
pub use interactions::{AgentInteraction, InteractionTracker};
pub use reactor::{EventReactor, SchedulerEvent};
pub use reminders::{Reminder, ReminderGateway, ReminderSchedule, next_reminder_decision};
pub use run::{
    ActionOutput, RunDecision, RunStatistics, RunStatus, RunTransition, ScheduledRun,
};
pub use service::{AdaptiveScheduler, SchedulerHandle};
pub use timeline::{RunTimeline, SqliteRunTimeline, TimelineError};
pub use timer::TimerSlot;
