//! Yume: adaptive interaction scheduling for a personal assistant.
//!
//! The crate decides *when* the assistant should act next and makes sure
//! that decision fires reliably:
//!
//! - **Debounce**: bursts of lifecycle events collapse into one decision
//! - **Supersession**: a new decision cancels the pending run, never two timelines
//! - **Temporal floor**: no run fires sooner than the configured lead time
//! - **Audit**: every run, including superseded ones, stays in SQLite
//!
//! The decision logic and the action itself are external collaborators
//! behind [`DecisionGateway`] and [`ActionInvoker`].

pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod scheduler;
pub mod yume_dirs;

pub use config::YumeConfig;
pub use error::{Result, YumeError};
pub use scheduler::{
    ActionInvoker, AdaptiveScheduler, DecisionGateway, RunDecision, RunStatus, ScheduledRun,
    SchedulerHandle,
};
