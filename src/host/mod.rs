//! Host-facing JSON command contract for embedding the scheduler.

pub mod contract;
pub mod handler;
pub mod stdio;

pub use contract::{CommandEnvelope, CommandName, ResponseEnvelope};
pub use handler::CommandHandler;
pub use stdio::{BridgeExit, run_bridge, run_stdio_bridge};
