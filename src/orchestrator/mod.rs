//! Storage, locking and execution of tracked commands.

pub mod lock;
pub mod runner;
pub mod sequence;
pub mod shutdown;
pub mod state;

pub use lock::SessionLock;
pub use runner::{ExecutionOutcome, ExecutionSettings, ExecutionSupervisor};
pub use sequence::{RunOrchestrator, RunSummary, StopReason, skip_all_interrupted};
pub use shutdown::ShutdownSignal;
pub use state::SessionStore;
