//! Dispatch-side engine: the per-session reply dispatch queue, the history
//! transform pipeline, and the session runner that wires the transcript
//! store and the gateway dispatcher together behind the lane-activity
//! interface.

pub mod error;
pub mod history;
pub mod queue;
pub mod runner;

pub use error::EngineError;
pub use queue::{DropPolicy, QueueConfig, QueueMode, QueuedMessage, ReplyDispatcher, RunExecutor};
pub use runner::{RunnerConfig, SessionRunner};
