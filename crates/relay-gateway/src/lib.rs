//! Retrying remote-dispatch client: submits prepared agent-run requests to
//! the remote execution gateway, retries a narrow set of transient
//! failures within an elapsed-time budget, and falls back to the local
//! embedded execution path when retries are exhausted.

pub mod dispatcher;
pub mod local;
pub mod mock;
pub mod protocol;
pub mod transport;

pub use dispatcher::{ExecutionMode, GatewayDispatcher, RetryConfig};
pub use local::LocalExecutor;
pub use protocol::{GatewayRequest, GatewayResponse, RunParams, RunStatus};
pub use transport::{GatewayTransport, HttpGatewayClient};
