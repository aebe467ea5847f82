use async_trait::async_trait;

use relay_core::errors::DispatchError;
use relay_core::payloads::RunResult;

use crate::protocol::RunParams;

/// The embedded in-process execution path.
///
/// This is the degraded fallback the dispatcher routes to when the remote
/// gateway is unreachable, and the direct target of local-only requests.
/// The actual agent loop behind it is an external collaborator.
#[async_trait]
pub trait LocalExecutor: Send + Sync {
    async fn execute(&self, params: &RunParams) -> Result<RunResult, DispatchError>;
}
