use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_core::errors::DispatchError;
use relay_core::ids::IdempotencyKey;
use relay_core::payloads::RunResult;

use crate::local::LocalExecutor;
use crate::protocol::{GatewayRequest, RunParams, RunStatus};
use crate::transport::GatewayTransport;

/// Retry behavior of the gateway dispatcher. The budget bounds total
/// elapsed retry time, not an attempt count.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub budget: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            budget: Duration::from_secs(60),
            jitter_factor: 0.2,
        }
    }
}

/// Where a request is allowed to execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Remote gateway first, local embedded path on exhaustion.
    RemoteFirst,
    /// Skip the remote gateway entirely.
    LocalOnly,
}

/// Submits prepared runs to the remote gateway, retrying transient
/// failures within the elapsed budget and degrading to the local executor.
///
/// - Transience is the narrow allow-list on [`DispatchError`]; every other
///   failure routes to the local fallback without retrying.
/// - One idempotency key is minted per logical request and reused verbatim
///   across retries, so the remote side can deduplicate replays.
/// - Timeout and cancellation surface as a `Timeout` outcome; they never
///   trigger fallback, since the caller asked the run to stop.
pub struct GatewayDispatcher<T: GatewayTransport, L: LocalExecutor> {
    transport: T,
    local: L,
    config: RetryConfig,
}

impl<T: GatewayTransport, L: LocalExecutor> GatewayDispatcher<T, L> {
    pub fn new(transport: T, local: L, config: RetryConfig) -> Self {
        Self {
            transport,
            local,
            config,
        }
    }

    pub fn with_defaults(transport: T, local: L) -> Self {
        Self::new(transport, local, RetryConfig::default())
    }

    pub fn transport_ref(&self) -> &T {
        &self.transport
    }

    pub fn local_ref(&self) -> &L {
        &self.local
    }

    pub async fn dispatch(
        &self,
        params: &RunParams,
        mode: ExecutionMode,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<RunResult, DispatchError> {
        if mode == ExecutionMode::LocalOnly {
            return self.local.execute(params).await;
        }

        let idempotency_key = IdempotencyKey::new();
        let deadline = Instant::now() + self.config.budget;
        let mut attempt: u32 = 0;

        let cause: DispatchError = loop {
            let request = GatewayRequest::agent_run(
                params,
                idempotency_key.clone(),
                timeout.as_millis() as u64,
            )
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;

            let outcome = tokio::select! {
                () = cancel.cancelled() => return Err(DispatchError::Timeout(timeout)),
                submitted = tokio::time::timeout(timeout, self.transport.submit(&request)) => {
                    match submitted {
                        Ok(result) => result,
                        Err(_) => return Err(DispatchError::Timeout(timeout)),
                    }
                }
            };

            match outcome {
                Ok(response) => match response.status {
                    RunStatus::Ok => {
                        return response.result.ok_or_else(|| {
                            DispatchError::Protocol("ok response without result".into())
                        });
                    }
                    RunStatus::Timeout => return Err(DispatchError::Timeout(timeout)),
                    RunStatus::Error => {
                        break DispatchError::RemoteStatus {
                            status: 200,
                            body: format!("remote run {} failed", response.run_id),
                        };
                    }
                },
                Err(e) if e.is_transient() => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break e;
                    }
                    // Exponential backoff capped per attempt, then capped
                    // again so we never sleep past the deadline.
                    let delay = self.retry_delay(attempt).min(remaining);
                    attempt += 1;
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        error_kind = e.error_kind(),
                        "transient gateway failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e @ (DispatchError::Timeout(_) | DispatchError::Cancelled)) => return Err(e),
                Err(e) => break e,
            }
        };

        info!(
            error = %cause,
            error_kind = cause.error_kind(),
            "remote dispatch exhausted, falling back to local execution"
        );
        let mut result = self.local.execute(params).await?;
        result.meta.fallback = true;
        Ok(result)
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let exp = self.config.initial_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp.min(self.config.max_delay.as_millis() as f64);

        // Jitter: delay * (1 ± jitter_factor)
        let jitter_range = capped * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            (random_u64() % (jitter_range as u64 * 2 + 1)) as f64 - jitter_range
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Simple non-cryptographic random u64 using thread-local state.
fn random_u64() -> u64 {
    use std::cell::Cell;
    use std::time::SystemTime;

    thread_local! {
        static STATE: Cell<u64> = Cell::new(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1
        );
    }

    STATE.with(|s| {
        // xorshift64
        let mut x = s.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        s.set(x);
        x
    })
}
