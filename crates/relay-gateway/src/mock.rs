//! Scripted gateway doubles for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use relay_core::errors::DispatchError;
use relay_core::ids::{IdempotencyKey, RunId};
use relay_core::payloads::RunResult;

use crate::local::LocalExecutor;
use crate::protocol::{GatewayRequest, GatewayResponse, RunParams, RunStatus};
use crate::transport::GatewayTransport;

/// One scripted transport reply.
pub enum MockReply {
    Ok(GatewayResponse),
    Err(DispatchError),
    /// Never resolves; used to exercise timeouts and cancellation.
    Hang,
}

impl MockReply {
    pub fn ok_text(text: &str) -> Self {
        let run_id = RunId::new();
        Self::Ok(GatewayResponse {
            run_id: run_id.clone(),
            status: RunStatus::Ok,
            result: Some(RunResult::from_text(run_id, text)),
        })
    }

    pub fn remote_timeout() -> Self {
        Self::Ok(GatewayResponse {
            run_id: RunId::new(),
            status: RunStatus::Timeout,
            result: None,
        })
    }
}

/// Transport that pops scripted replies in order; an exhausted script
/// fails every further call with a transient connection error.
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    calls: AtomicUsize,
    seen_keys: Mutex<Vec<IdempotencyKey>>,
    seen_params: Mutex<Vec<RunParams>>,
}

impl MockTransport {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            seen_keys: Mutex::new(Vec::new()),
            seen_params: Mutex::new(Vec::new()),
        }
    }

    /// A transport that fails every call with the same transient error.
    pub fn always_transient() -> Self {
        Self::new(vec![])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_keys(&self) -> Vec<IdempotencyKey> {
        self.seen_keys.lock().clone()
    }

    /// Run parameters decoded from each submitted request, in order.
    pub fn seen_params(&self) -> Vec<RunParams> {
        self.seen_params.lock().clone()
    }
}

#[async_trait]
impl GatewayTransport for MockTransport {
    async fn submit(&self, request: &GatewayRequest) -> Result<GatewayResponse, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_keys.lock().push(request.idempotency_key.clone());
        if let Ok(params) = serde_json::from_value::<RunParams>(request.params.clone()) {
            self.seen_params.lock().push(params);
        }

        let reply = self.replies.lock().pop_front();
        match reply {
            Some(MockReply::Ok(resp)) => Ok(resp),
            Some(MockReply::Err(e)) => Err(e),
            Some(MockReply::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Err(DispatchError::ConnectionClosed("scripted".into())),
        }
    }
}

/// Local executor double that records invocations.
pub struct MockLocalExecutor {
    calls: AtomicUsize,
    text: String,
}

impl MockLocalExecutor {
    pub fn new(text: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            text: text.to_string(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalExecutor for MockLocalExecutor {
    async fn execute(&self, _params: &RunParams) -> Result<RunResult, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RunResult::from_text(RunId::new(), &self.text))
    }
}
