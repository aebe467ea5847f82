//! Session runner: the production [`RunExecutor`].
//!
//! Owns the lane activity state the queue consults, prepares run input
//! through the history pipeline, executes through the gateway dispatcher,
//! and appends the exchanged turns to the transcript under the session
//! write lock. Runs for the same key serialize on a per-lane mutex, so a
//! racing submit degrades to waiting instead of corrupting the lane.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use relay_core::messages::Message;
use relay_core::payloads::ReplyPayload;
use relay_core::session::SessionKey;
use relay_gateway::{ExecutionMode, GatewayDispatcher, GatewayTransport, LocalExecutor, RunParams};
use relay_store::{SessionLockManager, TranscriptStore};

use crate::error::EngineError;
use crate::history::{self, HistoryConfig, TimeContext};
use crate::queue::RunExecutor;

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub history: HistoryConfig,
    pub execution_mode: ExecutionMode,
    pub run_timeout: Duration,
    pub lock_timeout: Duration,
    pub lock_stale_after: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            execution_mode: ExecutionMode::RemoteFirst,
            run_timeout: Duration::from_secs(120),
            lock_timeout: Duration::from_secs(10),
            lock_stale_after: Duration::from_secs(30 * 60),
        }
    }
}

struct ActiveLane {
    cancel: CancellationToken,
    streaming: AtomicBool,
}

pub struct SessionRunner<T: GatewayTransport, L: LocalExecutor> {
    dispatcher: GatewayDispatcher<T, L>,
    store: Arc<TranscriptStore>,
    locks: Arc<SessionLockManager>,
    config: RunnerConfig,
    active: DashMap<SessionKey, ActiveLane>,
    lane_serial: DashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>,
}

impl<T: GatewayTransport, L: LocalExecutor> SessionRunner<T, L> {
    pub fn new(
        dispatcher: GatewayDispatcher<T, L>,
        store: Arc<TranscriptStore>,
        locks: Arc<SessionLockManager>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            dispatcher,
            store,
            locks,
            config,
            active: DashMap::new(),
            lane_serial: DashMap::new(),
        }
    }

    /// Cancel the active run on a lane. The dispatch observes this as a
    /// timeout outcome.
    pub fn abort(&self, key: &SessionKey) -> bool {
        match self.active.get(key) {
            Some(lane) => {
                lane.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn abort_all(&self) -> usize {
        let mut count = 0;
        for entry in self.active.iter() {
            entry.value().cancel.cancel();
            count += 1;
        }
        count
    }

    /// Mark whether the active run on a lane is producing partial output.
    /// Returns false when the lane has no active run.
    pub fn set_streaming(&self, key: &SessionKey, streaming: bool) -> bool {
        match self.active.get(key) {
            Some(lane) => {
                lane.streaming.store(streaming, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    async fn execute_on_lane(
        &self,
        key: &SessionKey,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReplyPayload>, EngineError> {
        let path = self.store.path_for(key);
        let guard = self
            .locks
            .acquire(&path, self.config.lock_timeout, self.config.lock_stale_after)
            .await?;

        let transcript = self.store.read(key)?;
        let time = TimeContext::new(Utc::now(), self.config.history.timezone.as_deref());
        let prepared = history::prepare(&transcript, key, &self.config.history, &time);
        debug!(
            session_key = %key,
            turns = transcript.len(),
            prepared_turns = prepared.len(),
            "prepared run input"
        );

        let params = RunParams::for_lane(key.clone(), prompt, prepared.into_owned());
        let result = self
            .dispatcher
            .dispatch(&params, self.config.execution_mode, self.config.run_timeout, cancel)
            .await?;

        let reply_text = result
            .payloads
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        self.store.append(
            key,
            &[
                Message::user_text_at(prompt, time.now),
                Message::assistant_text(reply_text),
            ],
        )?;
        drop(guard);

        Ok(result.payloads)
    }
}

#[async_trait]
impl<T: GatewayTransport, L: LocalExecutor> RunExecutor for SessionRunner<T, L> {
    async fn run(&self, key: &SessionKey, prompt: &str) -> Result<Vec<ReplyPayload>, EngineError> {
        let serial = self
            .lane_serial
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _serial_guard = serial.lock().await;

        let cancel = CancellationToken::new();
        self.active.insert(
            key.clone(),
            ActiveLane {
                cancel: cancel.clone(),
                streaming: AtomicBool::new(false),
            },
        );

        let result = self.execute_on_lane(key, prompt, &cancel).await;
        let _ = self.active.remove(key);

        if let Err(ref e) = result {
            warn!(session_key = %key, error = %e, "lane run failed");
        }
        result
    }

    async fn run_detached(&self, prompt: &str) -> Result<Vec<ReplyPayload>, EngineError> {
        let params = RunParams::detached(prompt);
        let result = self
            .dispatcher
            .dispatch(
                &params,
                self.config.execution_mode,
                self.config.run_timeout,
                &CancellationToken::new(),
            )
            .await?;
        Ok(result.payloads)
    }

    fn is_active(&self, key: &SessionKey) -> bool {
        self.active.contains_key(key)
    }

    fn is_streaming(&self, key: &SessionKey) -> bool {
        self.active
            .get(key)
            .map(|lane| lane.streaming.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}
