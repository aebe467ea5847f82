//! Per-session reply dispatch queue.
//!
//! For every inbound message the dispatcher decides, from the target
//! lane's activity state and the configured mode, one of: run now, park
//! the message, fork a parallel run, or merge into a debounced batch.
//! Queue state lives in one process-wide registry owned by the dispatcher;
//! nothing else touches it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relay_core::ids::MessageId;
use relay_core::payloads::ReplyPayload;
use relay_core::session::SessionKey;

use crate::error::EngineError;

/// Marker prefixed to each parked message when a batch drains.
pub const QUEUED_MARKER: &str = "[Queued message]";

/// How a lane handles messages that arrive while a run is in flight.
/// Modes are mutually exclusive configuration, not states a session moves
/// between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueMode {
    /// Park and coalesce bursts behind a debounce window.
    Collect,
    /// Park and drain as soon as the lane goes idle.
    Followup,
    /// Never park: fork an independent run with no lane affinity.
    Parallel,
}

/// What happens to messages beyond `cap`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropPolicy {
    /// Overflow is compressed into one bounded summary line; user-visible
    /// content is never silently discarded.
    Summarize,
    /// Drop the oldest parked message to make room.
    DropOldest,
    /// Refuse the newest message.
    DropNewest,
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub mode: QueueMode,
    pub cap: usize,
    pub debounce: Duration,
    pub drop_policy: DropPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            mode: QueueMode::Collect,
            cap: 10,
            debounce: Duration::from_millis(500),
            drop_policy: DropPolicy::Summarize,
        }
    }
}

/// An inbound message parked because its lane was busy.
#[derive(Clone, Debug)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl QueuedMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }
}

/// Boundary to the agent-execution subsystem. The executor owns the
/// active/streaming booleans; the queue only queries and reacts to them.
///
/// Payloads of runs that no `submit` caller awaits (timer-driven drains)
/// are the executor's responsibility to deliver to the channel layer.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    /// Run the agent on a lane. Runs for the same key serialize.
    async fn run(&self, key: &SessionKey, prompt: &str) -> Result<Vec<ReplyPayload>, EngineError>;

    /// Run against a fresh execution identity with no lane affinity.
    async fn run_detached(&self, prompt: &str) -> Result<Vec<ReplyPayload>, EngineError>;

    fn is_active(&self, key: &SessionKey) -> bool;

    fn is_streaming(&self, key: &SessionKey) -> bool;

    /// Offer a message to the in-flight run for steering. Returns false
    /// when the run cannot absorb it, in which case the queue parks it.
    fn queue_message(&self, key: &SessionKey, message: &QueuedMessage) -> bool {
        let _ = (key, message);
        false
    }
}

/// Per-lane queue state. The debounce timer is explicit state, not a
/// closure side effect: cancellation aborts the task and bumps the
/// generation so a stale firing is ignored.
struct LaneQueue {
    pending: VecDeque<QueuedMessage>,
    dropped: usize,
    debounce_elapsed: bool,
    timer: Option<DebounceTimer>,
}

struct DebounceTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl LaneQueue {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            dropped: 0,
            debounce_elapsed: false,
            timer: None,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }
}

/// A batch stolen from a lane queue for draining.
struct DrainedBatch {
    messages: Vec<QueuedMessage>,
    dropped: usize,
}

struct Inner {
    executor: Arc<dyn RunExecutor>,
    config: QueueConfig,
    lanes: DashMap<SessionKey, Arc<Mutex<LaneQueue>>>,
    generation: std::sync::atomic::AtomicU64,
}

/// The per-session reply dispatch queue. Cheap to clone; all clones share
/// one registry.
#[derive(Clone)]
pub struct ReplyDispatcher {
    inner: Arc<Inner>,
}

impl ReplyDispatcher {
    pub fn new(executor: Arc<dyn RunExecutor>, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                config,
                lanes: DashMap::new(),
                generation: std::sync::atomic::AtomicU64::new(0),
            }),
        }
    }

    /// Decide and execute the dispatch action for one inbound message.
    ///
    /// Returns `None` when the message was parked (no immediate reply);
    /// returns payloads when the message ran — immediately, merged with a
    /// drained batch, or as a forked parallel run.
    pub async fn submit(
        &self,
        key: &SessionKey,
        message: QueuedMessage,
    ) -> Result<Option<Vec<ReplyPayload>>, EngineError> {
        let busy = self.is_busy(key);

        if !busy {
            // Any parked backlog rides along with this message in one run.
            let batch = self.steal_batch(key);
            let prompt = compose_prompt(batch.as_ref(), Some(&message.body));
            let payloads = self.inner.executor.run(key, &prompt).await?;
            self.settle_lane(key).await?;
            return Ok(Some(payloads));
        }

        match self.inner.config.mode {
            QueueMode::Parallel => {
                info!(session_key = %key, "lane busy, forking parallel run");
                let payloads = self.inner.executor.run_detached(&message.body).await?;
                Ok(Some(payloads))
            }
            QueueMode::Collect | QueueMode::Followup => {
                // The in-flight run may be able to absorb the message
                // directly; only park when it cannot.
                if self.inner.executor.queue_message(key, &message) {
                    debug!(session_key = %key, message_id = %message.id, "message absorbed by in-flight run");
                    return Ok(None);
                }
                self.park(key, message, self.inner.config.mode == QueueMode::Collect);
                Ok(None)
            }
        }
    }

    /// Signal that a lane finished a run. Drains any batch that is ready:
    /// immediately in followup mode, after the debounce deadline in
    /// collect mode.
    pub async fn notify_lane_idle(&self, key: &SessionKey) -> Result<(), EngineError> {
        self.settle_lane(key).await
    }

    fn is_busy(&self, key: &SessionKey) -> bool {
        self.inner.executor.is_active(key) || self.inner.executor.is_streaming(key)
    }

    fn lane(&self, key: &SessionKey) -> Arc<Mutex<LaneQueue>> {
        self.inner
            .lanes
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(LaneQueue::new())))
            .clone()
    }

    /// Park a message on a busy lane, enforcing the cap, and (re)arm the
    /// debounce timer in collect mode.
    fn park(&self, key: &SessionKey, message: QueuedMessage, debounced: bool) {
        let lane = self.lane(key);
        let mut queue = lane.lock();

        if queue.pending.len() >= self.inner.config.cap {
            match self.inner.config.drop_policy {
                DropPolicy::Summarize => {
                    queue.dropped += 1;
                    debug!(session_key = %key, dropped = queue.dropped, "queue over cap, summarizing overflow");
                }
                DropPolicy::DropOldest => {
                    let evicted = queue.pending.pop_front();
                    warn!(session_key = %key, evicted_id = ?evicted.map(|m| m.id), "queue over cap, dropped oldest");
                    queue.pending.push_back(message);
                }
                DropPolicy::DropNewest => {
                    warn!(session_key = %key, refused_id = %message.id, "queue over cap, refused newest");
                }
            }
        } else {
            queue.pending.push_back(message);
        }

        if debounced {
            queue.cancel_timer();
            queue.debounce_elapsed = false;
            let generation = self
                .inner
                .generation
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                + 1;
            let dispatcher = self.clone();
            let timer_key = key.clone();
            let debounce = self.inner.config.debounce;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                dispatcher.on_debounce_elapsed(&timer_key, generation).await;
            });
            queue.timer = Some(DebounceTimer { generation, handle });
        }
    }

    /// Debounce deadline reached: drain if the lane is idle, otherwise
    /// remember that the window elapsed so the next idle drains.
    async fn on_debounce_elapsed(&self, key: &SessionKey, generation: u64) {
        {
            let lane = self.lane(key);
            let mut queue = lane.lock();
            match &queue.timer {
                Some(timer) if timer.generation == generation => queue.timer = None,
                // A newer timer or an explicit cancel superseded this firing.
                _ => return,
            }
            queue.debounce_elapsed = true;
        }

        if let Err(e) = self.settle_lane(key).await {
            warn!(session_key = %key, error = %e, "debounced drain failed");
        }
    }

    /// Drain ready batches until the lane has nothing left to do. Iterative
    /// so a drain whose run parks new messages loops instead of recursing.
    async fn settle_lane(&self, key: &SessionKey) -> Result<(), EngineError> {
        loop {
            if self.is_busy(key) {
                return Ok(());
            }
            let Some(batch) = self.steal_ready_batch(key) else {
                // Idle lane with nothing parked: drop the registry entry.
                let _ = self
                    .inner
                    .lanes
                    .remove_if(key, |_, lane| {
                        let queue = lane.lock();
                        queue.pending.is_empty() && queue.dropped == 0 && queue.timer.is_none()
                    });
                return Ok(());
            };
            let prompt = compose_prompt(Some(&batch), None);
            debug!(
                session_key = %key,
                batch_len = batch.messages.len(),
                dropped = batch.dropped,
                "draining queued messages into follow-up run"
            );
            // Payloads are delivered by the executor; no submit caller is
            // waiting on this run.
            let _ = self.inner.executor.run(key, &prompt).await?;
        }
    }

    /// Steal the pending batch unconditionally (a new inbound message is
    /// about to run and takes the backlog with it).
    fn steal_batch(&self, key: &SessionKey) -> Option<DrainedBatch> {
        let lane = self.inner.lanes.get(key)?.clone();
        let mut queue = lane.lock();
        queue.cancel_timer();
        queue.debounce_elapsed = false;
        if queue.pending.is_empty() && queue.dropped == 0 {
            return None;
        }
        Some(DrainedBatch {
            messages: queue.pending.drain(..).collect(),
            dropped: std::mem::take(&mut queue.dropped),
        })
    }

    /// Steal the pending batch only if it is ready to drain on an idle
    /// lane: followup drains at once, collect waits for the debounce
    /// deadline.
    fn steal_ready_batch(&self, key: &SessionKey) -> Option<DrainedBatch> {
        let lane = self.inner.lanes.get(key)?.clone();
        let mut queue = lane.lock();
        if queue.pending.is_empty() && queue.dropped == 0 {
            return None;
        }
        let ready = match self.inner.config.mode {
            QueueMode::Followup => true,
            QueueMode::Collect => queue.debounce_elapsed,
            QueueMode::Parallel => false,
        };
        if !ready {
            return None;
        }
        queue.cancel_timer();
        queue.debounce_elapsed = false;
        Some(DrainedBatch {
            messages: queue.pending.drain(..).collect(),
            dropped: std::mem::take(&mut queue.dropped),
        })
    }

    /// Number of messages currently parked for a lane.
    pub fn pending_len(&self, key: &SessionKey) -> usize {
        self.inner
            .lanes
            .get(key)
            .map(|lane| lane.lock().pending.len())
            .unwrap_or(0)
    }
}

/// Build the prompt for a run: parked messages first, in receipt order,
/// each under a queued-message marker; then the overflow summary; then the
/// live inbound message, if any. An empty batch with no live message never
/// produces a prompt — callers guarantee at least one part exists.
fn compose_prompt(batch: Option<&DrainedBatch>, inbound: Option<&str>) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(batch) = batch {
        for m in &batch.messages {
            parts.push(format!(
                "{QUEUED_MARKER} ({})\n{}",
                m.received_at.format("%Y-%m-%dT%H:%M:%SZ"),
                m.body
            ));
        }
        if batch.dropped > 0 {
            parts.push(format!(
                "[Queue overflow: {} additional messages dropped]",
                batch.dropped
            ));
        }
    }
    if let Some(body) = inbound {
        parts.push(body.to_string());
    }
    parts.join("\n\n")
}
