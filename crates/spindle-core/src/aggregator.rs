// ABOUTME: Streaming chunk aggregator - coalesces partial model output per message id
// ABOUTME: Fixed-interval flush timers with finish, empty-tick and shutdown teardown paths

use crate::events::{EventSink, TaskEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Default flush period for buffered chunks
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// How many finished message ids are remembered to reject repeats
const FINISHED_HISTORY: usize = 256;

/// Annotations carried unchanged from a chunk/finish call to its event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// The message the model is reflecting on, if this output is a reflection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflected_message: Option<String>,
    /// Arbitrary prompt-context tag supplied by the runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_context: Option<serde_json::Value>,
}

/// Token and cost accounting reported when a response finishes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub model: String,
    pub sent_tokens: u64,
    pub received_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
    pub message_cost: f64,
}

/// Terminal metadata supplied with a finish signal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageReport>,
    #[serde(default)]
    pub edited_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// One throttled flush of buffered output
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseChunk {
    pub task_id: String,
    pub message_id: String,
    pub chunk: String,
    pub metadata: ChunkMetadata,
}

/// Final, authoritative output for a message
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCompletion {
    pub task_id: String,
    pub message_id: String,
    pub content: String,
    pub details: CompletionDetails,
}

/// Live buffer for one message id
struct Buffer {
    generation: u64,
    pending: String,
    metadata: ChunkMetadata,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    buffers: HashMap<String, Buffer>,
    finished: HashSet<String>,
    /// Finish order, oldest first; bounds `finished` to `FINISHED_HISTORY`
    finished_order: VecDeque<String>,
    next_generation: u64,
    shut_down: bool,
}

impl State {
    /// Record a finish. False if the id is still remembered as finished.
    fn mark_finished(&mut self, message_id: &str) -> bool {
        if !self.finished.insert(message_id.to_string()) {
            return false;
        }
        self.finished_order.push_back(message_id.to_string());
        while self.finished_order.len() > FINISHED_HISTORY {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
        true
    }
}

/// Coalesces rapid partial output into throttled flush events.
///
/// Each message id moves through `absent -> buffering -> discarded`. A buffer
/// is created by the first non-empty chunk and discarded by a finish signal,
/// by a tick that finds it empty, or by shutdown. Events are emitted while the
/// state lock is held, so nothing is emitted after a teardown returns.
pub struct ChunkAggregator {
    task_id: String,
    interval: Duration,
    sink: Arc<dyn EventSink>,
    state: Arc<Mutex<State>>,
}

impl ChunkAggregator {
    pub fn new(task_id: impl Into<String>, interval: Duration, sink: Arc<dyn EventSink>) -> Self {
        Self {
            task_id: task_id.into(),
            // tokio intervals reject a zero period
            interval: interval.max(Duration::from_millis(1)),
            sink,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Buffer a fragment of output for `message_id`.
    ///
    /// Starts a flush timer if the id has no live buffer. Outside a tokio
    /// runtime there is no timer to drive flushes, so the chunk is dropped.
    pub fn push_chunk(&self, message_id: &str, fragment: &str, metadata: ChunkMetadata) {
        if fragment.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(message_id = %message_id, "No runtime available, dropping chunk");
            return;
        };

        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *guard;
        if state.shut_down || state.finished.contains(message_id) {
            tracing::debug!(message_id = %message_id, "Ignoring chunk for closed stream");
            return;
        }

        if let Some(buffer) = state.buffers.get_mut(message_id) {
            buffer.pending.push_str(fragment);
            buffer.metadata = metadata;
            return;
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let timer = runtime.spawn(run_flush_timer(
            Arc::downgrade(&self.state),
            self.sink.clone(),
            self.task_id.clone(),
            message_id.to_string(),
            generation,
            self.interval,
        ));
        tracing::debug!(message_id = %message_id, generation, "Started chunk buffer");
        state.buffers.insert(
            message_id.to_string(),
            Buffer {
                generation,
                pending: fragment.to_string(),
                metadata,
                timer,
            },
        );
    }

    /// Close the stream for `message_id` and emit its final content.
    ///
    /// Buffered chunks are discarded in favour of `content`. Returns false (and
    /// emits nothing) if the id was already finished or the aggregator is shut down.
    /// Only the most recent finished ids are remembered for that check.
    pub fn finish(&self, message_id: &str, content: &str, details: CompletionDetails) -> bool {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *guard;
        if state.shut_down || !state.mark_finished(message_id) {
            tracing::debug!(message_id = %message_id, "Ignoring repeated finish");
            return false;
        }

        if let Some(buffer) = state.buffers.remove(message_id) {
            buffer.timer.abort();
        }

        self.sink
            .emit(TaskEvent::ResponseCompleted(ResponseCompletion {
                task_id: self.task_id.clone(),
                message_id: message_id.to_string(),
                content: content.to_string(),
                details,
            }));
        true
    }

    /// Stop every timer and drop every buffer. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.shut_down {
            tracing::debug!(task_id = %self.task_id, pending = state.buffers.len(), "Shutting down chunk aggregator");
        }
        state.shut_down = true;
        for (_, buffer) in state.buffers.drain() {
            buffer.timer.abort();
        }
        state.finished.clear();
        state.finished_order.clear();
    }

    pub fn is_buffering(&self, message_id: &str) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.buffers.contains_key(message_id)
    }

    pub fn active_buffers(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.buffers.len()
    }

    pub fn is_shut_down(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.shut_down
    }
}

impl Drop for ChunkAggregator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Periodic flush loop for one buffer generation.
///
/// Exits when the aggregator is gone, when its buffer was replaced or removed,
/// or after discarding the buffer on an empty tick.
async fn run_flush_timer(
    state: Weak<Mutex<State>>,
    sink: Arc<dyn EventSink>,
    task_id: String,
    message_id: String,
    generation: u64,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(shared) = state.upgrade() else {
            return;
        };
        let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
        let inner = &mut *guard;

        let Some(buffer) = inner.buffers.get_mut(&message_id) else {
            return;
        };
        if buffer.generation != generation {
            return;
        }
        if buffer.pending.is_empty() {
            inner.buffers.remove(&message_id);
            tracing::debug!(message_id = %message_id, generation, "Discarded idle chunk buffer");
            return;
        }

        let chunk = std::mem::take(&mut buffer.pending);
        sink.emit(TaskEvent::ResponseChunk(ResponseChunk {
            task_id: task_id.clone(),
            message_id: message_id.clone(),
            chunk,
            metadata: buffer.metadata.clone(),
        }));
    }
}
