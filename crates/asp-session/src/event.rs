//! The unified session event stream (spec §3, §6, §8 property 8).

use crate::continuation::ContinuationRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// A content block inside a structured assistant message update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text content.
    Text {
        /// The block's text.
        text: String,
    },
    /// A tool-use request embedded in the message.
    ToolUse {
        /// The tool's name.
        name: String,
        /// JSON input for the tool.
        input: serde_json::Value,
    },
}

/// The payload of a [`EventKind::MessageUpdate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum MessageUpdate {
    /// An incremental text delta (streaming token).
    TextDelta {
        /// The text fragment appended since the previous update.
        text: String,
    },
    /// A full replacement set of structured content blocks.
    ContentBlocks {
        /// The message's current content blocks.
        blocks: Vec<ContentBlock>,
    },
}

/// Which role produced a `message_start`/`message_end` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The prompt supplied by the caller.
    User,
    /// Output produced by the agent.
    Assistant,
}

/// The tagged variants of the unified session event, per spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The overall run's lifecycle state changed.
    State {
        /// `running`, `error`, or `complete` — mirrors spec §4.14's prose states.
        state: RunState,
    },
    /// The agent has started processing.
    AgentStart,
    /// The agent has finished processing.
    AgentEnd,
    /// A turn within the agent run has started.
    TurnStart,
    /// A turn within the agent run has ended.
    TurnEnd,
    /// A message (user or assistant) has begun. Carries the full text for
    /// a message that is known verbatim up front (the user's prompt);
    /// `None` for an assistant message that will stream via
    /// `MessageUpdate` before its matching `MessageEnd`.
    MessageStart {
        /// Who produced this message.
        role: MessageRole,
        /// The full text, when known at start (always set for `User`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// An incremental update to the current message.
    MessageUpdate(MessageUpdate),
    /// The current message has finished streaming.
    MessageEnd {
        /// Who produced this message.
        role: MessageRole,
        /// The final, complete text, when available.
        text: Option<String>,
    },
    /// A tool execution has begun.
    ToolExecutionStart {
        /// The tool's name.
        tool_name: String,
        /// Correlates to the matching `tool_execution_end`.
        tool_use_id: Option<String>,
    },
    /// A tool execution has finished.
    ToolExecutionEnd {
        /// The tool's name.
        tool_name: String,
        /// Correlates to the matching `tool_execution_start`.
        tool_use_id: Option<String>,
        /// Whether the tool invocation succeeded.
        success: bool,
    },
    /// The harness-native SDK session id became known (SDK frontends only).
    SdkSessionId {
        /// The harness's own session identifier.
        session_id: String,
    },
    /// The run has reached a terminal outcome.
    Complete {
        /// The final result.
        result: crate::result::RunResult,
    },
}

/// The overall lifecycle state named in `EventKind::State`, per spec §4.14.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// A session is active and processing the turn.
    Running,
    /// Validation or the harness failed before/during the turn.
    Error,
    /// The turn reached a successful terminal outcome.
    Complete,
}

/// One unified event observed by a run's callback, per spec §3.
///
/// Every event carries an ISO timestamp, a monotonic 1-based sequence
/// number, the caller's session/run identifiers, and the continuation
/// reference once known (spec §4.14 step 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// When this event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Strictly increasing, starting at 1, no gaps, per run.
    pub sequence: u64,
    /// The caller-supplied coding-platform session id.
    pub cp_session_id: String,
    /// The caller-supplied run id.
    pub run_id: String,
    /// The continuation reference, once the driver has one.
    pub continuation: Option<ContinuationRef>,
    /// The event's payload.
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Callback invoked for every emitted [`Event`].
pub type OnEvent = Arc<dyn Fn(Event) + Send + Sync>;

/// Serializes event emission so that `on_event` observers always see a
/// strictly sequential stream, even when multiple producers (harness
/// stdout readers, timeout tasks, cancellation) race to emit concurrently.
///
/// Grounded on the "monotonically chained future" design note (spec §9):
/// here realized as an async mutex guarding both the counter and the
/// callback invocation, so increment-then-call is one atomic step from the
/// perspective of other emitters.
pub struct SequencedEmitter {
    cp_session_id: String,
    run_id: String,
    continuation: AsyncMutex<Option<ContinuationRef>>,
    next_seq: AtomicU64,
    lock: AsyncMutex<()>,
    on_event: OnEvent,
}

impl SequencedEmitter {
    /// Create a new emitter for one run.
    #[must_use]
    pub fn new(cp_session_id: impl Into<String>, run_id: impl Into<String>, on_event: OnEvent) -> Self {
        Self {
            cp_session_id: cp_session_id.into(),
            run_id: run_id.into(),
            continuation: AsyncMutex::new(None),
            next_seq: AtomicU64::new(1),
            lock: AsyncMutex::new(()),
            on_event,
        }
    }

    /// Record the continuation reference for inclusion in subsequent events.
    pub async fn set_continuation(&self, continuation: ContinuationRef) {
        *self.continuation.lock().await = Some(continuation);
    }

    /// Emit one event, assigning the next sequence number under the
    /// emitter's serialization lock.
    pub async fn emit(&self, kind: EventKind) -> Event {
        let _guard = self.lock.lock().await;
        let sequence = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let continuation = self.continuation.lock().await.clone();
        let event = Event {
            timestamp: Utc::now(),
            sequence,
            cp_session_id: self.cp_session_id.clone(),
            run_id: self.run_id.clone(),
            continuation,
            kind,
        };
        (self.on_event)(event.clone());
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn sequence_numbers_increase_without_gaps() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let emitter = SequencedEmitter::new("cp-1", "run-1", Arc::new(move |ev: Event| seen2.lock().unwrap().push(ev.sequence)));

        emitter.emit(EventKind::State { state: RunState::Running }).await;
        emitter.emit(EventKind::AgentStart).await;
        emitter.emit(EventKind::AgentEnd).await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn concurrent_emits_still_serialize_sequence() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let emitter = Arc::new(SequencedEmitter::new("cp-1", "run-1", Arc::new(move |ev: Event| seen2.lock().unwrap().push(ev.sequence))));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let emitter = Arc::clone(&emitter);
            handles.push(tokio::spawn(async move {
                emitter.emit(EventKind::AgentStart).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut sequences = seen.lock().unwrap().clone();
        sequences.sort_unstable();
        let expected: Vec<u64> = (1..=20).collect();
        assert_eq!(sequences, expected);
    }
}
