//! The opt-in JSONL event log for runs (spec §6): one JSON object per
//! line, stable keys `event` and `timestamp`, flattening the unified
//! [`Event`] stream into the externally documented schema (`job_started`,
//! `session_started`, `message`, `tool_call`, `tool_result`, `heartbeat`,
//! `job_completed`).

use crate::event::{Event, EventKind};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Flatten one unified [`Event`] into its JSONL record, when this event
/// kind has an external representation. Internal-only kinds (e.g. the
/// granular `turn_start`/`turn_end` markers) return `None`.
#[must_use]
pub fn to_record(event: &Event) -> Option<Value> {
    let ts = event.timestamp.to_rfc3339();
    match &event.kind {
        EventKind::AgentStart => Some(json!({
            "event": "job_started",
            "timestamp": ts,
            "run_id": event.run_id,
            "cp_session_id": event.cp_session_id,
        })),
        EventKind::SdkSessionId { session_id } => Some(json!({
            "event": "session_started",
            "timestamp": ts,
            "session_id": session_id,
        })),
        EventKind::MessageStart { role, text: Some(text) } => Some(json!({
            "event": "message",
            "timestamp": ts,
            "role": role,
            "text": text,
        })),
        EventKind::MessageEnd { role, text: Some(text) } => Some(json!({
            "event": "message",
            "timestamp": ts,
            "role": role,
            "text": text,
        })),
        EventKind::ToolExecutionStart { tool_name, tool_use_id } => Some(json!({
            "event": "tool_call",
            "timestamp": ts,
            "tool_name": tool_name,
            "tool_use_id": tool_use_id,
        })),
        EventKind::ToolExecutionEnd { tool_name, tool_use_id, success } => Some(json!({
            "event": "tool_result",
            "timestamp": ts,
            "tool_name": tool_name,
            "tool_use_id": tool_use_id,
            "success": success,
        })),
        EventKind::Complete { result } => Some(json!({
            "event": "job_completed",
            "timestamp": ts,
            "success": result.success,
            "final_output": result.final_output,
            "error": result.error,
        })),
        _ => None,
    }
}

/// A periodic keep-alive record. Not tied to any unified [`Event`] — emit
/// one on a timer to let a downstream consumer distinguish "still
/// running, nothing new" from a stalled connection.
#[must_use]
pub fn heartbeat_record(at: DateTime<Utc>) -> Value {
    json!({ "event": "heartbeat", "timestamp": at.to_rfc3339() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{MessageRole, RunState};

    fn sample_event(kind: EventKind) -> Event {
        Event {
            timestamp: Utc::now(),
            sequence: 1,
            cp_session_id: "cp-1".to_string(),
            run_id: "run-1".to_string(),
            continuation: None,
            kind,
        }
    }

    #[test]
    fn state_events_have_no_external_record() {
        let event = sample_event(EventKind::State { state: RunState::Running });
        assert!(to_record(&event).is_none());
    }

    #[test]
    fn message_start_with_text_maps_to_message() {
        let event = sample_event(EventKind::MessageStart { role: MessageRole::User, text: Some("Hello".to_string()) });
        let record = to_record(&event).unwrap();
        assert_eq!(record["event"], "message");
        assert_eq!(record["text"], "Hello");
    }

    #[test]
    fn streaming_message_start_with_no_text_has_no_record() {
        let event = sample_event(EventKind::MessageStart { role: MessageRole::Assistant, text: None });
        assert!(to_record(&event).is_none());
    }

    #[test]
    fn tool_call_and_result_map_through() {
        let call = sample_event(EventKind::ToolExecutionStart { tool_name: "grep".to_string(), tool_use_id: Some("t1".to_string()) });
        let record = to_record(&call).unwrap();
        assert_eq!(record["event"], "tool_call");

        let result = sample_event(EventKind::ToolExecutionEnd { tool_name: "grep".to_string(), tool_use_id: Some("t1".to_string()), success: true });
        let record = to_record(&result).unwrap();
        assert_eq!(record["event"], "tool_result");
        assert_eq!(record["success"], true);
    }

    #[test]
    fn heartbeat_has_no_payload_beyond_timestamp() {
        let record = heartbeat_record(Utc::now());
        assert_eq!(record["event"], "heartbeat");
        assert!(record["timestamp"].is_string());
    }
}
