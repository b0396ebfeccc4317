//! Wire Normalizer: projects Message Records into client-facing frames.
//!
//! The client only ever sees `{role, timestamp, content}` objects, one per
//! line. Records that exist purely for backend bookkeeping (system prompts,
//! tool traffic) have no projection; the [`Projection`] policy decides
//! whether such a record aborts a listing or is skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::UnrepresentableRecord;
use crate::record::MessageRecord;

/// Who a Wire Message is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    User,
    Model,
}

/// The client-visible projection of a Message Record. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: WireRole,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

/// How to treat records with no projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Projection {
    /// Abort on the first unrepresentable record.
    Strict,
    /// Skip unrepresentable records.
    #[default]
    Lenient,
}

/// Project a single record.
pub fn to_wire(record: &MessageRecord) -> Result<WireMessage, UnrepresentableRecord> {
    match record {
        MessageRecord::Request(_) => {
            let (content, timestamp) = record.user_part().ok_or_else(|| {
                UnrepresentableRecord::new(record.kind(), "request has no user prompt part")
            })?;
            Ok(WireMessage {
                role: WireRole::User,
                timestamp,
                content: content.to_string(),
            })
        }
        MessageRecord::Response(resp) => {
            let content = record.leading_text().ok_or_else(|| {
                let reason = if resp.parts.is_empty() {
                    "response has no parts"
                } else {
                    "first response part is not text"
                };
                UnrepresentableRecord::new(record.kind(), reason)
            })?;
            Ok(WireMessage {
                role: WireRole::Model,
                timestamp: resp.timestamp,
                content: content.to_string(),
            })
        }
    }
}

/// Project a sequence of records, preserving their relative order.
///
/// Lenient projection never fails.
pub fn project<'a, I>(records: I, policy: Projection) -> Result<Vec<WireMessage>, UnrepresentableRecord>
where
    I: IntoIterator<Item = &'a MessageRecord>,
{
    let mut out = Vec::new();
    for record in records {
        match (to_wire(record), policy) {
            (Ok(msg), _) => out.push(msg),
            (Err(e), Projection::Strict) => return Err(e),
            (Err(e), Projection::Lenient) => {
                debug!(kind = %e.kind, reason = %e.reason, "Skipping unrepresentable record");
            }
        }
    }
    Ok(out)
}

/// Terminal failure marker sent in place of a Wire Message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Failure category: `backend`, `persistence` or `unrepresentable`.
    pub error: String,
    pub message: String,
}

/// One line of the output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Message(WireMessage),
    Error(ErrorFrame),
}

impl Frame {
    pub fn error(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorFrame {
            error: category.into(),
            message: message.into(),
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn as_message(&self) -> Option<&WireMessage> {
        match self {
            Self::Message(m) => Some(m),
            Self::Error(_) => None,
        }
    }

    /// Serialize as one newline-terminated JSON line.
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = serde_json::to_vec(self).unwrap_or_else(|e| {
            serde_json::json!({ "error": "internal", "message": e.to_string() })
                .to_string()
                .into_bytes()
        });
        line.push(b'\n');
        line
    }
}

impl From<WireMessage> for Frame {
    fn from(msg: WireMessage) -> Self {
        Self::Message(msg)
    }
}

/// Render messages the way the listing endpoint does: newline-joined JSON objects.
pub fn to_ndjson(messages: &[WireMessage]) -> String {
    messages
        .iter()
        .filter_map(|m| serde_json::to_string(m).ok())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordKind, RequestPart, RequestRecord, ResponsePart, ResponseRecord};

    fn tool_call_record() -> MessageRecord {
        MessageRecord::Response(ResponseRecord {
            parts: vec![ResponsePart::ToolInvocation {
                tool_name: "get_current_weather".into(),
                call_id: "call_1".into(),
                args: serde_json::json!({"location": "Paris"}),
            }],
            timestamp: Utc::now(),
            model_name: None,
        })
    }

    fn tool_result_record() -> MessageRecord {
        MessageRecord::Request(RequestRecord {
            parts: vec![RequestPart::ToolResult {
                tool_name: "get_current_weather".into(),
                call_id: "call_1".into(),
                content: serde_json::json!("Weather in Paris: Sunny +21°C"),
                timestamp: Utc::now(),
            }],
        })
    }

    #[test]
    fn user_record_uses_its_part_timestamp() {
        let ts = Utc::now() - chrono::Duration::seconds(30);
        let record = MessageRecord::Request(RequestRecord {
            parts: vec![
                RequestPart::SystemPrompt {
                    content: "system".into(),
                    timestamp: Utc::now(),
                },
                RequestPart::UserPrompt {
                    content: "what's the weather?".into(),
                    timestamp: ts,
                },
            ],
        });
        let msg = to_wire(&record).unwrap();
        assert_eq!(msg.role, WireRole::User);
        assert_eq!(msg.timestamp, ts);
        assert_eq!(msg.content, "what's the weather?");
    }

    #[test]
    fn model_record_uses_record_timestamp() {
        let ts = Utc::now();
        let msg = to_wire(&MessageRecord::model_text("Sunny.", ts)).unwrap();
        assert_eq!(msg.role, WireRole::Model);
        assert_eq!(msg.timestamp, ts);
        assert_eq!(msg.content, "Sunny.");
    }

    #[test]
    fn tool_traffic_is_unrepresentable() {
        let err = to_wire(&tool_call_record()).unwrap_err();
        assert_eq!(err.kind, RecordKind::ToolInvocation);

        let err = to_wire(&tool_result_record()).unwrap_err();
        assert_eq!(err.kind, RecordKind::ToolResult);

        let err = to_wire(&MessageRecord::system_prompt("rules")).unwrap_err();
        assert_eq!(err.kind, RecordKind::SystemPrompt);
    }

    #[test]
    fn lenient_projection_skips_and_keeps_order() {
        let now = Utc::now();
        let history = vec![
            MessageRecord::system_prompt("rules"),
            MessageRecord::user_prompt("weather?"),
            tool_call_record(),
            tool_result_record(),
            MessageRecord::model_text("Sunny in Paris.", now),
            MessageRecord::user_prompt("thanks"),
        ];
        let msgs = project(&history, Projection::Lenient).unwrap();
        let contents: Vec<_> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["weather?", "Sunny in Paris.", "thanks"]);
    }

    #[test]
    fn strict_projection_fails_on_first_unrepresentable() {
        let history = vec![
            MessageRecord::user_prompt("weather?"),
            tool_call_record(),
            MessageRecord::system_prompt("rules"),
        ];
        let err = project(&history, Projection::Strict).unwrap_err();
        assert_eq!(err.kind, RecordKind::ToolInvocation);
    }

    #[test]
    fn frames_serialize_as_single_lines() {
        let frame: Frame = to_wire(&MessageRecord::user_prompt("hello")).unwrap().into();
        let line = frame.to_line();
        assert_eq!(line.last(), Some(&b'\n'));
        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"], "hello");
        assert!(value["timestamp"].as_str().unwrap().contains('T'));

        let err = Frame::error("backend", "boom");
        let value: serde_json::Value = serde_json::from_slice(&err.to_line()).unwrap();
        assert_eq!(value["error"], "backend");
        assert!(value.get("role").is_none());
    }

    #[test]
    fn error_frame_round_trips_as_error_variant() {
        let line = Frame::error("persistence", "disk full").to_line();
        let frame: Frame = serde_json::from_slice(&line).unwrap();
        assert!(frame.is_error());
    }
}
