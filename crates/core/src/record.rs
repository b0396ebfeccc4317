//! Message Record model: the canonical unit of conversation history.
//!
//! A record is either a **request** (authored on the client side: system
//! prompts, user prompts, tool results fed back to the model) or a
//! **response** (authored by the model: generated text, tool invocations).
//!
//! Request parts carry their own timestamps because one request may batch
//! parts authored at different times. Response records carry a single
//! timestamp for the whole record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidRecord;

/// Classification of a record, derived from the types of its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    SystemPrompt,
    UserPrompt,
    ToolInvocation,
    ToolResult,
    ModelText,
}

impl RecordKind {
    /// Whether records of this kind are produced by the generative backend.
    pub fn is_model_authored(self) -> bool {
        matches!(self, Self::ModelText | Self::ToolInvocation)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SystemPrompt => "system_prompt",
            Self::UserPrompt => "user_prompt",
            Self::ToolInvocation => "tool_invocation",
            Self::ToolResult => "tool_result",
            Self::ModelText => "model_text",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fragment of a request record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part_kind", rename_all = "snake_case")]
pub enum RequestPart {
    /// Instructions authored by the system.
    SystemPrompt {
        content: String,
        timestamp: DateTime<Utc>,
    },

    /// Text authored by the human.
    UserPrompt {
        content: String,
        timestamp: DateTime<Utc>,
    },

    /// The structured return value of a tool, fed back to the model.
    ToolResult {
        tool_name: String,
        call_id: String,
        content: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
}

impl RequestPart {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::SystemPrompt { timestamp, .. }
            | Self::UserPrompt { timestamp, .. }
            | Self::ToolResult { timestamp, .. } => *timestamp,
        }
    }
}

/// One fragment of a model response record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part_kind", rename_all = "snake_case")]
pub enum ResponsePart {
    /// Generated natural-language text.
    Text { content: String },

    /// A request by the model to run a named tool.
    ToolInvocation {
        tool_name: String,
        call_id: String,
        args: serde_json::Value,
    },
}

/// A request-style record: may bundle system prompt, user prompt and tool result parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub parts: Vec<RequestPart>,
}

/// A model-authored record, timestamped as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub parts: Vec<ResponsePart>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

/// A single stored unit of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageRecord {
    Request(RequestRecord),
    Response(ResponseRecord),
}

impl MessageRecord {
    /// A request carrying one user prompt, stamped now.
    pub fn user_prompt(content: impl Into<String>) -> Self {
        Self::user_prompt_at(content, Utc::now())
    }

    pub fn user_prompt_at(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::Request(RequestRecord {
            parts: vec![RequestPart::UserPrompt {
                content: content.into(),
                timestamp,
            }],
        })
    }

    /// A request carrying only a system prompt.
    pub fn system_prompt(content: impl Into<String>) -> Self {
        Self::Request(RequestRecord {
            parts: vec![RequestPart::SystemPrompt {
                content: content.into(),
                timestamp: Utc::now(),
            }],
        })
    }

    /// A model response made of a single text part.
    pub fn model_text(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::Response(ResponseRecord {
            parts: vec![ResponsePart::Text {
                content: content.into(),
            }],
            timestamp,
            model_name: None,
        })
    }

    pub fn part_count(&self) -> usize {
        match self {
            Self::Request(r) => r.parts.len(),
            Self::Response(r) => r.parts.len(),
        }
    }

    /// Classify the record from its parts.
    ///
    /// A request containing any user prompt is a `UserPrompt` record even if
    /// it also carries system parts.
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Request(req) => {
                let mut kind = RecordKind::SystemPrompt;
                for part in &req.parts {
                    match part {
                        RequestPart::UserPrompt { .. } => return RecordKind::UserPrompt,
                        RequestPart::ToolResult { .. } => kind = RecordKind::ToolResult,
                        RequestPart::SystemPrompt { .. } => {}
                    }
                }
                kind
            }
            Self::Response(resp) => match resp.parts.first() {
                Some(ResponsePart::ToolInvocation { .. }) => RecordKind::ToolInvocation,
                Some(ResponsePart::Text { .. }) | None => RecordKind::ModelText,
            },
        }
    }

    /// The first user-authored part of a request, skipping system parts.
    pub fn user_part(&self) -> Option<(&str, DateTime<Utc>)> {
        let Self::Request(req) = self else {
            return None;
        };
        req.parts.iter().find_map(|part| match part {
            RequestPart::UserPrompt { content, timestamp } => Some((content.as_str(), *timestamp)),
            _ => None,
        })
    }

    /// The leading text of a model response, if its first part is text.
    pub fn leading_text(&self) -> Option<&str> {
        let Self::Response(resp) = self else {
            return None;
        };
        match resp.parts.first() {
            Some(ResponsePart::Text { content }) => Some(content),
            _ => None,
        }
    }

    /// Whether the Wire Normalizer can project this record.
    pub fn is_convertible(&self) -> bool {
        match self {
            Self::Request(_) => self.user_part().is_some(),
            Self::Response(_) => self.leading_text().is_some(),
        }
    }

    /// Check the structural invariants: parts are non-empty, and tool
    /// traffic names both the tool and the call it belongs to.
    pub fn validate(&self) -> Result<(), InvalidRecord> {
        if self.part_count() == 0 {
            return Err(InvalidRecord::Empty);
        }
        let kind = self.kind();
        let tool_traffic_ok = match self {
            Self::Request(req) => req.parts.iter().all(|p| match p {
                RequestPart::ToolResult {
                    tool_name, call_id, ..
                } => !tool_name.is_empty() && !call_id.is_empty(),
                _ => true,
            }),
            Self::Response(resp) => resp.parts.iter().all(|p| match p {
                ResponsePart::ToolInvocation {
                    tool_name, call_id, ..
                } => !tool_name.is_empty() && !call_id.is_empty(),
                ResponsePart::Text { .. } => true,
            }),
        };
        if !tool_traffic_ok {
            return Err(InvalidRecord::KindMismatch {
                kind,
                expected: "named tool call",
            });
        }
        Ok(())
    }

    /// Validate, then check the record classifies as `expected`.
    pub fn validate_as(&self, expected: RecordKind) -> Result<(), InvalidRecord> {
        self.validate()?;
        let kind = self.kind();
        if kind != expected {
            return Err(InvalidRecord::KindMismatch {
                kind,
                expected: expected.as_str(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_call(name: &str) -> ResponsePart {
        ResponsePart::ToolInvocation {
            tool_name: name.into(),
            call_id: "call_1".into(),
            args: serde_json::json!({}),
        }
    }

    #[test]
    fn user_prompt_record_classifies_as_user_prompt() {
        let record = MessageRecord::user_prompt("hello");
        assert_eq!(record.kind(), RecordKind::UserPrompt);
        assert!(record.is_convertible());
        assert!(record.validate_as(RecordKind::UserPrompt).is_ok());
    }

    #[test]
    fn mixed_request_is_a_user_prompt_record() {
        let now = Utc::now();
        let record = MessageRecord::Request(RequestRecord {
            parts: vec![
                RequestPart::SystemPrompt {
                    content: "be terse".into(),
                    timestamp: now,
                },
                RequestPart::UserPrompt {
                    content: "hi".into(),
                    timestamp: now,
                },
            ],
        });
        assert_eq!(record.kind(), RecordKind::UserPrompt);
        assert_eq!(record.user_part().map(|(c, _)| c), Some("hi"));
    }

    #[test]
    fn system_only_request_is_not_convertible() {
        let record = MessageRecord::system_prompt("you are a helpful assistant");
        assert_eq!(record.kind(), RecordKind::SystemPrompt);
        assert!(!record.is_convertible());
    }

    #[test]
    fn response_leading_with_tool_call_is_tool_invocation() {
        let record = MessageRecord::Response(ResponseRecord {
            parts: vec![tool_call("get_current_time"), ResponsePart::Text { content: "x".into() }],
            timestamp: Utc::now(),
            model_name: None,
        });
        assert_eq!(record.kind(), RecordKind::ToolInvocation);
        assert!(record.kind().is_model_authored());
        assert!(!record.is_convertible());
    }

    #[test]
    fn empty_record_fails_validation() {
        let record = MessageRecord::Request(RequestRecord { parts: vec![] });
        assert_eq!(record.validate(), Err(InvalidRecord::Empty));
    }

    #[test]
    fn anonymous_tool_call_fails_validation() {
        let record = MessageRecord::Response(ResponseRecord {
            parts: vec![tool_call("")],
            timestamp: Utc::now(),
            model_name: None,
        });
        assert!(matches!(
            record.validate(),
            Err(InvalidRecord::KindMismatch { .. })
        ));
    }

    #[test]
    fn validate_as_reports_mismatched_kind() {
        let record = MessageRecord::model_text("hi", Utc::now());
        let err = record.validate_as(RecordKind::UserPrompt).unwrap_err();
        assert_eq!(
            err,
            InvalidRecord::KindMismatch {
                kind: RecordKind::ModelText,
                expected: "user_prompt",
            }
        );
    }

    #[test]
    fn serialized_form_is_tagged() {
        let record = MessageRecord::model_text("Hello", Utc::now());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "response");
        assert_eq!(json["parts"][0]["part_kind"], "text");

        let back: MessageRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
