//! Message shapes exchanged with the local client and the upstream realtime service.

use jarvis_core::{ActionReceipt, tools::ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const FUNCTION_CALL_ARGUMENTS_DONE: &str = "response.function_call_arguments.done";
pub const AUDIO_DELTA: &str = "response.audio.delta";

/// Plain-text notice sent to the local client once the upstream link is usable.
pub const READY_NOTICE: &str = "your gpt client is ready for u to use";

/// An event received from the upstream link, classified by its `type` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    FunctionCallArgumentsDone(FunctionCallArgumentsDone),
    AudioDelta(AudioDelta),
    /// An upstream `error` event. Forwarded verbatim.
    Error(Value),
    /// Any other event. Forwarded verbatim.
    Opaque(Value),
}

/// A completed function call. Every field is optional on the wire so that a
/// malformed call still gets exactly one result.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionCallArgumentsDone {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub call_id: String,
    /// JSON-encoded arguments, possibly empty.
    #[serde(default)]
    pub arguments: Option<Value>,
}

impl FunctionCallArgumentsDone {
    /// Parses the argument blob, falling back to `{}` when it is missing,
    /// malformed or not a string.
    pub fn parsed_arguments(&self) -> Value {
        match &self.arguments {
            Some(Value::String(raw)) if !raw.is_empty() => {
                serde_json::from_str(raw).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, call_id = %self.call_id, "Failed to parse function arguments");
                    json!({})
                })
            }
            Some(Value::String(_)) | Some(Value::Null) | None => json!({}),
            Some(other) => {
                tracing::warn!(call_id = %self.call_id, arguments = %other, "Function arguments are not a string");
                json!({})
            }
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AudioDelta {
    pub delta: String,
}

impl UpstreamEvent {
    /// Parses a text frame from upstream.
    ///
    /// Fails on invalid JSON or when a recognized event is missing its fields.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        match value.get("type").and_then(Value::as_str) {
            Some(FUNCTION_CALL_ARGUMENTS_DONE) => {
                serde_json::from_value(value).map(Self::FunctionCallArgumentsDone)
            }
            Some(AUDIO_DELTA) => serde_json::from_value(value).map(Self::AudioDelta),
            Some("error") => Ok(Self::Error(value)),
            _ => Ok(Self::Opaque(value)),
        }
    }

    pub fn type_tag(&self) -> &str {
        match self {
            Self::FunctionCallArgumentsDone(_) => FUNCTION_CALL_ARGUMENTS_DONE,
            Self::AudioDelta(_) => AUDIO_DELTA,
            Self::Error(_) => "error",
            Self::Opaque(value) => value.get("type").and_then(Value::as_str).unwrap_or("unknown"),
        }
    }
}

/// The `session` payload of a `session.update` event.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub instructions: String,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: &'static str,
}

impl SessionConfig {
    pub fn new(instructions: impl Into<String>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            instructions: instructions.into(),
            tools,
            tool_choice: "auto",
        }
    }
}

/// Events the relay itself originates towards upstream.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum RelayEvent<'a> {
    #[serde(rename = "session.update")]
    SessionUpdate { session: &'a SessionConfig },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate,
}

#[derive(Serialize, Debug, Clone)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub call_id: String,
    /// JSON-encoded [`FunctionCallResult`] body.
    pub output: String,
}

/// The reply to exactly one function call.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallResult {
    pub call_id: String,
    pub outcome: Result<ActionReceipt, String>,
}

impl FunctionCallResult {
    pub fn output(&self) -> Value {
        match &self.outcome {
            Ok(receipt) => json!({
                "success": true,
                "message": receipt.message(),
                "result": receipt.summary,
            }),
            Err(error) => json!({
                "success": false,
                "error": error,
            }),
        }
    }

    pub fn into_event(self) -> RelayEvent<'static> {
        let output = self.output().to_string();
        RelayEvent::ConversationItemCreate {
            item: ConversationItem {
                kind: "function_call_output",
                call_id: self.call_id,
                output,
            },
        }
    }
}

/// Messages the relay originates towards the local client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocalMessage {
    Error { error: ErrorDetails },
}

#[derive(Serialize, Debug, Clone)]
pub struct ErrorDetails {
    pub message: String,
    pub details: String,
}

impl LocalMessage {
    pub fn error(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Error {
            error: ErrorDetails {
                message: message.into(),
                details: details.into(),
            },
        }
    }
}
