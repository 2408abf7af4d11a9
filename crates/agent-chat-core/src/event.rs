//! Session identifiers, persisted events and the display messages derived from them.

use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque identifier of a conversation session.
///
/// Never empty. A new identifier replaces the old one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Parse an identifier, rejecting only empty input.
    ///
    /// Whitespace is kept verbatim since the id is opaque.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            None
        } else {
            Some(Self(raw.to_owned()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the remote agent a deployment talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Parse an agent identifier, rejecting empty or whitespace-only input.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_owned()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who produced an event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventSource {
    User,
    #[default]
    AiAgent,
    System,
    /// Any label the backend sends that we do not know about.
    Other(String),
}

impl EventSource {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::User => "user",
            Self::AiAgent => "ai_agent",
            Self::System => "system",
            Self::Other(label) => label,
        }
    }
}

impl From<String> for EventSource {
    fn from(value: String) -> Self {
        match value.as_str() {
            "user" => Self::User,
            "ai_agent" => Self::AiAgent,
            "system" => Self::System,
            _ => Self::Other(value),
        }
    }
}

impl From<EventSource> for String {
    fn from(value: EventSource) -> Self {
        match value {
            EventSource::Other(label) => label,
            known => known.label().to_owned(),
        }
    }
}

/// What an event carries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    #[default]
    Message,
    Tool,
    Status,
    Other(String),
}

impl EventKind {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Message => "message",
            Self::Tool => "tool",
            Self::Status => "status",
            Self::Other(label) => label,
        }
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "message" => Self::Message,
            "tool" => Self::Tool,
            "status" => Self::Status,
            _ => Self::Other(value),
        }
    }
}

impl From<EventKind> for String {
    fn from(value: EventKind) -> Self {
        match value {
            EventKind::Other(label) => label,
            known => known.label().to_owned(),
        }
    }
}

/// A persisted unit of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub source: EventSource,
    #[serde(default)]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Event {
    /// Create a message event with plain text content.
    #[must_use]
    pub fn message(id: impl Into<String>, source: EventSource, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source,
            kind: EventKind::Message,
            correlation_id: None,
            data: serde_json::json!({ "type": "message", "content": content.into() }),
            created_at: None,
        }
    }

    /// Create an event with empty data, to be filled by live patches.
    #[must_use]
    pub fn empty(id: impl Into<String>, source: EventSource, kind: EventKind) -> Self {
        Self {
            id: id.into(),
            source,
            kind,
            correlation_id: None,
            data: Value::Object(serde_json::Map::new()),
            created_at: None,
        }
    }

    /// Processing label carried by a status event, if any.
    ///
    /// Outer `None` means the event is not a status event.
    #[must_use]
    pub fn status_label(&self) -> Option<Option<String>> {
        if self.kind != EventKind::Status {
            return None;
        }
        let status = self.data.get("status").and_then(Value::as_str).unwrap_or("");
        let detail = self.data.get("detail").and_then(Value::as_str);
        Some(processing_label(status, detail))
    }
}

/// Map a status update to the processing indicator text.
///
/// Terminal statuses clear the indicator.
#[must_use]
pub fn processing_label(status: &str, detail: Option<&str>) -> Option<String> {
    match status {
        "" | "ready" | "completed" | "cancelled" | "failed" => None,
        other => Some(detail.filter(|d| !d.trim().is_empty()).unwrap_or(other).to_owned()),
    }
}

/// Ordered event history of one session, in backend order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLog(Vec<Event>);

impl EventLog {
    #[must_use]
    pub const fn new(events: Vec<Event>) -> Self {
        Self(events)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.0.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Event] {
        &self.0
    }
}

impl From<Vec<Event>> for EventLog {
    fn from(events: Vec<Event>) -> Self {
        Self(events)
    }
}

impl IntoIterator for EventLog {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A tool invocation recorded on a tool event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_call_id: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Body of a display message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

/// A display-ready message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub source: String,
    pub body: MessageBody,
}

/// Derive display messages from events, in order.
///
/// Events whose id was already seen are skipped, so live events that echo a
/// historical one do not show twice. Status and unknown events carry no message.
pub fn derive_messages<'a>(events: impl IntoIterator<Item = &'a Event>) -> Vec<Message> {
    let mut seen = HashSet::new();
    let mut messages = Vec::new();
    for event in events {
        if !seen.insert(event.id.as_str()) {
            continue;
        }
        if let Some(message) = to_message(event) {
            messages.push(message);
        }
    }
    messages
}

fn to_message(event: &Event) -> Option<Message> {
    let body = match event.kind {
        EventKind::Tool => MessageBody::ToolCalls(tool_calls(&event.data)),
        EventKind::Message => {
            let calls = tool_calls(&event.data);
            if calls.is_empty() {
                MessageBody::Text(content_text(event.data.get("content")))
            } else {
                MessageBody::ToolCalls(calls)
            }
        }
        EventKind::Status | EventKind::Other(_) => return None,
    };

    Some(Message {
        id: event.id.clone(),
        source: event.source.label().to_owned(),
        body,
    })
}

fn tool_calls(data: &Value) -> Vec<ToolCall> {
    data.get("tool_calls")
        .cloned()
        .and_then(|calls| serde_json::from_value(calls).ok())
        .unwrap_or_default()
}

fn content_text(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .map(|part| match part {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        Some(other) => other.to_string(),
    }
}
