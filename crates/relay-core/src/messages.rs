use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single turn in a session transcript.
///
/// The history transform pipeline only ever filters or annotates turns; it
/// never reorders them, and an assistant turn is never left with zero
/// content blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "user")]
    User(UserMessage),
    #[serde(rename = "assistant")]
    Assistant(AssistantMessage),
    #[serde(rename = "tool_result")]
    ToolResult(ToolResultMessage),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: Vec<UserContent>,
    /// Envelope timestamp from the delivering channel, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<AssistantContent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    pub tool_call_id: String,
    pub content: Vec<ToolResultContent>,
}

// --- Content types ---

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UserContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { mime_type: String, data: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AssistantContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking { text: String },
    #[serde(rename = "tool_call")]
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolResultContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { mime_type: String, data: String },
}

// --- Convenience constructors & predicates ---

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User(UserMessage {
            content: vec![UserContent::Text { text: text.into() }],
            received_at: None,
        })
    }

    pub fn user_text_at(text: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Message::User(UserMessage {
            content: vec![UserContent::Text { text: text.into() }],
            received_at: Some(received_at),
        })
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage {
            content: vec![AssistantContent::Text { text: text.into() }],
        })
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Message::User(_))
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::ToolResult(_))
    }
}

impl UserMessage {
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                UserContent::Text { text } => Some(text.as_str()),
                UserContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Whether the turn is an operator slash-command rather than
    /// conversational content.
    pub fn is_slash_command(&self) -> bool {
        self.text_content().trim_start().starts_with('/')
    }
}

impl AssistantMessage {
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, AssistantContent::ToolCall { .. }))
    }

    pub fn has_thinking(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, AssistantContent::Thinking { .. }))
    }

    /// Text-only view of the turn: tool calls and thinking blocks removed.
    /// A turn that loses all its blocks gets one empty text block so it is
    /// never silently erased.
    pub fn text_only(&self) -> Self {
        let mut content: Vec<AssistantContent> = self
            .content
            .iter()
            .filter(|c| matches!(c, AssistantContent::Text { .. }))
            .cloned()
            .collect();
        if content.is_empty() {
            content.push(AssistantContent::Text { text: String::new() });
        }
        Self { content }
    }
}
