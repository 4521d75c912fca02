// ABOUTME: Conversation message types - Message, Role, MessageContent, ContentPart
// ABOUTME: Content parts are a closed sum type so cascade logic matches them exhaustively

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One typed fragment of a message's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Image {
        /// Data URL or file path of the image
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    CodeBlock {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        code: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        output: serde_json::Value,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn tool_call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        ContentPart::ToolCall {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: serde_json::Value,
    ) -> Self {
        ContentPart::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            output,
        }
    }

    /// Tool call id carried by a tool-call or tool-result part
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            ContentPart::ToolCall { tool_call_id, .. }
            | ContentPart::ToolResult { tool_call_id, .. } => Some(tool_call_id),
            ContentPart::Text { .. }
            | ContentPart::Reasoning { .. }
            | ContentPart::Image { .. }
            | ContentPart::CodeBlock { .. } => None,
        }
    }

    /// Id of the tool call this part opens, if it is a tool-call part
    pub fn opened_tool_call(&self) -> Option<&str> {
        match self {
            ContentPart::ToolCall { tool_call_id, .. } => Some(tool_call_id),
            ContentPart::ToolResult { .. }
            | ContentPart::Text { .. }
            | ContentPart::Reasoning { .. }
            | ContentPart::Image { .. }
            | ContentPart::CodeBlock { .. } => None,
        }
    }

    /// Id of the tool call this part answers, if it is a tool-result part
    pub fn answered_tool_call(&self) -> Option<&str> {
        match self {
            ContentPart::ToolResult { tool_call_id, .. } => Some(tool_call_id),
            ContentPart::ToolCall { .. }
            | ContentPart::Text { .. }
            | ContentPart::Reasoning { .. }
            | ContentPart::Image { .. }
            | ContentPart::CodeBlock { .. } => None,
        }
    }
}

/// Message payload: plain text for user turns, ordered parts otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One turn in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message with a freshly generated id
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), role, content)
    }

    pub fn with_id(id: impl Into<String>, role: Role, content: MessageContent) -> Self {
        Self {
            id: id.into(),
            role,
            content,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(text.into()))
    }

    pub fn assistant(parts: Vec<ContentPart>) -> Self {
        Self::new(Role::Assistant, MessageContent::Parts(parts))
    }

    pub fn tool(parts: Vec<ContentPart>) -> Self {
        Self::new(Role::Tool, MessageContent::Parts(parts))
    }

    /// Content parts, or an empty slice for plain-text content
    pub fn parts(&self) -> &[ContentPart] {
        match &self.content {
            MessageContent::Parts(parts) => parts,
            MessageContent::Text(_) => &[],
        }
    }

    /// Tool call ids opened by this message's tool-call parts
    pub fn tool_call_ids(&self) -> Vec<String> {
        self.parts()
            .iter()
            .filter_map(ContentPart::opened_tool_call)
            .map(str::to_string)
            .collect()
    }

    /// True if any part (call or result) references the given tool call id
    pub fn references_tool_call(&self, tool_call_id: &str) -> bool {
        self.parts()
            .iter()
            .any(|p| p.tool_call_id() == Some(tool_call_id))
    }

    /// Plain text of a user message, or the concatenated text parts otherwise
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Assistant and tool messages carry no meaning once all parts are gone
    pub(crate) fn is_degenerate(&self) -> bool {
        match (&self.role, &self.content) {
            (Role::Assistant | Role::Tool, MessageContent::Parts(parts)) => parts.is_empty(),
            _ => false,
        }
    }
}
