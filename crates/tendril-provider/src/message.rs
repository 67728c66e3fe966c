//! Message types in the provider's wire shape.
//!
//! These serialize directly to the JSON the messages endpoint expects, so a
//! stored conversation can be replayed without any conversion step.

use serde::{Deserialize, Serialize};

/// The role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender.
    pub role: Role,
    /// The content of the message.
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Create a user message with a single text block.
    pub fn user(text: impl Into<String>) -> Self {
        Self::user_blocks(vec![ContentBlock::text(text)])
    }

    /// Create a user message from blocks.
    pub fn user_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    /// Create an assistant message with a single text block.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::assistant_blocks(vec![ContentBlock::text(text)])
    }

    /// Create an assistant message from blocks.
    pub fn assistant_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    /// Add a content block to the message.
    pub fn with_block(mut self, block: ContentBlock) -> Self {
        self.content.push(block);
        self
    }

    /// Get the text content of the message (concatenated).
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Prompt-cache breakpoint marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheControl {
    Ephemeral,
}

/// A block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content.
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },

    /// Extended thinking (from assistant). The signature must be sent back
    /// unchanged for the API to accept the block.
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// Thinking the API chose to redact.
    RedactedThinking { data: String },

    /// Tool use request (from assistant).
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool result (from user).
    ToolResult {
        tool_use_id: String,
        content: Vec<ContentBlock>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },

    /// Image content.
    Image {
        source: ImageSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },

    /// Any block kind this crate does not know about. Dropped when history
    /// is rebuilt.
    #[serde(other)]
    Unsupported,
}

impl ContentBlock {
    /// Create a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            cache_control: None,
        }
    }

    /// Create a tool use block.
    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Create a tool result block.
    pub fn tool_result(tool_use_id: impl Into<String>, content: Vec<ContentBlock>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content,
            is_error: None,
            cache_control: None,
        }
    }

    /// Create a base64 PNG image block.
    pub fn png(data: impl Into<String>) -> Self {
        Self::Image {
            source: ImageSource::Base64 {
                media_type: "image/png".to_string(),
                data: data.into(),
            },
            cache_control: None,
        }
    }

    /// Text payload, if this is a text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Whether this is a thinking or redacted thinking block.
    pub fn is_thinking(&self) -> bool {
        matches!(
            self,
            ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. }
        )
    }

    /// Set a cache breakpoint on this block. Returns false for block kinds
    /// that cannot carry one.
    pub fn set_cache_control(&mut self, control: CacheControl) -> bool {
        match self {
            ContentBlock::Text { cache_control, .. }
            | ContentBlock::ToolResult { cache_control, .. }
            | ContentBlock::Image { cache_control, .. } => {
                *cache_control = Some(control);
                true
            }
            _ => false,
        }
    }

    pub fn cache_control(&self) -> Option<CacheControl> {
        match self {
            ContentBlock::Text { cache_control, .. }
            | ContentBlock::ToolResult { cache_control, .. }
            | ContentBlock::Image { cache_control, .. } => *cache_control,
            _ => None,
        }
    }
}

/// Image source for image content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ImageSource {
    /// Base64 encoded image.
    #[serde(rename = "base64")]
    Base64 { media_type: String, data: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert!(msg.is_user());
        assert_eq!(msg.text(), "Hello");
    }

    #[test]
    fn test_message_with_blocks() {
        let msg = Message::assistant("Here's the answer")
            .with_block(ContentBlock::text("\n\nMore text"));
        assert_eq!(msg.text(), "Here's the answer\n\nMore text");
    }

    #[test]
    fn test_text_block_wire_shape() {
        let block = ContentBlock::text("hi");
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            json!({"type": "text", "text": "hi"})
        );
    }

    #[test]
    fn test_tool_result_wire_shape() {
        let mut block = ContentBlock::tool_result("toolu_1", vec![ContentBlock::text("ok")]);
        assert!(block.set_cache_control(CacheControl::Ephemeral));
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            json!({
                "type": "tool_result",
                "tool_use_id": "toolu_1",
                "content": [{"type": "text", "text": "ok"}],
                "cache_control": {"type": "ephemeral"}
            })
        );
    }

    #[test]
    fn test_thinking_keeps_signature() {
        let raw = json!({"type": "thinking", "thinking": "hmm", "signature": "sig=="});
        let block: ContentBlock = serde_json::from_value(raw.clone()).unwrap();
        assert!(block.is_thinking());
        assert_eq!(serde_json::to_value(&block).unwrap(), raw);
    }

    #[test]
    fn test_unknown_block_kind_is_tolerated() {
        let raw = json!({"type": "server_tool_use", "id": "x", "name": "web_search"});
        let block: ContentBlock = serde_json::from_value(raw).unwrap();
        assert_eq!(block, ContentBlock::Unsupported);
    }

    #[test]
    fn test_cache_control_rejected_on_thinking() {
        let mut block = ContentBlock::Thinking {
            thinking: "x".into(),
            signature: None,
        };
        assert!(!block.set_cache_control(CacheControl::Ephemeral));
        assert_eq!(block.cache_control(), None);
    }
}
