//! Render-boundary element types.

use serde::{Deserialize, Serialize};

/// Kind of a rendered block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Text,
    Code,
    Error,
    Warning,
    Info,
    /// Base64 encoded PNG.
    Image,
    Markdown,
}

/// Who a rendered element is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    Tool,
    System,
}

/// A single block of rendered content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiBlock {
    /// Block kind.
    #[serde(rename = "type")]
    pub kind: BlockKind,
    /// Block payload. For images this is base64 data.
    pub content: String,
    /// Optional short label, e.g. `stdout` or `exit_code`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
}

impl UiBlock {
    /// Create a block without meta.
    pub fn new(kind: BlockKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            meta: None,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(BlockKind::Text, content)
    }

    pub fn code(content: impl Into<String>) -> Self {
        Self::new(BlockKind::Code, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(BlockKind::Error, content)
    }

    pub fn warning(content: impl Into<String>) -> Self {
        Self::new(BlockKind::Warning, content)
    }

    pub fn info(content: impl Into<String>) -> Self {
        Self::new(BlockKind::Info, content)
    }

    pub fn markdown(content: impl Into<String>) -> Self {
        Self::new(BlockKind::Markdown, content)
    }

    pub fn image(base64_png: impl Into<String>) -> Self {
        Self::new(BlockKind::Image, base64_png)
    }

    /// Attach a meta label.
    pub fn with_meta(mut self, meta: impl Into<String>) -> Self {
        self.meta = Some(meta.into());
        self
    }
}

/// A chat element: an avatar, an attribution and its blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiElement {
    pub avatar: String,
    pub role: ChatRole,
    pub blocks: Vec<UiBlock>,
}

impl UiElement {
    /// Create an element with no blocks.
    pub fn new(avatar: impl Into<String>, role: ChatRole) -> Self {
        Self {
            avatar: avatar.into(),
            role,
            blocks: Vec::new(),
        }
    }

    /// Create an element holding a single block.
    pub fn single(avatar: impl Into<String>, role: ChatRole, block: UiBlock) -> Self {
        Self::new(avatar, role).with_block(block)
    }

    /// Append a block.
    pub fn with_block(mut self, block: UiBlock) -> Self {
        self.blocks.push(block);
        self
    }

    /// Append a block in place.
    pub fn push(&mut self, block: UiBlock) {
        self.blocks.push(block);
    }

    /// Whether any block has the given kind.
    pub fn has_kind(&self, kind: BlockKind) -> bool {
        self.blocks.iter().any(|b| b.kind == kind)
    }

    /// Blocks of the given kind, in order.
    pub fn blocks_of(&self, kind: BlockKind) -> impl Iterator<Item = &UiBlock> {
        self.blocks.iter().filter(move |b| b.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_serializes_with_type_tag() {
        let block = UiBlock::code("hi\n").with_meta("stdout");
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "code");
        assert_eq!(json["content"], "hi\n");
        assert_eq!(json["meta"], "stdout");
    }

    #[test]
    fn test_meta_omitted_when_absent() {
        let json = serde_json::to_string(&UiBlock::text("plain")).unwrap();
        assert!(!json.contains("meta"));
    }

    #[test]
    fn test_element_filters_by_kind() {
        let element = UiElement::new("📺", ChatRole::Tool)
            .with_block(UiBlock::code("out"))
            .with_block(UiBlock::error("err"))
            .with_block(UiBlock::code("more"));

        assert!(element.has_kind(BlockKind::Error));
        assert!(!element.has_kind(BlockKind::Image));
        assert_eq!(element.blocks_of(BlockKind::Code).count(), 2);
    }

    #[test]
    fn test_element_deserializes() {
        let json = r#"{"avatar":"🤖","role":"assistant","blocks":[{"type":"markdown","content":"**hi**"}]}"#;
        let element: UiElement = serde_json::from_str(json).unwrap();
        assert_eq!(element.role, ChatRole::Assistant);
        assert_eq!(element.blocks[0].kind, BlockKind::Markdown);
        assert_eq!(element.blocks[0].meta, None);
    }
}
