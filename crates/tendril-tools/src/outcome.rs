//! Tool outcomes: what a tool invocation shows the user and tells the model.

use serde::{Deserialize, Serialize};
use tendril_protocol::{BlockKind, ChatRole, UiBlock, UiElement};
use tendril_provider::ContentBlock;

/// Avatar for domain errors and unknown tools.
pub const WARNING_AVATAR: &str = "⚠️";

/// Avatar for runtime faults inside a tool.
pub const FAULT_AVATAR: &str = "⛔️";

/// Avatar for invocations skipped because of an interrupt.
pub const SKIPPED_AVATAR: &str = "🛑";

/// The result of one tool invocation.
///
/// Built once per invocation and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub elements: Vec<UiElement>,
}

impl ToolOutcome {
    pub fn new(elements: Vec<UiElement>) -> Self {
        Self { elements }
    }

    /// An outcome with one tool element holding `blocks`.
    pub fn from_blocks(avatar: &str, blocks: Vec<UiBlock>) -> Self {
        Self::new(vec![UiElement {
            avatar: avatar.to_string(),
            role: ChatRole::Tool,
            blocks,
        }])
    }

    /// The model asked for a tool that is not registered.
    pub fn unavailable(name: &str) -> Self {
        Self::from_blocks(
            WARNING_AVATAR,
            vec![UiBlock::error(format!("Tool {name} is not available"))],
        )
    }

    /// A domain failure: bad input or an expected runtime condition.
    pub fn domain_error(tool: &str, message: impl std::fmt::Display) -> Self {
        Self::from_blocks(
            WARNING_AVATAR,
            vec![UiBlock::error(format!("Tool error in {tool}: {message}"))],
        )
    }

    /// A runtime fault, with a diagnostic for the operator.
    pub fn runtime_fault(
        tool: &str,
        message: impl std::fmt::Display,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self::from_blocks(
            FAULT_AVATAR,
            vec![
                UiBlock::error(format!("Unexpected error in {tool}: {message}")),
                UiBlock::code(diagnostic).with_meta("diagnostic"),
            ],
        )
    }

    /// The invocation was never started because the user interrupted.
    pub fn skipped() -> Self {
        Self::from_blocks(
            SKIPPED_AVATAR,
            vec![UiBlock::warning("🛑 Tool execution skipped: interrupted by user").with_meta("status")],
        )
    }

    /// All blocks across all elements, in order.
    pub fn blocks(&self) -> impl Iterator<Item = &UiBlock> {
        self.elements.iter().flat_map(|e| e.blocks.iter())
    }

    /// Whether any block is an error.
    pub fn has_error(&self) -> bool {
        self.blocks().any(|b| b.kind == BlockKind::Error)
    }

    /// Project into the content of a `tool_result` block.
    ///
    /// Images become base64 PNG image blocks. Everything else becomes text,
    /// prefixed by its meta label on its own line.
    pub fn as_llm_blocks(&self) -> Vec<ContentBlock> {
        self.blocks()
            .map(|block| match block.kind {
                BlockKind::Image => ContentBlock::png(block.content.clone()),
                _ => match &block.meta {
                    Some(meta) => ContentBlock::text(format!("{meta}\n{}", block.content)),
                    None => ContentBlock::text(block.content.clone()),
                },
            })
            .collect()
    }
}
