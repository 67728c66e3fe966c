//! Plain-text terminal rendering of chat elements.

use std::io::Write;
use tendril_core::RenderSink;
use tendril_protocol::{BlockKind, UiBlock, UiElement};

/// Writes elements to any `Write`, one avatar-prefixed section each.
pub struct TerminalSink<W: Write + Send> {
    out: W,
}

impl TerminalSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> RenderSink for TerminalSink<W> {
    fn render(&mut self, element: &UiElement) {
        // A closed stdout is not worth aborting an interaction over.
        let _ = self
            .out
            .write_all(format_element(element).as_bytes())
            .and_then(|_| self.out.flush());
    }
}

/// Format one element as terminal text.
pub fn format_element(element: &UiElement) -> String {
    let mut out = String::new();
    for (i, block) in element.blocks.iter().enumerate() {
        let lead = if i == 0 {
            format!("{} ", element.avatar)
        } else {
            "   ".to_string()
        };
        out.push_str(&lead);
        out.push_str(&format_block(block));
        out.push('\n');
    }
    if element.blocks.is_empty() {
        out.push_str(&element.avatar);
        out.push('\n');
    }
    out
}

fn format_block(block: &UiBlock) -> String {
    let label = block
        .meta
        .as_deref()
        .map(|m| format!("[{m}] "))
        .unwrap_or_default();
    match block.kind {
        BlockKind::Text | BlockKind::Markdown | BlockKind::Info => {
            format!("{label}{}", block.content)
        }
        BlockKind::Warning => format!("{label}warning: {}", block.content),
        BlockKind::Error => format!("{label}error: {}", block.content),
        BlockKind::Code => {
            let body = block
                .content
                .lines()
                .map(|line| format!("    {line}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!("{label}\n{body}")
        }
        BlockKind::Image => format!("{label}<image, {} bytes base64>", block.content.len()),
    }
}
