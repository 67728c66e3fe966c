//! The render boundary.
//!
//! The loop pushes every element a human should see through a
//! [`RenderSink`]. It never reads anything back.

use tendril_protocol::{ChatRole, UiBlock, UiElement};
use tendril_provider::{CompletionResult, ContentBlock, Outcome};

pub const USER_AVATAR: &str = "🧬";
pub const ASSISTANT_AVATAR: &str = "🤖";
pub const THINKING_AVATAR: &str = "💭";
pub const TOOL_REQUEST_AVATAR: &str = "🔧";
pub const NOTICE_AVATAR: &str = "⚠️";
pub const STATS_AVATAR: &str = "💰";

/// Receives rendered elements.
pub trait RenderSink: Send {
    fn render(&mut self, element: &UiElement);
}

impl<F> RenderSink for F
where
    F: FnMut(&UiElement) + Send,
{
    fn render(&mut self, element: &UiElement) {
        self(element)
    }
}

/// Sink that keeps everything it is given.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub elements: Vec<UiElement>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Avatars in render order.
    pub fn avatars(&self) -> Vec<&str> {
        self.elements.iter().map(|e| e.avatar.as_str()).collect()
    }
}

impl RenderSink for CollectingSink {
    fn render(&mut self, element: &UiElement) {
        self.elements.push(element.clone());
    }
}

/// The element showing a user message.
pub fn user_element(text: &str) -> UiElement {
    UiElement::single(USER_AVATAR, ChatRole::User, UiBlock::text(text))
}

/// Elements for one completion.
///
/// Produced content is shown block by block. Interruptions and failures
/// are shown as a single notice carrying the result's first text.
pub fn completion_elements(result: &CompletionResult) -> Vec<UiElement> {
    match result.outcome {
        Outcome::ToolUse | Outcome::EndTurn => content_elements(&result.content),
        Outcome::UnexpectedStop | Outcome::Refusal => {
            let mut elements = content_elements(&result.content);
            let reason = if result.outcome == Outcome::Refusal {
                "The model refused to answer"
            } else {
                "The response stopped unexpectedly"
            };
            elements.push(UiElement::single(
                NOTICE_AVATAR,
                ChatRole::System,
                UiBlock::warning(reason),
            ));
            elements
        }
        Outcome::Interrupted => vec![UiElement::single(
            NOTICE_AVATAR,
            ChatRole::System,
            UiBlock::warning(first_text(result)),
        )],
        Outcome::HttpError | Outcome::Exception => vec![UiElement::single(
            NOTICE_AVATAR,
            ChatRole::System,
            UiBlock::error(first_text(result)),
        )],
    }
}

fn first_text(result: &CompletionResult) -> String {
    result
        .content
        .iter()
        .find_map(ContentBlock::as_text)
        .unwrap_or_default()
        .to_string()
}

fn content_elements(content: &[ContentBlock]) -> Vec<UiElement> {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Thinking { thinking, .. } => Some(UiElement::single(
                THINKING_AVATAR,
                ChatRole::Assistant,
                UiBlock::markdown(thinking.clone()),
            )),
            ContentBlock::Text { text, .. } => Some(UiElement::single(
                ASSISTANT_AVATAR,
                ChatRole::Assistant,
                UiBlock::markdown(text.clone()),
            )),
            ContentBlock::ToolUse { name, input, .. } => {
                let request = serde_json::json!({ "tool": name, "input": input });
                let pretty = serde_json::to_string_pretty(&request).unwrap_or_default();
                Some(UiElement::single(
                    TOOL_REQUEST_AVATAR,
                    ChatRole::Tool,
                    UiBlock::code(pretty),
                ))
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tendril_protocol::BlockKind;
    use tendril_provider::ModelTier;

    #[test]
    fn test_tool_use_elements() {
        let result = CompletionResult::completed(
            Outcome::ToolUse,
            vec![
                ContentBlock::Thinking {
                    thinking: "hmm".into(),
                    signature: None,
                },
                ContentBlock::text("listing"),
                ContentBlock::tool_use("t1", "bash_tool", json!({"command": "ls"})),
            ],
            None,
            ModelTier::Sonnet,
        );
        let elements = completion_elements(&result);
        let avatars: Vec<_> = elements.iter().map(|e| e.avatar.as_str()).collect();
        assert_eq!(avatars, ["💭", "🤖", "🔧"]);
        assert!(elements[2].blocks[0].content.contains("\"tool\": \"bash_tool\""));
    }

    #[test]
    fn test_failure_is_one_error_element() {
        let result = CompletionResult::http_error(529, "overloaded", ModelTier::Sonnet);
        let elements = completion_elements(&result);
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].blocks[0].kind, BlockKind::Error);
        assert!(elements[0].blocks[0].content.contains("529"));
    }

    #[test]
    fn test_closure_sink() {
        let mut seen = 0;
        {
            let mut sink = |_: &UiElement| seen += 1;
            sink.render(&user_element("hi"));
            sink.render(&user_element("again"));
        }
        assert_eq!(seen, 2);
    }
}
