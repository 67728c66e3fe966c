//! Building the message history sent to the model.
//!
//! There are two separate paths. Token counting strips thinking blocks and
//! leaves the battery placeholder in place. A real request keeps thinking,
//! marks a cache breakpoint and fills in the battery notice.

use crate::battery::Battery;
use crate::interaction::Interaction;
use crate::prompts::BATTERY_PLACEHOLDER;
use tendril_provider::{CacheControl, ContentBlock, Message};

/// Appended when history would otherwise end on an assistant message.
pub const FILLER_USER_TEXT: &str = "<dummy text to ensure final user message>";

/// Which call the history is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    /// A completion request.
    Request,
    /// A token-count dry run.
    TokenCount,
}

/// Messages for every previous interaction, then the current one, ending
/// with a user message that carries `suffix` as its last block.
pub fn build_history(
    previous: &[Interaction],
    current: &Interaction,
    suffix: &str,
    mode: HistoryMode,
) -> Vec<Message> {
    let mut messages: Vec<Message> = previous
        .iter()
        .chain(std::iter::once(current))
        .flat_map(|interaction| interaction.messages(mode))
        .collect();

    if !messages.last().is_some_and(Message::is_user) {
        messages.push(Message::user(FILLER_USER_TEXT));
    }
    if let Some(last) = messages.last_mut() {
        last.content.push(ContentBlock::text(suffix));
    }
    messages
}

/// Finish request-mode history: put the cache breakpoint on the block
/// before the suffix and substitute the battery notice.
pub fn prepare_request(messages: &mut [Message], battery: Battery, low_threshold: f64) {
    let Some(last) = messages.last_mut().filter(|m| m.is_user()) else {
        return;
    };

    if let Some(index) = last.content.len().checked_sub(2) {
        last.content[index].set_cache_control(CacheControl::Ephemeral);
    }

    let notice = battery.notice(low_threshold);
    for block in &mut last.content {
        if let ContentBlock::Text { text, .. } = block {
            if text.contains(BATTERY_PLACEHOLDER) {
                *text = text.replace(BATTERY_PLACEHOLDER, &notice);
            }
        }
    }
}
