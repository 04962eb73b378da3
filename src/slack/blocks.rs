//! Slack Block Kit message builders.
//!
//! Streamed replies are rendered as one or more `mrkdwn` section blocks,
//! optionally followed by an actions block holding the cancel button.

use slack_morphism::prelude::{
    SlackActionBlockElement, SlackActionsBlock, SlackBlock, SlackBlockButtonElement, SlackBlockId,
    SlackBlockPlainTextOnly, SlackBlockText, SlackSectionBlock,
};

use crate::presentation::Controls;
use crate::slack::markup;

/// Action id of the button that cancels the running turn.
pub const CANCEL_ACTION_ID: &str = "turn_cancel";

/// Slack rejects section text above 3000 characters.
pub const MAX_SECTION_CHARS: usize = 2900;

/// Build an actions block with the given `(action_id, label, value)` buttons.
#[must_use]
pub fn action_buttons(block_id: &str, buttons: &[(&str, &str, &str)]) -> SlackBlock {
    let elements: Vec<SlackActionBlockElement> = buttons
        .iter()
        .map(|(action_id, text, value)| {
            SlackActionBlockElement::Button(
                SlackBlockButtonElement::new(
                    (*action_id).into(),
                    SlackBlockPlainTextOnly::from(*text),
                )
                .with_value((*value).into()),
            )
        })
        .collect();
    SlackBlock::Actions(
        SlackActionsBlock::new(elements).with_block_id(SlackBlockId(block_id.into())),
    )
}

/// The "Cancel" button shown on a streaming reply.
#[must_use]
pub fn cancel_button() -> SlackBlock {
    action_buttons(
        "turn_controls",
        &[(CANCEL_ACTION_ID, "\u{1f6d1} Cancel", "cancel")],
    )
}

/// Build a plain `mrkdwn` section block.
#[must_use]
pub fn text_section(text: &str) -> SlackBlock {
    SlackBlock::Section(SlackSectionBlock::new().with_text(SlackBlockText::MarkDown(text.into())))
}

/// Cut `text` into pieces of at most `max` characters, preferring line
/// boundaries.
#[must_use]
pub fn section_chunks(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max {
        let limit = rest
            .char_indices()
            .nth(max)
            .map_or(rest.len(), |(offset, _)| offset);
        let cut = match rest[..limit].rfind('\n') {
            Some(at) if at > 0 => at,
            _ => limit,
        };
        chunks.push(rest[..cut].to_owned());
        rest = rest[cut..].strip_prefix('\n').unwrap_or(&rest[cut..]);
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_owned());
    }
    chunks
}

/// Blocks for a message showing agent markdown `text`.
#[must_use]
pub fn message_blocks(text: &str, controls: Controls) -> Vec<SlackBlock> {
    let rendered = markup::to_mrkdwn(text);
    let mut blocks: Vec<SlackBlock> = section_chunks(&rendered, MAX_SECTION_CHARS)
        .iter()
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| text_section(chunk))
        .collect();
    if blocks.is_empty() {
        blocks.push(text_section("\u{2026}"));
    }
    if controls == Controls::Cancel {
        blocks.push(cancel_button());
    }
    blocks
}

/// Fallback notification text for a message.
///
/// Slack shows it in notifications and clients that cannot render blocks.
#[must_use]
pub fn fallback_text(text: &str) -> String {
    let first_line = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    first_line.chars().take(150).collect()
}
