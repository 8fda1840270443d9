use crate::action::Action;

/// Inline keyboard (buttons) attached to listings and negotiation prompts.
#[derive(Clone, Debug, PartialEq)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineKeyboard {
    /// Single button bound to an action.
    pub fn single(label: &str, action: Action) -> Self {
        Self {
            buttons: vec![InlineButton {
                label: label.to_string(),
                callback_data: action.encode(),
            }],
        }
    }
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    /// Longest caption accepted under a photo.
    pub max_caption_len: usize,
}
