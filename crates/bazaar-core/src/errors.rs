use std::time::Duration;

use crate::domain::SessionId;

/// Core error type for the marketplace.
///
/// Adapter crates should map their specific errors into this type so the bot
/// core can handle failures consistently (private reply vs log-and-continue).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("cooldown active: {}s remaining", .remaining.as_secs())]
    CooldownActive { remaining: Duration },

    #[error("session {0} is already closed")]
    SessionClosed(SessionId),

    #[error("platform error: {0}")]
    Platform(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Text shown privately to the user who triggered the failure.
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation(msg) => msg.clone(),
            Error::NotFound(_) => "Item not found.".to_string(),
            Error::PermissionDenied(msg) => msg.clone(),
            Error::CooldownActive { remaining } => format!(
                "You already requested this item recently. Try again in {}.",
                format_remaining(*remaining)
            ),
            Error::SessionClosed(_) => "This purchase session is already closed.".to_string(),
            Error::Platform(_) | Error::Config(_) | Error::Io(_) | Error::Json(_) => {
                "Something went wrong. Please try again later.".to_string()
            }
        }
    }
}

fn format_remaining(d: Duration) -> String {
    let secs = d.as_secs().max(1);
    let mins = secs / 60;
    if mins >= 1 {
        return format!("{}m {}s", mins, secs % 60);
    }
    format!("{secs}s")
}

pub type Result<T> = std::result::Result<T, Error>;
