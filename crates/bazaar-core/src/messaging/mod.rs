//! Cross-messenger abstractions (Telegram today; other chat platforms later).

pub mod port;
pub mod types;
