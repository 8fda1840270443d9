//! Telegram update handlers.
//!
//! Each handler is a small adapter that:
//! - extracts the requester and arguments from the update
//! - calls into the `bazaar-core` marketplace service
//! - renders the outcome, sending failures privately to the requester

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message, User},
};

use bazaar_core::{
    domain::{AccountId, ChatId, UserId},
    errors::Error,
    formatting::escape_html,
    utils::AuditEvent,
};

use crate::router::AppState;

mod callback;
mod commands;
mod photo;

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    callback::handle_callback(q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    // Photos and image documents carry the command in their caption.
    let Some(text) = msg.text().or_else(|| msg.caption()) else {
        return Ok(());
    };
    if !text.starts_with('/') {
        return Ok(());
    }

    let (cmd, _) = commands::parse_command(text);
    if cmd == "additem" {
        return photo::handle_add_item(bot, msg, state).await;
    }
    commands::handle_command(msg, state).await
}

fn account_of(user: &User) -> AccountId {
    AccountId::from(UserId(user.id.0 as i64))
}

/// A user's private chat with the bot shares the user's id.
fn private_chat(user: &User) -> ChatId {
    ChatId(user.id.0 as i64)
}

async fn reply_private(state: &AppState, user: &User, html: &str) {
    if let Err(e) = state.messenger.send_html(private_chat(user), html).await {
        tracing::warn!(user_id = user.id.0, error = %e, "failed to send private reply");
    }
}

/// Internal failures go to the tracing log and the audit log.
fn log_failure(state: &AppState, user: &User, err: &Error, context: &str) {
    let account = account_of(user);
    match err {
        Error::Platform(_) | Error::Config(_) | Error::Io(_) | Error::Json(_) => {
            tracing::error!(account = %account, context, error = %err, "request failed");
            state
                .audit
                .record(AuditEvent::error(&account, &err.to_string(), Some(context)));
        }
        _ => tracing::debug!(account = %account, context, error = %err, "request refused"),
    }
}

async fn report_failure(state: &AppState, user: &User, err: &Error, context: &str) {
    log_failure(state, user, err, context);
    reply_private(state, user, &escape_html(&err.user_message())).await;
}
