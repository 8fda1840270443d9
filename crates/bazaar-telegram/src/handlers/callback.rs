use std::sync::Arc;

use teloxide::{prelude::*, types::CallbackQuery};

use bazaar_core::{
    action::Action,
    errors::Error,
    messaging::port::MessagingPort,
    utils::{truncate_text, AuditEvent},
};

use crate::router::AppState;

use super::{account_of, log_failure};

async fn answer(state: &AppState, cb_id: &str, text: Option<&str>) {
    if let Err(e) = state.messenger.answer_callback_query(cb_id, text).await {
        tracing::warn!(error = %e, "failed to answer callback query");
    }
}

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let user = &q.from;
    let account = account_of(user);

    let Some(action) = q.data.as_deref().and_then(Action::parse) else {
        answer(&state, &cb_id, Some("Invalid action")).await;
        return Ok(());
    };

    match action {
        Action::Purchase { listing_id } => {
            match state.market.request_purchase(listing_id, &account).await {
                Ok((listing, session)) => {
                    state.audit.record(AuditEvent::session_opened(&session));
                    let text = format!(
                        "🛒 Negotiation channel opened for #{} {}. Check your private messages for the invite.",
                        listing.id,
                        truncate_text(&listing.title, 64)
                    );
                    answer(&state, &cb_id, Some(&text)).await;
                }
                Err(e) => {
                    if let Error::CooldownActive { remaining } = &e {
                        state.audit.record(AuditEvent::cooldown_denied(
                            &account,
                            listing_id.0,
                            remaining.as_secs(),
                        ));
                    }
                    log_failure(&state, user, &e, "purchase");
                    answer(&state, &cb_id, Some(&e.user_message())).await;
                }
            }
        }

        Action::CloseSession { session_id } => {
            match state.market.close_session(session_id, &account).await {
                Ok(session) => {
                    state
                        .audit
                        .record(AuditEvent::session_closed(&session, &account));
                    answer(&state, &cb_id, Some("🔒 Channel closed.")).await;
                }
                Err(e) => {
                    log_failure(&state, user, &e, "close");
                    answer(&state, &cb_id, Some(&e.user_message())).await;
                }
            }
        }
    }

    Ok(())
}
