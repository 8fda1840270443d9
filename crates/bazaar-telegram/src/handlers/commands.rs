use std::sync::Arc;

use teloxide::prelude::*;

use bazaar_core::{
    action::Action,
    catalog::Listing,
    domain::{ChannelRef, ChatId, ListingId},
    errors::Error,
    formatting::{escape_html, listing_caption_html},
    messaging::{port::MessagingPort, types::InlineKeyboard},
    utils::AuditEvent,
    Result,
};

use crate::router::AppState;

use super::{account_of, reply_private, report_failure};

pub(super) fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

const ADD_ITEM_USAGE: &str = "Usage: /additem Title | Description | Price (as the caption of a photo)";

/// `Title | Description | Price`; the price may carry a leading `$`.
pub(super) fn parse_add_item_args(arg: &str) -> Result<(String, String, f64)> {
    let parts: Vec<&str> = arg.split('|').map(str::trim).collect();
    let [title, description, price] = parts.as_slice() else {
        return Err(Error::Validation(ADD_ITEM_USAGE.to_string()));
    };
    let price = price
        .trim_start_matches('$')
        .trim()
        .parse::<f64>()
        .map_err(|_| Error::Validation(format!("Invalid price: {price}")))?;
    Ok((title.to_string(), description.to_string(), price))
}

fn parse_listing_id(arg: &str) -> Result<ListingId> {
    arg.trim()
        .trim_start_matches('#')
        .parse::<u64>()
        .ok()
        .filter(|id| *id > 0)
        .map(ListingId)
        .ok_or_else(|| Error::Validation("Usage: /removeitem ITEM_ID".to_string()))
}

fn help_html() -> String {
    "🛍️ <b>Marketplace</b>\n\n\
<b>📋 Commands:</b>\n\
/additem Title | Description | Price - Add an item (send as a photo caption)\n\
/listitems - List all items\n\
/search keyword - Search items by title or description\n\
/removeitem ID - Remove one of your items\n\
/close - Close a negotiation channel (inside it)\n\
/help - Show this help message\n\n\
<b>💡 Tips:</b>\n\
• Press 🛒 Buy under an item to open a private channel with the seller\n\
• You can request the same item again after one hour"
        .to_string()
}

/// Render each listing as a photo with a Buy button.
async fn show_listings(state: &AppState, chat_id: ChatId, listings: &[Listing]) {
    let caption_limit = state.messenger.capabilities().max_caption_len;
    for listing in listings {
        let caption = listing_caption_html(listing, caption_limit);
        let keyboard = InlineKeyboard::single(
            "🛒 Buy",
            Action::Purchase {
                listing_id: listing.id,
            },
        );

        let sent = state
            .messenger
            .send_photo(chat_id, &listing.image_url, &caption, Some(keyboard.clone()))
            .await;
        if let Err(e) = sent {
            // Stale image handle: still show the listing without the photo.
            tracing::warn!(listing_id = listing.id.0, error = %e, "failed to send listing photo");
            if let Err(e) = state
                .messenger
                .send_inline_keyboard(chat_id, &caption, keyboard)
                .await
            {
                tracing::warn!(listing_id = listing.id.0, error = %e, "failed to send listing");
            }
        }
    }
}

pub async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text().or_else(|| msg.caption()) else {
        return Ok(());
    };

    let account = account_of(user);
    let chat_id = ChatId(msg.chat.id.0);
    let (cmd, arg) = parse_command(text);

    match cmd.as_str() {
        "start" | "help" => {
            if let Err(e) = state.messenger.send_html(chat_id, &help_html()).await {
                tracing::warn!(error = %e, "failed to send help");
            }
            Ok(())
        }

        "listitems" => {
            match state.market.list_listings().await {
                Ok(listings) if listings.is_empty() => {
                    reply_private(
                        &state,
                        user,
                        "No items are currently available in the marketplace.",
                    )
                    .await;
                }
                Ok(listings) => {
                    let _ = state
                        .messenger
                        .send_html(chat_id, "Here are the available items:")
                        .await;
                    show_listings(&state, chat_id, &listings).await;
                }
                Err(e) => report_failure(&state, user, &e, "listitems").await,
            }
            Ok(())
        }

        "search" => {
            match state.market.search_listings(&arg).await {
                Ok(found) if found.is_empty() => {
                    reply_private(&state, user, "No items found matching your search.").await;
                }
                Ok(found) => {
                    let header = format!(
                        "Found {} items matching '{}':",
                        found.len(),
                        escape_html(&arg)
                    );
                    let _ = state.messenger.send_html(chat_id, &header).await;
                    show_listings(&state, chat_id, &found).await;
                }
                Err(e) => report_failure(&state, user, &e, "search").await,
            }
            Ok(())
        }

        "removeitem" => {
            let removed = match parse_listing_id(&arg) {
                Ok(id) => state.market.remove_listing(id, &account).await,
                Err(e) => Err(e),
            };
            match removed {
                Ok(listing) => {
                    state
                        .audit
                        .record(AuditEvent::listing_removed(&listing, &account));
                    reply_private(&state, user, "Item removed successfully.").await;
                }
                Err(e) => report_failure(&state, user, &e, "removeitem").await,
            }
            Ok(())
        }

        "close" => {
            let channel = ChannelRef {
                chat_id,
                thread_id: msg.thread_id,
            };
            match state
                .market
                .close_session_in_channel(channel, &account)
                .await
            {
                Ok(session) => {
                    state
                        .audit
                        .record(AuditEvent::session_closed(&session, &account));
                    reply_private(
                        &state,
                        user,
                        &format!("🔒 Negotiation channel for session {} closed.", session.id),
                    )
                    .await;
                }
                Err(e) => report_failure(&state, user, &e, "close").await,
            }
            Ok(())
        }

        _ => {
            if msg.chat.is_private() {
                let _ = state
                    .messenger
                    .send_html(chat_id, "Unknown command. Use /help to see what I can do.")
                    .await;
            }
            Ok(())
        }
    }
}
