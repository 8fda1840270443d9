//! Telegram-flavoured HTML rendering for listings and negotiation messages.

use crate::{catalog::Listing, domain::AccountId, session::PurchaseSession};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn format_price(price: f64) -> String {
    format!("${price:.2}")
}

/// Caption shown under a listing photo in `/listitems` and `/search`.
pub fn listing_caption_html(listing: &Listing, max_len: usize) -> String {
    let head = format!(
        "<b>#{} {}</b>\n",
        listing.id,
        escape_html(&listing.title)
    );
    let tail = format!(
        "\n\n<b>Price:</b> {}\n<b>Seller:</b> <code>{}</code>",
        format_price(listing.price),
        escape_html(listing.seller.as_str())
    );

    // Only the free-text description is shortened.
    let budget = max_len.saturating_sub(head.len() + tail.len());
    let description = truncate_escaped(&listing.description, budget);
    format!("{head}{description}{tail}")
}

/// Confirmation sent back after a successful add-item.
pub fn listing_added_html(listing: &Listing) -> String {
    format!(
        "✅ <b>Item Added!</b>\nItem ID: {}\n\n<b>Title:</b> {}\n<b>Description:</b> {}\n<b>Price:</b> {}",
        listing.id,
        escape_html(&listing.title),
        escape_html(&listing.description),
        format_price(listing.price)
    )
}

pub fn negotiation_prompt_html(listing: &Listing, initiator: &AccountId) -> String {
    format!(
        "🛒 <b>Purchase request</b>\n\n\
Buyer <code>{}</code> wants to buy <b>#{} {}</b> for {}.\n\
Seller: <code>{}</code>\n\n\
Use this channel to agree on the details. Staff can close it when done.",
        escape_html(initiator.as_str()),
        listing.id,
        escape_html(&listing.title),
        format_price(listing.price),
        escape_html(listing.seller.as_str())
    )
}

pub fn session_opened_log_html(session: &PurchaseSession, listing: &Listing) -> String {
    format!(
        "📝 Session {} opened by <code>{}</code> for listing #{} ({})",
        session.id,
        escape_html(session.initiator.as_str()),
        listing.id,
        escape_html(&listing.title)
    )
}

fn truncate_escaped(text: &str, max_len: usize) -> String {
    let escaped = escape_html(text);
    if escaped.len() <= max_len {
        return escaped;
    }

    // Cut the raw text so we never split an entity.
    let mut out = String::new();
    for ch in text.chars() {
        let next = escape_html(&ch.to_string());
        if out.len() + next.len() + 3 > max_len {
            break;
        }
        out.push_str(&next);
    }
    out.push_str("...");
    out
}
