use std::{path::PathBuf, sync::Arc};

use teloxide::{net::Download, prelude::*};

use bazaar_core::{
    catalog::{validate_image, ImageAttachment, Listing, NewListing},
    domain::ChatId,
    errors::Error,
    formatting::listing_added_html,
    messaging::port::MessagingPort,
    utils::AuditEvent,
    Result,
};

use crate::router::AppState;

use super::{
    account_of,
    commands::{parse_add_item_args, parse_command},
    report_failure,
};

/// Telegram re-encodes photos as JPEG; documents keep their declared mime type.
struct IncomingImage {
    attachment: ImageAttachment,
    file_unique_id: String,
}

fn incoming_image(msg: &Message) -> Option<IncomingImage> {
    if let Some(best) = msg.photo().and_then(|sizes| sizes.last()) {
        return Some(IncomingImage {
            attachment: ImageAttachment {
                reference: best.file.id.clone(),
                content_type: Some("image/jpeg".to_string()),
                local_path: None,
            },
            file_unique_id: best.file.unique_id.clone(),
        });
    }
    msg.document().map(|doc| IncomingImage {
        attachment: ImageAttachment {
            reference: doc.file.id.clone(),
            content_type: doc.mime_type.as_ref().map(|m| m.to_string()),
            local_path: None,
        },
        file_unique_id: doc.file.unique_id.clone(),
    })
}

fn extension_for(content_type: Option<&str>) -> &'static str {
    match content_type.map(|ct| ct.to_ascii_lowercase()).as_deref() {
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        _ => "jpg",
    }
}

async fn download_image(
    bot: &Bot,
    state: &AppState,
    image: &IncomingImage,
) -> anyhow::Result<PathBuf> {
    let file = bot.get_file(image.attachment.reference.clone()).await?;

    let ext = extension_for(image.attachment.content_type.as_deref());
    let path = state
        .cfg
        .image_dir
        .join(format!("{}.{ext}", image.file_unique_id));

    let mut dst = tokio::fs::File::create(&path).await?;
    bot.download_file(&file.path, &mut dst).await?;

    Ok(path)
}

async fn add_item(bot: &Bot, msg: &Message, state: &AppState) -> Result<Listing> {
    let Some(user) = msg.from() else {
        return Err(Error::Validation(
            "Anonymous senders cannot list items.".to_string(),
        ));
    };

    let mut image = incoming_image(msg);
    validate_image(image.as_ref().map(|i| &i.attachment))?;

    let text = msg.caption().or_else(|| msg.text()).unwrap_or("");
    let (_, arg) = parse_command(text);
    let (title, description, price) = parse_add_item_args(&arg)?;

    // A local copy is nice to have; the listing works from the file id alone.
    if let Some(img) = image.as_mut() {
        match download_image(bot, state, img).await {
            Ok(path) => img.attachment.local_path = Some(path),
            Err(e) => tracing::warn!(error = %e, "failed to download listing image"),
        }
    }

    state
        .market
        .add_listing(NewListing {
            title,
            description,
            price,
            image: image.map(|i| i.attachment),
            seller: account_of(user),
        })
        .await
}

pub async fn handle_add_item(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let chat_id = ChatId(msg.chat.id.0);

    match add_item(&bot, &msg, &state).await {
        Ok(listing) => {
            state.audit.record(AuditEvent::listing_added(&listing));
            let html = listing_added_html(&listing);
            let sent = state
                .messenger
                .send_photo(chat_id, &listing.image_url, &html, None)
                .await;
            if let Err(e) = sent {
                tracing::warn!(listing_id = listing.id.0, error = %e, "failed to echo listing photo");
                let _ = state.messenger.send_html(chat_id, &html).await;
            }
        }
        Err(e) => report_failure(&state, user, &e, "additem").await,
    }
    Ok(())
}
