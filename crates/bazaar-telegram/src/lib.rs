//! Telegram adapter (teloxide).
//!
//! This crate implements the `bazaar-core` messaging and channel ports over the
//! Telegram Bot API. Negotiation channels are forum topics inside one private
//! supergroup; access is granted with single-use invite links.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode},
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use bazaar_core::{
    domain::{AccountId, ChannelRef, ChatId, MessageId, MessageRef},
    errors::Error,
    formatting::escape_html,
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    ports::{ChannelPort, ChannelSpec, ProvisionedChannel},
    Result,
};

/// Telegram caps forum topic names at 128 characters.
const MAX_TOPIC_NAME: usize = 128;
const TOPIC_ICON_COLOR: u32 = 0x6FB9F0;

fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(chat_id.0)
}

fn map_err(e: teloxide::RequestError) -> Error {
    Error::Platform(format!("telegram error: {e}"))
}

fn to_markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .buttons
        .into_iter()
        .map(|b| vec![InlineKeyboardButton::callback(b.label, b.callback_data)])
        .collect();
    InlineKeyboardMarkup::new(rows)
}

/// Parse an account handle back into a Telegram user id.
pub fn tg_user_id(account: &AccountId) -> Option<teloxide::types::UserId> {
    account
        .as_str()
        .parse::<u64>()
        .ok()
        .map(teloxide::types::UserId)
}

async fn with_retry<T, Fut>(mut op: impl FnMut() -> Fut) -> Result<T>
where
    Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
    Fut::IntoFuture: Send,
{
    const MAX_RETRIES: usize = 1;
    let mut attempts = 0usize;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => match e {
                teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                    continue;
                }
                other => return Err(map_err(other)),
            },
        }
    }
}

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            max_caption_len: 1024,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        let msg = with_retry(|| {
            self.bot
                .send_message(tg_chat(chat_id), html.to_string())
                .parse_mode(ParseMode::Html)
        })
        .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        image_ref: &str,
        caption_html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        let markup = keyboard.map(to_markup);
        let msg = with_retry(|| {
            let mut req = self
                .bot
                .send_photo(tg_chat(chat_id), InputFile::file_id(image_ref.to_string()))
                .caption(caption_html.to_string())
                .parse_mode(ParseMode::Html);
            if let Some(m) = &markup {
                req = req.reply_markup(m.clone());
            }
            req
        })
        .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        let markup = to_markup(keyboard);
        let msg = with_retry(|| {
            self.bot
                .send_message(tg_chat(chat_id), text.to_string())
                .parse_mode(ParseMode::Html)
                .reply_markup(markup.clone())
        })
        .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await?;
        Ok(())
    }
}

/// Forum-topic implementation of [`ChannelPort`].
///
/// Telegram cannot hide one topic from other group members, so the hosting
/// supergroup must be private and staffed; the default-deny part of a
/// [`ChannelSpec`] is honoured by inviting only the allowed accounts. Role
/// grants map to the group's administrators, who are already members.
/// Closing a channel revokes its invite links and removes the buyer again.
#[derive(Clone)]
pub struct TelegramChannels {
    bot: Bot,
    negotiation_chat: Option<ChatId>,
    log_chat: Option<ChatId>,
    invites: Arc<Mutex<HashMap<ChannelRef, Vec<(AccountId, String)>>>>,
}

impl TelegramChannels {
    pub fn new(bot: Bot, negotiation_chat: Option<i64>, log_chat: Option<i64>) -> Self {
        Self {
            bot,
            negotiation_chat: negotiation_chat.map(ChatId),
            log_chat: log_chat.map(ChatId),
            invites: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn negotiation_chat(&self) -> Result<ChatId> {
        self.negotiation_chat.ok_or_else(|| {
            Error::Platform("NEGOTIATION_CHAT_ID is not configured".to_string())
        })
    }

    /// DM `account` a single-use invite link and return the link.
    async fn invite(&self, group: ChatId, account: &AccountId, topic: &str) -> Result<String> {
        let Some(user) = tg_user_id(account) else {
            return Err(Error::Platform(format!("not a telegram account: {account}")));
        };

        let link = with_retry(|| {
            self.bot
                .create_chat_invite_link(tg_chat(group))
                .member_limit(1)
        })
        .await?
        .invite_link;

        let html = format!(
            "🛒 A private negotiation channel was opened: <b>{}</b>\n{}",
            escape_html(topic),
            escape_html(&link)
        );
        let sent = with_retry(|| {
            self.bot
                .send_message(teloxide::types::ChatId(user.0 as i64), html.clone())
                .parse_mode(ParseMode::Html)
        })
        .await;
        if let Err(e) = sent {
            // Nobody received the link; make sure nobody can use it.
            self.revoke_link(group, &link).await;
            return Err(e);
        }
        Ok(link)
    }

    async fn revoke_link(&self, group: ChatId, link: &str) {
        let revoked = with_retry(|| {
            self.bot
                .revoke_chat_invite_link(tg_chat(group), link.to_string())
        })
        .await;
        if let Err(e) = revoked {
            tracing::warn!(error = %e, "failed to revoke invite link");
        }
    }

    fn remember_invite(&self, channel: ChannelRef, account: &AccountId, link: String) {
        self.invites
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(channel)
            .or_default()
            .push((account.clone(), link));
    }

    /// Forget and return the links issued for `channel`, optionally only those for `who`.
    fn take_invites(&self, channel: ChannelRef, who: Option<&AccountId>) -> Vec<String> {
        let mut invites = self.invites.lock().unwrap_or_else(|e| e.into_inner());
        let Some(issued) = invites.get_mut(&channel) else {
            return Vec::new();
        };

        let (taken, kept): (Vec<_>, Vec<_>) = issued
            .drain(..)
            .partition(|(account, _)| who.map_or(true, |w| w == account));
        if kept.is_empty() {
            invites.remove(&channel);
        } else {
            *issued = kept;
        }
        taken.into_iter().map(|(_, link)| link).collect()
    }
}

#[async_trait]
impl ChannelPort for TelegramChannels {
    async fn create_private_channel(&self, spec: &ChannelSpec) -> Result<ProvisionedChannel> {
        let group = self.negotiation_chat()?;
        let name: String = spec.name.chars().take(MAX_TOPIC_NAME).collect();

        let topic = with_retry(|| {
            self.bot
                .create_forum_topic(tg_chat(group), name.clone(), TOPIC_ICON_COLOR, "")
        })
        .await?;

        let channel = ChannelRef {
            chat_id: group,
            thread_id: Some(topic.message_thread_id),
        };

        let mut unreachable = Vec::new();
        if spec.deny_everyone {
            for account in &spec.allow_accounts {
                match self.invite(group, account, &name).await {
                    Ok(link) => self.remember_invite(channel, account, link),
                    Err(e) => {
                        tracing::warn!(account = %account, error = %e, "failed to invite account to negotiation channel");
                        unreachable.push(account.clone());
                    }
                }
            }
        }

        Ok(ProvisionedChannel {
            channel,
            unreachable,
        })
    }

    async fn post(
        &self,
        channel: ChannelRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        let markup = keyboard.map(to_markup);
        let msg = with_retry(|| {
            let mut req = self
                .bot
                .send_message(tg_chat(channel.chat_id), html.to_string())
                .parse_mode(ParseMode::Html);
            if let Some(thread) = channel.thread_id {
                req = req.message_thread_id(thread);
            }
            if let Some(m) = &markup {
                req = req.reply_markup(m.clone());
            }
            req
        })
        .await?;

        Ok(MessageRef {
            chat_id: channel.chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn delete_channel(&self, channel: ChannelRef) -> Result<()> {
        let Some(thread) = channel.thread_id else {
            return Err(Error::Platform(
                "refusing to delete a chat that is not a forum topic".to_string(),
            ));
        };
        with_retry(|| self.bot.delete_forum_topic(tg_chat(channel.chat_id), thread)).await?;

        for link in self.take_invites(channel, None) {
            self.revoke_link(channel.chat_id, &link).await;
        }
        Ok(())
    }

    async fn revoke_access(&self, channel: ChannelRef, who: &AccountId) -> Result<()> {
        for link in self.take_invites(channel, Some(who)) {
            with_retry(|| {
                self.bot
                    .revoke_chat_invite_link(tg_chat(channel.chat_id), link.clone())
            })
            .await?;
        }

        let Some(user) = tg_user_id(who) else {
            return Ok(());
        };
        let chat = tg_chat(channel.chat_id);
        let member = with_retry(|| self.bot.get_chat_member(chat, user)).await?;
        if member.kind.is_privileged() || !member.kind.is_present() {
            return Ok(());
        }

        // Ban then unban: removes the member without blocking future invites.
        with_retry(|| self.bot.ban_chat_member(chat, user)).await?;
        with_retry(|| self.bot.unban_chat_member(chat, user).only_if_banned(true)).await?;
        tracing::info!(account = %who, "removed buyer from negotiation group");
        Ok(())
    }

    async fn can_manage_channel(&self, channel: ChannelRef, who: &AccountId) -> Result<bool> {
        let Some(user) = tg_user_id(who) else {
            return Ok(false);
        };
        let member =
            with_retry(|| self.bot.get_chat_member(tg_chat(channel.chat_id), user)).await?;
        Ok(member.kind.can_manage_chat())
    }

    async fn log_channel(&self) -> Result<Option<ChannelRef>> {
        Ok(self.log_chat.map(|chat_id| ChannelRef {
            chat_id,
            thread_id: None,
        }))
    }
}
