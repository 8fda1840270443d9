//! In-memory port fakes shared by the unit tests.

use std::sync::{
    atomic::{AtomicBool, AtomicI32, Ordering},
    Mutex,
};

use async_trait::async_trait;

use crate::{
    domain::{AccountId, ChannelRef, ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::types::InlineKeyboard,
    ports::{ChannelPort, ChannelSpec, ProvisionedChannel},
    Result,
};

type Post = (ChannelRef, String, Option<InlineKeyboard>);

#[derive(Default)]
pub(crate) struct FakeChannels {
    next_id: AtomicI32,
    has_log_channel: bool,
    log_lookup_fails: bool,
    creates_fail: AtomicBool,
    deletes_fail: AtomicBool,
    managers: Mutex<Vec<AccountId>>,
    unreachable: Mutex<Vec<AccountId>>,
    revoked: Mutex<Vec<(ChannelRef, AccountId)>>,
    specs: Mutex<Vec<ChannelSpec>>,
    posts: Mutex<Vec<Post>>,
    deleted: Mutex<Vec<ChannelRef>>,
}

impl FakeChannels {
    pub(crate) const LOG_CHANNEL: ChannelRef = ChannelRef {
        chat_id: ChatId(-100),
        thread_id: None,
    };

    pub(crate) fn with_log_channel() -> Self {
        Self {
            has_log_channel: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_failing_log_lookup() -> Self {
        Self {
            log_lookup_fails: true,
            ..Self::default()
        }
    }

    pub(crate) fn grant_manage(&self, who: AccountId) {
        self.managers.lock().unwrap().push(who);
    }

    pub(crate) fn fail_creates(&self) {
        self.creates_fail.store(true, Ordering::SeqCst);
    }

    /// Invitations to `who` will not be delivered.
    pub(crate) fn make_unreachable(&self, who: AccountId) {
        self.unreachable.lock().unwrap().push(who);
    }

    pub(crate) fn fail_deletes(&self) {
        self.deletes_fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn created_specs(&self) -> Vec<ChannelSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub(crate) fn posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }

    pub(crate) fn deleted(&self) -> Vec<ChannelRef> {
        self.deleted.lock().unwrap().clone()
    }

    pub(crate) fn revoked(&self) -> Vec<(ChannelRef, AccountId)> {
        self.revoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelPort for FakeChannels {
    async fn create_private_channel(&self, spec: &ChannelSpec) -> Result<ProvisionedChannel> {
        if self.creates_fail.load(Ordering::SeqCst) {
            return Err(Error::Platform(
                "NEGOTIATION_CHAT_ID is not configured".to_string(),
            ));
        }
        self.specs.lock().unwrap().push(spec.clone());
        let thread = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        let unreachable_accounts = self.unreachable.lock().unwrap().clone();
        let unreachable = spec
            .allow_accounts
            .iter()
            .filter(|a| unreachable_accounts.contains(*a))
            .cloned()
            .collect();
        Ok(ProvisionedChannel {
            channel: ChannelRef {
                chat_id: ChatId(-42),
                thread_id: Some(thread),
            },
            unreachable,
        })
    }

    async fn post(
        &self,
        channel: ChannelRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        let mut posts = self.posts.lock().unwrap();
        posts.push((channel, html.to_string(), keyboard));
        Ok(MessageRef {
            chat_id: channel.chat_id,
            message_id: MessageId(posts.len() as i32),
        })
    }

    async fn delete_channel(&self, channel: ChannelRef) -> Result<()> {
        // Let concurrent callers interleave the way real network calls do.
        tokio::task::yield_now().await;
        if self.deletes_fail.load(Ordering::SeqCst) {
            return Err(Error::Platform("topic delete failed".to_string()));
        }
        self.deleted.lock().unwrap().push(channel);
        Ok(())
    }

    async fn revoke_access(&self, channel: ChannelRef, who: &AccountId) -> Result<()> {
        if self.managers.lock().unwrap().contains(who) {
            return Ok(());
        }
        self.revoked.lock().unwrap().push((channel, who.clone()));
        Ok(())
    }

    async fn can_manage_channel(&self, _channel: ChannelRef, who: &AccountId) -> Result<bool> {
        Ok(self.managers.lock().unwrap().contains(who))
    }

    async fn log_channel(&self) -> Result<Option<ChannelRef>> {
        if self.log_lookup_fails {
            return Err(Error::Platform("chat not found".to_string()));
        }
        Ok(self.has_log_channel.then_some(Self::LOG_CHANNEL))
    }
}
