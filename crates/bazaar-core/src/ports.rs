use async_trait::async_trait;

use crate::{
    domain::{AccountId, ChannelRef, MessageRef},
    messaging::types::InlineKeyboard,
    Result,
};

/// What a new private channel should look like.
///
/// Access follows a default-deny model: when `deny_everyone` is set only the
/// listed accounts and roles may see the channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelSpec {
    pub name: String,
    pub deny_everyone: bool,
    pub allow_accounts: Vec<AccountId>,
    pub allow_roles: Vec<String>,
}

/// A freshly created channel plus the allowed accounts the platform could not
/// reach with an invitation.
#[derive(Clone, Debug, PartialEq)]
pub struct ProvisionedChannel {
    pub channel: ChannelRef,
    pub unreachable: Vec<AccountId>,
}

/// Hexagonal port for channel provisioning and platform permissions.
#[async_trait]
pub trait ChannelPort: Send + Sync {
    async fn create_private_channel(&self, spec: &ChannelSpec) -> Result<ProvisionedChannel>;

    async fn post(
        &self,
        channel: ChannelRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef>;

    async fn delete_channel(&self, channel: ChannelRef) -> Result<()>;

    /// Withdraw whatever access `who` was granted for `channel`.
    ///
    /// Accounts holding the platform's manage capability keep their access.
    async fn revoke_access(&self, channel: ChannelRef, who: &AccountId) -> Result<()>;

    /// Whether `who` holds the platform's manage-channel capability for `channel`.
    async fn can_manage_channel(&self, channel: ChannelRef, who: &AccountId) -> Result<bool>;

    /// The designated logging channel, if the platform has one configured.
    async fn log_channel(&self) -> Result<Option<ChannelRef>>;
}
