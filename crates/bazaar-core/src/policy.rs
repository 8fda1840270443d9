use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    catalog::Listing, domain::AccountId, ports::ChannelPort, session::PurchaseSession, Result,
};

/// Central place for marketplace permission decisions.
#[async_trait]
pub trait AuthorizationPolicy: Send + Sync {
    fn can_remove(&self, listing: &Listing, who: &AccountId) -> bool;

    async fn can_close_session(&self, session: &PurchaseSession, who: &AccountId) -> Result<bool>;
}

/// Default policy: sellers own their listings; closing a negotiation channel
/// needs the platform's manage-channel capability.
pub struct MarketPolicy {
    channels: Arc<dyn ChannelPort>,
}

impl MarketPolicy {
    pub fn new(channels: Arc<dyn ChannelPort>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl AuthorizationPolicy for MarketPolicy {
    fn can_remove(&self, listing: &Listing, who: &AccountId) -> bool {
        &listing.seller == who
    }

    async fn can_close_session(&self, session: &PurchaseSession, who: &AccountId) -> Result<bool> {
        self.channels.can_manage_channel(session.channel, who).await
    }
}
