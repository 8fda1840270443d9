//! Application service tying the catalog, cooldowns and sessions together.

use std::{sync::Arc, time::Instant};

use crate::{
    catalog::{Listing, ListingStore, NewListing},
    cooldown::{CooldownDecision, CooldownRegistry},
    domain::{AccountId, ChannelRef, ListingId, SessionId},
    errors::Error,
    policy::AuthorizationPolicy,
    session::{PurchaseSession, SessionManager, CLOSED_SESSION_RETENTION},
    Result,
};

pub struct Marketplace {
    listings: ListingStore,
    cooldowns: CooldownRegistry,
    sessions: SessionManager,
    policy: Arc<dyn AuthorizationPolicy>,
}

impl Marketplace {
    pub fn new(
        listings: ListingStore,
        cooldowns: CooldownRegistry,
        sessions: SessionManager,
        policy: Arc<dyn AuthorizationPolicy>,
    ) -> Self {
        Self {
            listings,
            cooldowns,
            sessions,
            policy,
        }
    }

    pub async fn add_listing(&self, new: NewListing) -> Result<Listing> {
        self.listings.add(new).await
    }

    pub async fn remove_listing(&self, id: ListingId, requester: &AccountId) -> Result<Listing> {
        self.listings
            .remove(id, requester, self.policy.as_ref())
            .await
    }

    pub async fn list_listings(&self) -> Result<Vec<Listing>> {
        self.listings.list().await
    }

    pub async fn search_listings(&self, keyword: &str) -> Result<Vec<Listing>> {
        self.listings.search(keyword).await
    }

    pub async fn request_purchase(
        &self,
        listing_id: ListingId,
        buyer: &AccountId,
    ) -> Result<(Listing, PurchaseSession)> {
        self.request_purchase_at(listing_id, buyer, Instant::now())
            .await
    }

    /// Cooldown-gated purchase request: only an allowed request provisions a channel.
    pub async fn request_purchase_at(
        &self,
        listing_id: ListingId,
        buyer: &AccountId,
        now: Instant,
    ) -> Result<(Listing, PurchaseSession)> {
        let listing = self
            .listings
            .get(listing_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("listing {listing_id}")))?;

        if let CooldownDecision::Denied { remaining } =
            self.cooldowns.request_access_at(buyer, listing_id, now)
        {
            tracing::info!(
                listing_id = listing_id.0,
                buyer = %buyer,
                remaining_secs = remaining.as_secs(),
                "purchase request refused by cooldown"
            );
            return Err(Error::CooldownActive { remaining });
        }

        match self.sessions.open(&listing, buyer).await {
            Ok(session) => Ok((listing, session)),
            Err(e) => {
                // No session was opened, so the request does not count.
                self.cooldowns.release(buyer, listing_id, now);
                Err(e)
            }
        }
    }

    /// Periodic housekeeping: expired cooldowns and long-closed sessions.
    pub async fn sweep(&self, now: Instant) -> (usize, usize) {
        let cooldowns = self.cooldowns.evict_expired(now);
        let sessions = self
            .sessions
            .prune_closed(now, CLOSED_SESSION_RETENTION)
            .await;
        (cooldowns, sessions)
    }

    pub async fn close_session(&self, id: SessionId, requester: &AccountId) -> Result<PurchaseSession> {
        self.sessions.close(id, requester).await
    }

    /// Close the open session bound to `channel` (e.g. `/close` typed inside it).
    pub async fn close_session_in_channel(
        &self,
        channel: ChannelRef,
        requester: &AccountId,
    ) -> Result<PurchaseSession> {
        let session = self
            .sessions
            .find_by_channel(channel)
            .await
            .ok_or_else(|| Error::NotFound("no open purchase session in this chat".to_string()))?;
        self.sessions.close(session.id, requester).await
    }
}
