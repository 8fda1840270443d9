use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::domain::{AccountId, ListingId};

/// Fixed window during which a repeat purchase request for the same
/// (buyer, listing) pair is refused.
pub const COOLDOWN_WINDOW: Duration = Duration::from_secs(3600);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CooldownDecision {
    Allowed,
    Denied { remaining: Duration },
}

impl CooldownDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CooldownDecision::Allowed)
    }
}

/// Last purchase request per (buyer, listing).
///
/// The check and the update happen under one lock, so of several simultaneous
/// requests for the same pair at most one is allowed.
#[derive(Debug)]
pub struct CooldownRegistry {
    window: Duration,
    entries: Mutex<HashMap<(AccountId, ListingId), Instant>>,
}

impl Default for CooldownRegistry {
    fn default() -> Self {
        Self::new(COOLDOWN_WINDOW)
    }
}

impl CooldownRegistry {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn request_access(&self, buyer: &AccountId, listing_id: ListingId) -> CooldownDecision {
        self.request_access_at(buyer, listing_id, Instant::now())
    }

    pub fn request_access_at(
        &self,
        buyer: &AccountId,
        listing_id: ListingId,
        now: Instant,
    ) -> CooldownDecision {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let key = (buyer.clone(), listing_id);

        if let Some(last) = entries.get(&key) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.window {
                return CooldownDecision::Denied {
                    remaining: self.window - elapsed,
                };
            }
        }

        entries.insert(key, now);
        CooldownDecision::Allowed
    }

    /// Undo an allowed request whose follow-up work failed.
    ///
    /// Only removes the entry if it still carries `stamped_at`, so a newer
    /// grant for the same pair is never discarded.
    pub fn release(&self, buyer: &AccountId, listing_id: ListingId, stamped_at: Instant) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let key = (buyer.clone(), listing_id);
        if entries.get(&key) == Some(&stamped_at) {
            entries.remove(&key);
            return true;
        }
        false
    }

    /// Drop entries whose window has fully passed. Returns how many were removed.
    ///
    /// An evicted pair would be allowed anyway, so this never changes a decision.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, last| now.saturating_duration_since(*last) < self.window);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
