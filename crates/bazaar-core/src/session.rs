use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use crate::{
    action::Action,
    catalog::Listing,
    domain::{AccountId, ChannelRef, ListingId, SessionId},
    errors::Error,
    formatting::{negotiation_prompt_html, session_opened_log_html},
    messaging::types::InlineKeyboard,
    policy::AuthorizationPolicy,
    ports::{ChannelPort, ChannelSpec},
    Result,
};

/// How long a closed session stays queryable before the sweeper drops it.
pub const CLOSED_SESSION_RETENTION: Duration = Duration::from_secs(3600);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// An ephemeral private negotiation channel for one purchase request.
#[derive(Clone, Debug, PartialEq)]
pub struct PurchaseSession {
    pub id: SessionId,
    pub listing_id: ListingId,
    pub initiator: AccountId,
    pub channel: ChannelRef,
    pub state: SessionState,
}

impl PurchaseSession {
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<SessionId, PurchaseSession>,
    /// Open sessions whose channel teardown is in flight.
    closing: HashSet<SessionId>,
    closed_at: HashMap<SessionId, Instant>,
}

/// Opens and closes purchase sessions.
///
/// The session table lock is never held across platform calls, so channels
/// for different listings are provisioned concurrently.
pub struct SessionManager {
    channels: Arc<dyn ChannelPort>,
    policy: Arc<dyn AuthorizationPolicy>,
    staff_roles: Vec<String>,
    staff_accounts: Vec<AccountId>,
    next_id: AtomicU64,
    table: Mutex<SessionTable>,
}

impl SessionManager {
    pub fn new(
        channels: Arc<dyn ChannelPort>,
        policy: Arc<dyn AuthorizationPolicy>,
        staff_roles: Vec<String>,
        staff_accounts: Vec<AccountId>,
    ) -> Self {
        Self {
            channels,
            policy,
            staff_roles,
            staff_accounts,
            next_id: AtomicU64::new(1),
            table: Mutex::new(SessionTable::default()),
        }
    }

    pub async fn open(&self, listing: &Listing, initiator: &AccountId) -> Result<PurchaseSession> {
        let spec = self.channel_spec(listing, initiator);
        let provisioned = self.channels.create_private_channel(&spec).await?;
        let channel = provisioned.channel;

        if provisioned.unreachable.contains(initiator) {
            // A channel the buyer cannot join is useless; take it down again.
            if let Err(e) = self.channels.delete_channel(channel).await {
                tracing::warn!(error = %e, "failed to delete unreachable negotiation channel");
            }
            return Err(Error::Validation(
                "I couldn't send you the invite link. Start a private chat with me, then press Buy again."
                    .to_string(),
            ));
        }
        for account in &provisioned.unreachable {
            tracing::warn!(account = %account, "staff account could not be invited");
        }

        let session = PurchaseSession {
            id: SessionId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            listing_id: listing.id,
            initiator: initiator.clone(),
            channel,
            state: SessionState::Open,
        };
        self.table
            .lock()
            .await
            .sessions
            .insert(session.id, session.clone());

        tracing::info!(
            session_id = session.id.0,
            listing_id = listing.id.0,
            initiator = %initiator,
            "purchase session opened"
        );

        let keyboard = InlineKeyboard::single(
            "🔒 Close",
            Action::CloseSession {
                session_id: session.id,
            },
        );
        if let Err(e) = self
            .channels
            .post(
                channel,
                &negotiation_prompt_html(listing, initiator),
                Some(keyboard),
            )
            .await
        {
            tracing::warn!(session_id = session.id.0, error = %e, "failed to post negotiation prompt");
        }

        self.audit_to_log_channel(&session, listing).await;
        Ok(session)
    }

    pub async fn close(&self, id: SessionId, requester: &AccountId) -> Result<PurchaseSession> {
        let snapshot = self
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("session {id}")))?;
        if !snapshot.is_open() {
            return Err(Error::SessionClosed(id));
        }

        if !self.policy.can_close_session(&snapshot, requester).await? {
            return Err(Error::PermissionDenied(
                "You need the manage-channel permission to close this session.".to_string(),
            ));
        }

        {
            let mut table = self.table.lock().await;
            match table.sessions.get(&id) {
                None => return Err(Error::NotFound(format!("session {id}"))),
                Some(s) if !s.is_open() => return Err(Error::SessionClosed(id)),
                Some(_) => {}
            }
            // Only one close may tear the channel down.
            if !table.closing.insert(id) {
                return Err(Error::SessionClosed(id));
            }
        }

        let teardown = self.retire_channel(&snapshot).await;

        let mut table = self.table.lock().await;
        table.closing.remove(&id);
        teardown?;

        let Some(session) = table.sessions.get_mut(&id) else {
            return Err(Error::NotFound(format!("session {id}")));
        };
        session.state = SessionState::Closed;
        let closed = session.clone();
        table.closed_at.insert(id, Instant::now());

        tracing::info!(session_id = id.0, requester = %requester, "purchase session closed");
        Ok(closed)
    }

    /// Drop closed sessions older than `retention`. Returns how many were removed.
    pub async fn prune_closed(&self, now: Instant, retention: Duration) -> usize {
        let mut table = self.table.lock().await;
        let expired: Vec<SessionId> = table
            .closed_at
            .iter()
            .filter(|(_, at)| now.saturating_duration_since(**at) >= retention)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            table.closed_at.remove(id);
            table.sessions.remove(id);
        }
        expired.len()
    }

    pub async fn get(&self, id: SessionId) -> Option<PurchaseSession> {
        self.table.lock().await.sessions.get(&id).cloned()
    }

    /// The open session whose channel is `channel`, if any.
    pub async fn find_by_channel(&self, channel: ChannelRef) -> Option<PurchaseSession> {
        self.table
            .lock()
            .await
            .sessions
            .values()
            .find(|s| s.channel == channel && s.is_open())
            .cloned()
    }

    /// Withdraw the initiator's access, then delete the channel.
    async fn retire_channel(&self, session: &PurchaseSession) -> Result<()> {
        if !self.initiator_keeps_access(session).await {
            self.channels
                .revoke_access(session.channel, &session.initiator)
                .await?;
        }
        self.channels.delete_channel(session.channel).await
    }

    /// Staff, and buyers with another open session hosted in the same chat,
    /// keep their access.
    async fn initiator_keeps_access(&self, session: &PurchaseSession) -> bool {
        if self.staff_accounts.contains(&session.initiator) {
            return true;
        }
        self.table.lock().await.sessions.values().any(|s| {
            s.id != session.id
                && s.is_open()
                && s.initiator == session.initiator
                && s.channel.chat_id == session.channel.chat_id
        })
    }

    fn channel_spec(&self, listing: &Listing, initiator: &AccountId) -> ChannelSpec {
        let mut allow_accounts = vec![initiator.clone()];
        for staff in &self.staff_accounts {
            if !allow_accounts.contains(staff) {
                allow_accounts.push(staff.clone());
            }
        }

        ChannelSpec {
            name: channel_name(listing, initiator),
            deny_everyone: true,
            allow_accounts,
            allow_roles: self.staff_roles.clone(),
        }
    }

    async fn audit_to_log_channel(&self, session: &PurchaseSession, listing: &Listing) {
        match self.channels.log_channel().await {
            Ok(Some(log)) => {
                let html = session_opened_log_html(session, listing);
                if let Err(e) = self.channels.post(log, &html, None).await {
                    tracing::warn!(error = %e, "failed to write to log channel");
                }
            }
            Ok(None) => tracing::debug!("no log channel configured"),
            Err(e) => tracing::warn!(error = %e, "log channel lookup failed"),
        }
    }
}

fn channel_name(listing: &Listing, initiator: &AccountId) -> String {
    let title: String = listing.title.chars().take(64).collect();
    format!("purchase-{}-{} {}", listing.id, initiator, title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{policy::MarketPolicy, testing::FakeChannels};

    fn listing(id: u64) -> Listing {
        Listing {
            id: ListingId(id),
            title: "Chair".to_string(),
            description: "Wooden chair".to_string(),
            price: 25.0,
            image_url: "file".to_string(),
            seller: AccountId::from("alice"),
            image_path: String::new(),
        }
    }

    fn manager(channels: Arc<FakeChannels>) -> SessionManager {
        let policy = Arc::new(MarketPolicy::new(channels.clone()));
        SessionManager::new(
            channels,
            policy,
            vec!["staff".to_string()],
            vec![AccountId::from("mod")],
        )
    }

    #[tokio::test]
    async fn open_provisions_default_deny_channel_and_posts_prompt() {
        let channels = Arc::new(FakeChannels::with_log_channel());
        let mgr = manager(channels.clone());

        let s = mgr.open(&listing(1), &AccountId::from("bob")).await.unwrap();
        assert_eq!(s.state, SessionState::Open);
        assert_eq!(s.listing_id, ListingId(1));

        let specs = channels.created_specs();
        assert_eq!(specs.len(), 1);
        assert!(specs[0].deny_everyone);
        assert_eq!(
            specs[0].allow_accounts,
            vec![AccountId::from("bob"), AccountId::from("mod")]
        );
        assert_eq!(specs[0].allow_roles, vec!["staff".to_string()]);

        let posts = channels.posts();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].0, s.channel);
        assert!(posts[0].1.contains("Purchase request"));
        assert_eq!(
            posts[0].2.as_ref().unwrap().buttons[0].callback_data,
            format!("close:{}", s.id)
        );
        assert_eq!(posts[1].0, FakeChannels::LOG_CHANNEL);
    }

    #[tokio::test]
    async fn missing_or_broken_log_channel_is_tolerated() {
        let channels = Arc::new(FakeChannels::default());
        let mgr = manager(channels.clone());
        mgr.open(&listing(1), &AccountId::from("bob")).await.unwrap();
        assert_eq!(channels.posts().len(), 1);

        let broken = Arc::new(FakeChannels::with_failing_log_lookup());
        let mgr = manager(broken.clone());
        assert!(mgr.open(&listing(1), &AccountId::from("bob")).await.is_ok());
    }

    #[tokio::test]
    async fn close_without_capability_is_denied_and_stays_open() {
        let channels = Arc::new(FakeChannels::default());
        let mgr = manager(channels.clone());
        let s = mgr.open(&listing(1), &AccountId::from("bob")).await.unwrap();

        let err = mgr.close(s.id, &AccountId::from("bob")).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert!(mgr.get(s.id).await.unwrap().is_open());
        assert!(channels.deleted().is_empty());
    }

    #[tokio::test]
    async fn manager_closes_once_and_closed_is_terminal() {
        let channels = Arc::new(FakeChannels::default());
        channels.grant_manage(AccountId::from("mod"));
        let mgr = manager(channels.clone());
        let s = mgr.open(&listing(1), &AccountId::from("bob")).await.unwrap();

        let closed = mgr.close(s.id, &AccountId::from("mod")).await.unwrap();
        assert_eq!(closed.state, SessionState::Closed);
        assert_eq!(channels.deleted(), vec![s.channel]);
        assert!(mgr.find_by_channel(s.channel).await.is_none());

        let again = mgr.close(s.id, &AccountId::from("mod")).await.unwrap_err();
        assert!(matches!(again, Error::SessionClosed(_)));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let mgr = manager(Arc::new(FakeChannels::default()));
        let err = mgr
            .close(SessionId(99), &AccountId::from("mod"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn failed_channel_delete_keeps_session_open() {
        let channels = Arc::new(FakeChannels::default());
        channels.grant_manage(AccountId::from("mod"));
        channels.fail_deletes();
        let mgr = manager(channels.clone());
        let s = mgr.open(&listing(1), &AccountId::from("bob")).await.unwrap();

        let err = mgr.close(s.id, &AccountId::from("mod")).await.unwrap_err();
        assert!(matches!(err, Error::Platform(_)));
        assert!(mgr.get(s.id).await.unwrap().is_open());
    }

    #[tokio::test]
    async fn sessions_get_distinct_ids_and_channels() {
        let channels = Arc::new(FakeChannels::default());
        let mgr = manager(channels);
        let a = mgr.open(&listing(1), &AccountId::from("bob")).await.unwrap();
        let b = mgr.open(&listing(2), &AccountId::from("bob")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.channel, b.channel);
        assert_eq!(mgr.find_by_channel(b.channel).await.unwrap().id, b.id);
    }

    #[tokio::test]
    async fn unreachable_initiator_gets_no_session() {
        let channels = Arc::new(FakeChannels::default());
        channels.make_unreachable(AccountId::from("bob"));
        let mgr = manager(channels.clone());

        let err = mgr.open(&listing(1), &AccountId::from("bob")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(channels.deleted().len(), 1);
        assert!(channels.posts().is_empty());
        assert!(mgr.find_by_channel(channels.deleted()[0]).await.is_none());
    }

    #[tokio::test]
    async fn unreachable_staff_does_not_block_the_buyer() {
        let channels = Arc::new(FakeChannels::default());
        channels.make_unreachable(AccountId::from("mod"));
        let mgr = manager(channels.clone());

        assert!(mgr.open(&listing(1), &AccountId::from("bob")).await.is_ok());
        assert!(channels.deleted().is_empty());
    }

    #[tokio::test]
    async fn close_revokes_the_initiators_access() {
        let channels = Arc::new(FakeChannels::default());
        channels.grant_manage(AccountId::from("mod"));
        let mgr = manager(channels.clone());
        let s = mgr.open(&listing(1), &AccountId::from("bob")).await.unwrap();

        mgr.close(s.id, &AccountId::from("mod")).await.unwrap();
        assert_eq!(channels.revoked(), vec![(s.channel, AccountId::from("bob"))]);
    }

    #[tokio::test]
    async fn access_is_kept_while_another_session_is_open() {
        let channels = Arc::new(FakeChannels::default());
        channels.grant_manage(AccountId::from("mod"));
        let mgr = manager(channels.clone());
        let bob = AccountId::from("bob");
        let a = mgr.open(&listing(1), &bob).await.unwrap();
        let b = mgr.open(&listing(2), &bob).await.unwrap();

        mgr.close(a.id, &AccountId::from("mod")).await.unwrap();
        assert!(channels.revoked().is_empty());

        mgr.close(b.id, &AccountId::from("mod")).await.unwrap();
        assert_eq!(channels.revoked(), vec![(b.channel, bob)]);
    }

    #[tokio::test]
    async fn concurrent_closes_delete_the_channel_once() {
        let channels = Arc::new(FakeChannels::default());
        channels.grant_manage(AccountId::from("mod"));
        let mgr = manager(channels.clone());
        let s = mgr.open(&listing(1), &AccountId::from("bob")).await.unwrap();
        let moderator = AccountId::from("mod");

        let (first, second) = tokio::join!(mgr.close(s.id, &moderator), mgr.close(s.id, &moderator));
        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(Error::SessionClosed(_)))));
        assert_eq!(channels.deleted(), vec![s.channel]);
    }

    #[tokio::test]
    async fn closed_sessions_are_pruned_after_retention() {
        let channels = Arc::new(FakeChannels::default());
        channels.grant_manage(AccountId::from("mod"));
        let mgr = manager(channels);
        let open = mgr.open(&listing(1), &AccountId::from("bob")).await.unwrap();
        let closed = mgr.open(&listing(2), &AccountId::from("bob")).await.unwrap();
        mgr.close(closed.id, &AccountId::from("mod")).await.unwrap();

        assert_eq!(mgr.prune_closed(Instant::now(), CLOSED_SESSION_RETENTION).await, 0);
        let later = Instant::now() + CLOSED_SESSION_RETENTION;
        assert_eq!(mgr.prune_closed(later, CLOSED_SESSION_RETENTION).await, 1);
        assert!(mgr.get(closed.id).await.is_none());
        assert!(mgr.get(open.id).await.unwrap().is_open());
    }
}
