//! In-process backend
//!
//! One object implementing the identity service, record store and change
//! feed against process memory, with the same ownership rules as the hosted
//! backend: callers only see, insert and delete their own rows. Used for
//! local development and as the backend of the view tests, so it also
//! exposes a few inspection counters and a failure switch.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{BackendError, BackendResult},
    feed::{ChangeFeed, ChannelHandle, FeedCallback, Subscription},
    identity::{
        IdentityService, OAuthCallback, OAuthProvider, SessionCallback, SessionListener, SignIn,
    },
    listeners::{ListenerHandle, ListenerRegistry},
    models::{
        AuthSession, Bookmark, ChangeEvent, ChangeKind, EventMask, NewBookmark, Principal,
        RecordKey, Session,
    },
    query::{Filter, Order, Table},
    store::RecordStore,
};

#[derive(Default)]
struct State {
    session: Session,
    rows: Vec<Bookmark>,
    next_id: i64,
    last_created_at: Option<DateTime<Utc>>,
}

/// In-process implementation of all three backend contracts
pub struct MemoryBackend {
    /// Account used when signing in through a provider
    default_user: Principal,
    state: Mutex<State>,
    session_listeners: ListenerRegistry<Session>,
    feed_listeners: ListenerRegistry<ChangeEvent>,
    subscriptions: Mutex<HashMap<ChannelHandle, ListenerHandle>>,
    next_handle: AtomicU64,
    unavailable: AtomicBool,
    insert_calls: AtomicUsize,
    query_attempts: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(default_user: Principal) -> Self {
        Self {
            default_user,
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
            session_listeners: ListenerRegistry::new(),
            feed_listeners: ListenerRegistry::new(),
            subscriptions: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            unavailable: AtomicBool::new(false),
            insert_calls: AtomicUsize::new(0),
            query_attempts: AtomicUsize::new(0),
        }
    }

    /// Backend whose provider sign-in yields a fresh account for `email`
    pub fn with_email(email: &str) -> Self {
        Self::new(Principal {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_available(&self) -> BackendResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend offline".to_string()));
        }
        Ok(())
    }

    /// Make every store call fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Sign in as `user` and notify listeners
    pub fn sign_in_as(&self, user: Principal) -> Session {
        let session = Session::Authenticated(AuthSession {
            user,
            access_token: Uuid::new_v4().to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        });
        self.lock().session = session.clone();
        info!("Signed in as {:?}", session.user_id());
        self.session_listeners.notify(&session);
        session
    }

    /// End the session as if its token expired
    pub fn expire_session(&self) {
        self.replace_session(Session::SignedOut);
    }

    fn replace_session(&self, session: Session) {
        self.lock().session = session.clone();
        self.session_listeners.notify(&session);
    }

    /// Insert a row for any owner, bypassing ownership checks
    pub fn seed(&self, owner: Uuid, title: &str, url: &str) -> Bookmark {
        let row = self.push_row(NewBookmark {
            title: title.to_string(),
            url: url.to_string(),
            user_id: owner,
        });
        self.publish(ChangeKind::Insert, row.clone());
        row
    }

    /// Every row regardless of owner, newest first
    pub fn all_rows(&self) -> Vec<Bookmark> {
        let mut rows = self.lock().rows.clone();
        Order::newest_first().sort(&mut rows);
        rows
    }

    pub fn active_session_listeners(&self) -> usize {
        self.session_listeners.len()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.feed_listeners.len()
    }

    /// Number of insert calls received, including rejected ones
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Number of query calls received, including failed ones
    pub fn query_attempts(&self) -> usize {
        self.query_attempts.load(Ordering::SeqCst)
    }

    fn push_row(&self, row: NewBookmark) -> Bookmark {
        let mut state = self.lock();

        // Strictly increasing so newest-first order is total.
        let mut created_at = Utc::now();
        if let Some(last) = state.last_created_at {
            if created_at <= last {
                created_at = last + Duration::microseconds(1);
            }
        }
        state.last_created_at = Some(created_at);

        let bookmark = Bookmark {
            id: state.next_id,
            title: row.title,
            url: row.url,
            user_id: row.user_id,
            created_at,
        };
        state.next_id += 1;
        state.rows.push(bookmark.clone());
        bookmark
    }

    fn publish(&self, kind: ChangeKind, record: Bookmark) {
        debug!("Publishing {:?} of row {}", kind, record.id);
        self.feed_listeners.notify(&ChangeEvent {
            table: Table::Bookmarks,
            kind,
            key: RecordKey::from(&record),
        });
    }

    fn caller(&self) -> Option<Uuid> {
        self.lock().session.user_id()
    }
}

#[async_trait]
impl IdentityService for MemoryBackend {
    async fn current_session(&self) -> BackendResult<Session> {
        Ok(self.lock().session.clone())
    }

    fn on_session_change(&self, callback: SessionCallback) -> SessionListener {
        self.session_listeners
            .register(move |session: &Session| callback(session))
    }

    async fn sign_in_with_provider(&self, provider: OAuthProvider) -> BackendResult<SignIn> {
        debug!("In-process sign-in via {}", provider.as_str());
        self.sign_in_as(self.default_user.clone());
        Ok(SignIn::Completed)
    }

    async fn complete_sign_in(&self, _callback: OAuthCallback) -> BackendResult<Session> {
        // Provider sign-in completes immediately; there is never a pending redirect.
        Err(BackendError::InvalidSignInState)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.replace_session(Session::SignedOut);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryBackend {
    async fn query(
        &self,
        table: Table,
        filter: &Filter,
        order: Order,
    ) -> BackendResult<Vec<Bookmark>> {
        self.query_attempts.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;
        debug_assert_eq!(table, Table::Bookmarks);

        let state = self.lock();
        let Some(caller) = state.session.user_id() else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<Bookmark> = state
            .rows
            .iter()
            .filter(|row| row.user_id == caller && filter.matches(row))
            .cloned()
            .collect();
        drop(state);

        order.sort(&mut rows);
        Ok(rows)
    }

    async fn insert(&self, _table: Table, row: NewBookmark) -> BackendResult<()> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        match self.caller() {
            None => return Err(BackendError::Unauthenticated),
            Some(caller) if caller != row.user_id => {
                return Err(BackendError::PermissionDenied(
                    "new row violates row-level security policy".to_string(),
                ));
            }
            Some(_) => {}
        }

        let bookmark = self.push_row(row);
        self.publish(ChangeKind::Insert, bookmark);
        Ok(())
    }

    async fn delete(&self, _table: Table, filter: &Filter) -> BackendResult<u64> {
        self.ensure_available()?;

        let removed: Vec<Bookmark> = {
            let mut state = self.lock();
            let Some(caller) = state.session.user_id() else {
                return Ok(0);
            };
            let (removed, kept): (Vec<Bookmark>, Vec<Bookmark>) = std::mem::take(&mut state.rows)
                .into_iter()
                .partition(|row| row.user_id == caller && filter.matches(row));
            state.rows = kept;
            removed
        };

        let count = removed.len() as u64;
        for row in removed {
            self.publish(ChangeKind::Delete, row);
        }
        Ok(count)
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(
        &self,
        table: Table,
        filter: Filter,
        events: EventMask,
        callback: FeedCallback,
    ) -> BackendResult<ChannelHandle> {
        let subscription = Subscription {
            table,
            filter,
            events,
        };
        subscription.check()?;
        let listener = self.feed_listeners.register(move |event: &ChangeEvent| {
            if subscription.wants(event) {
                callback(event);
            }
        });

        let handle = ChannelHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(handle, listener);
        Ok(handle)
    }

    fn unsubscribe(&self, handle: ChannelHandle) {
        // Dropping the listener handle unregisters the callback.
        let removed = self
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&handle);
        drop(removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Column;
    use std::sync::Arc;

    fn principal(email: &str) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
        }
    }

    fn new_row(owner: Uuid, title: &str) -> NewBookmark {
        NewBookmark {
            title: title.to_string(),
            url: format!("https://example.com/{title}"),
            user_id: owner,
        }
    }

    #[tokio::test]
    async fn test_query_only_returns_callers_rows_newest_first() {
        let backend = MemoryBackend::with_email("u1@example.com");
        let u1 = principal("u1@example.com");
        let u2 = principal("u2@example.com");
        backend.seed(u1.user_id, "old", "https://old");
        backend.seed(u2.user_id, "foreign", "https://foreign");
        backend.seed(u1.user_id, "new", "https://new");

        let anonymous = backend
            .query(Table::Bookmarks, &Filter::new(), Order::newest_first())
            .await
            .unwrap();
        assert!(anonymous.is_empty());

        backend.sign_in_as(u1.clone());
        let rows = backend
            .query(Table::Bookmarks, &Filter::new(), Order::newest_first())
            .await
            .unwrap();
        let titles: Vec<&str> = rows.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_insert_requires_matching_owner() {
        let backend = MemoryBackend::with_email("u1@example.com");
        let u1 = principal("u1@example.com");

        assert!(matches!(
            backend.insert(Table::Bookmarks, new_row(u1.user_id, "x")).await,
            Err(BackendError::Unauthenticated)
        ));

        backend.sign_in_as(u1.clone());
        assert!(matches!(
            backend
                .insert(Table::Bookmarks, new_row(Uuid::new_v4(), "x"))
                .await,
            Err(BackendError::PermissionDenied(_))
        ));
        backend
            .insert(Table::Bookmarks, new_row(u1.user_id, "mine"))
            .await
            .unwrap();

        assert_eq!(backend.insert_calls(), 3);
        assert_eq!(backend.all_rows().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_never_touches_foreign_rows() {
        let backend = MemoryBackend::with_email("u1@example.com");
        let u1 = principal("u1@example.com");
        let foreign = backend.seed(Uuid::new_v4(), "foreign", "https://f");
        backend.sign_in_as(u1.clone());

        let removed = backend
            .delete(Table::Bookmarks, &Filter::new().eq(Column::Id, foreign.id))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(backend.all_rows(), vec![foreign]);
    }

    #[tokio::test]
    async fn test_feed_filters_and_unsubscribes() {
        let backend = MemoryBackend::with_email("u1@example.com");
        let u1 = principal("u1@example.com");
        let events = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&events);
        let handle = backend
            .subscribe(
                Table::Bookmarks,
                Filter::owned_by(u1.user_id),
                EventMask::ALL,
                Box::new(move |event: &ChangeEvent| sink.lock().unwrap().push(event.kind)),
            )
            .await
            .unwrap();
        assert_eq!(backend.active_subscriptions(), 1);

        backend.seed(Uuid::new_v4(), "foreign", "https://f");
        let mine = backend.seed(u1.user_id, "mine", "https://m");
        backend.sign_in_as(u1.clone());
        backend
            .delete(Table::Bookmarks, &Filter::new().eq(Column::Id, mine.id))
            .await
            .unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec![ChangeKind::Insert, ChangeKind::Delete]
        );

        backend.unsubscribe(handle);
        backend.unsubscribe(handle);
        assert_eq!(backend.active_subscriptions(), 0);

        backend.seed(u1.user_id, "after", "https://a");
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_session_changes_reach_listeners() {
        let backend = MemoryBackend::with_email("dev@example.com");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let listener = backend.on_session_change(Box::new(move |session: &Session| {
            sink.lock().unwrap().push(session.is_authenticated())
        }));

        assert_eq!(
            backend
                .sign_in_with_provider(OAuthProvider::Google)
                .await
                .unwrap(),
            SignIn::Completed
        );
        let session = backend.current_session().await.unwrap();
        assert_eq!(
            session.principal().map(|p| p.email.as_str()),
            Some("dev@example.com")
        );

        backend.sign_out().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);

        drop(listener);
        assert_eq!(backend.active_session_listeners(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_backend_fails_store_calls() {
        let backend = MemoryBackend::with_email("u1@example.com");
        backend.sign_in_as(principal("u1@example.com"));
        backend.set_unavailable(true);

        assert!(matches!(
            backend
                .query(Table::Bookmarks, &Filter::new(), Order::newest_first())
                .await,
            Err(BackendError::Unavailable(_))
        ));
        assert_eq!(backend.query_attempts(), 1);

        backend.set_unavailable(false);
        assert!(
            backend
                .query(Table::Bookmarks, &Filter::new(), Order::newest_first())
                .await
                .is_ok()
        );
    }
}
