//! Change feed contract and the Postgres LISTEN/NOTIFY implementation
//!
//! The `bookmarks_notify` trigger publishes every row change on the
//! `bookmark_changes` channel as `{table, kind, record}` JSON. Each
//! subscription owns a listener task that decodes notifications and applies
//! the subscription's table, event mask and filter before calling back.

use async_trait::async_trait;
use sqlx::{PgPool, postgres::PgListener};
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    error::{BackendError, BackendResult},
    models::{ChangeEvent, EventMask},
    query::{Filter, Table},
};

/// Postgres notification channel written by the trigger
pub const NOTIFY_CHANNEL: &str = "bookmark_changes";

/// Pause before retrying a failed listener connection
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Callback invoked for every matching change
pub type FeedCallback = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Identifies one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(u64);

impl ChannelHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// What a subscription wants to hear about
#[derive(Debug, Clone)]
pub struct Subscription {
    pub table: Table,
    pub filter: Filter,
    pub events: EventMask,
}

impl Subscription {
    pub fn wants(&self, event: &ChangeEvent) -> bool {
        event.table == self.table
            && self.events.contains(event.kind)
            && self.filter.matches_key(&event.key)
    }

    /// Reject filters on columns that notifications do not carry
    pub fn check(&self) -> BackendResult<()> {
        if self.filter.is_key_filter() {
            Ok(())
        } else {
            Err(BackendError::UnsupportedFilter(format!(
                "{:?}",
                self.filter.predicates()
            )))
        }
    }
}

/// Capability contract of the change feed
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(
        &self,
        table: Table,
        filter: Filter,
        events: EventMask,
        callback: FeedCallback,
    ) -> BackendResult<ChannelHandle>;

    /// Stop a subscription. Unknown handles are ignored.
    fn unsubscribe(&self, handle: ChannelHandle);
}

/// Change feed backed by PostgreSQL notifications
pub struct PgChangeFeed {
    pool: PgPool,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<ChannelHandle, JoinHandle<()>>>,
}

impl PgChangeFeed {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Number of running subscriptions
    pub fn active_subscriptions(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Decode one notification payload and dispatch it
fn dispatch(subscription: &Subscription, payload: &str, callback: &FeedCallback) {
    match serde_json::from_str::<ChangeEvent>(payload) {
        Ok(event) if subscription.wants(&event) => callback(&event),
        Ok(event) => debug!("Ignoring {:?} on row {}", event.kind, event.key.id),
        Err(e) => warn!("Dropping malformed change notification: {}", e),
    }
}

#[async_trait]
impl ChangeFeed for PgChangeFeed {
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

        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;

        let handle = ChannelHandle(self.next_id.fetch_add(1, Ordering::Relaxed));

        let task = tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => dispatch(&subscription, notification.payload(), &callback),
                    Err(e) => {
                        // PgListener reconnects on the next recv; events in the gap are lost.
                        error!("Change feed connection error: {}", e);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(handle, task);
        info!("Subscribed to {} changes ({:?})", table.as_str(), handle);
        Ok(handle)
    }

    fn unsubscribe(&self, handle: ChannelHandle) {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&handle);
        if let Some(task) = task {
            task.abort();
            info!("Unsubscribed {:?}", handle);
        }
    }
}

impl Drop for PgChangeFeed {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeKind;
    use std::sync::{Arc, atomic::AtomicUsize};
    use uuid::Uuid;

    fn payload(kind: &str, owner: Uuid) -> String {
        serde_json::json!({
            "table": "bookmarks",
            "kind": kind,
            "key": {"id": 1, "user_id": owner}
        })
        .to_string()
    }

    fn counting_callback() -> (Arc<AtomicUsize>, FeedCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let callback: FeedCallback = Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn test_dispatch_applies_filter_and_mask() {
        let owner = Uuid::new_v4();
        let (count, callback) = counting_callback();
        let subscription = Subscription {
            table: Table::Bookmarks,
            filter: Filter::owned_by(owner),
            events: EventMask::ALL,
        };

        dispatch(&subscription, &payload("INSERT", owner), &callback);
        dispatch(&subscription, &payload("UPDATE", owner), &callback);
        dispatch(&subscription, &payload("DELETE", owner), &callback);
        dispatch(&subscription, &payload("INSERT", Uuid::new_v4()), &callback);
        assert_eq!(count.load(Ordering::SeqCst), 3);

        let deletes_only = Subscription {
            events: EventMask::only(ChangeKind::Delete),
            ..subscription
        };
        dispatch(&deletes_only, &payload("INSERT", owner), &callback);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_subscription_requires_key_filter() {
        let owner = Uuid::new_v4();
        let by_owner = Subscription {
            table: Table::Bookmarks,
            filter: Filter::owned_by(owner),
            events: EventMask::ALL,
        };
        assert!(by_owner.check().is_ok());

        let by_title = Subscription {
            filter: Filter::owned_by(owner).eq(crate::query::Column::Title, "Paper"),
            ..by_owner
        };
        assert!(matches!(
            by_title.check(),
            Err(BackendError::UnsupportedFilter(_))
        ));
    }

    #[test]
    fn test_dispatch_drops_malformed_payload() {
        let (count, callback) = counting_callback();
        let subscription = Subscription {
            table: Table::Bookmarks,
            filter: Filter::new(),
            events: EventMask::ALL,
        };

        dispatch(&subscription, "{not json", &callback);
        dispatch(&subscription, r#"{"table":"bookmarks","kind":"TRUNCATE"}"#, &callback);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
