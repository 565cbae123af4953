//! The bookmarks view
//!
//! A [`BookmarkView`] keeps the signed-in user's bookmark list in sync with
//! the backend. It reacts to session changes, reloads the list whenever the
//! change feed reports a write to the user's rows, and forwards add, delete,
//! sign-in and sign-out requests to the backend.
//!
//! All work happens on one task. Session notifications, feed signals and
//! user commands are queued on a single channel and handled in arrival
//! order, so a refresh started for one user can never overwrite the list of
//! the next one. Every published state is a full [`ViewState`] snapshot.

use std::sync::{Arc, Mutex};

use backend::{
    BackendClient, BackendError, Bookmark, ChangeEvent, ChangeFeed, ChannelHandle, Column,
    EventMask, Filter, NewBookmark, OAuthProvider, Order, Session, SessionListener, SignIn, Table,
};
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything the page renders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewState {
    pub session: Session,
    pub draft_title: String,
    pub draft_url: String,
    /// An insert is in flight
    pub in_progress: bool,
    /// The user's bookmarks, newest first
    pub bookmarks: Vec<Bookmark>,
}

/// Result of an add request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddOutcome {
    /// The row was handed to the store
    Inserted,
    /// Title or URL was empty; nothing was sent
    Skipped,
}

#[derive(Error, Debug)]
pub enum ViewError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Bookmark view is no longer mounted")]
    Unmounted,
}

pub type ViewResult<T> = Result<T, ViewError>;

enum ViewEvent {
    SessionChanged(Session),
    /// A change-feed event arrived for the subscription opened for `user_id`
    FeedSignal {
        user_id: Uuid,
    },
    SetDraft {
        title: Option<String>,
        url: Option<String>,
    },
    Add {
        title: String,
        url: String,
        reply: oneshot::Sender<ViewResult<AddOutcome>>,
    },
    /// Add with the given fields, falling back to the drafts for `None`
    Submit {
        title: Option<String>,
        url: Option<String>,
        reply: oneshot::Sender<ViewResult<AddOutcome>>,
    },
    Delete {
        id: i64,
        reply: oneshot::Sender<ViewResult<()>>,
    },
    SignIn {
        provider: OAuthProvider,
        reply: oneshot::Sender<ViewResult<SignIn>>,
    },
    SignOut {
        reply: oneshot::Sender<ViewResult<()>>,
    },
    Unmount,
}

/// Open change-feed subscription; unsubscribes when dropped
struct FeedSubscription {
    feed: Arc<dyn ChangeFeed>,
    handle: ChannelHandle,
    user_id: Uuid,
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        debug!(
            "Closing change feed subscription {} for {}",
            self.handle.id(),
            self.user_id
        );
        self.feed.unsubscribe(self.handle);
    }
}

/// Handle to a mounted bookmarks view
pub struct BookmarkView {
    events: mpsc::UnboundedSender<ViewEvent>,
    state: watch::Receiver<ViewState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BookmarkView {
    /// Mount the view against `client`.
    ///
    /// The session listener is registered before the current session is
    /// read, so a change racing with mounting is queued rather than lost.
    pub async fn mount(client: BackendClient) -> ViewResult<Self> {
        let (events, receiver) = mpsc::unbounded_channel();

        let listener_events = events.clone();
        let listener = client
            .identity
            .on_session_change(Box::new(move |session: &Session| {
                let _ = listener_events.send(ViewEvent::SessionChanged(session.clone()));
            }));

        let initial = client.identity.current_session().await?;
        let _ = events.send(ViewEvent::SessionChanged(initial));

        let (publisher, state) = watch::channel(ViewState::default());
        let actor = ViewActor {
            client,
            events: receiver,
            feed_events: events.clone(),
            publisher,
            state: ViewState::default(),
            feed: None,
            _listener: listener,
        };
        let task = tokio::spawn(actor.run());
        info!("Bookmark view mounted");

        Ok(Self {
            events,
            state,
            task: Mutex::new(Some(task)),
        })
    }

    /// Latest published snapshot
    pub fn state(&self) -> ViewState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.clone()
    }

    pub fn set_title(&self, title: impl Into<String>) -> ViewResult<()> {
        self.set_draft(Some(title.into()), None)
    }

    pub fn set_url(&self, url: impl Into<String>) -> ViewResult<()> {
        self.set_draft(None, Some(url.into()))
    }

    /// Replace the given draft fields; `None` leaves a field untouched
    pub fn set_draft(&self, title: Option<String>, url: Option<String>) -> ViewResult<()> {
        self.send(ViewEvent::SetDraft { title, url })
    }

    /// Insert a bookmark owned by the current user.
    ///
    /// Does nothing when either field is empty. The list itself updates
    /// once the change feed reports the new row.
    pub async fn add(
        &self,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> ViewResult<AddOutcome> {
        let (title, url) = (title.into(), url.into());
        self.request(|reply| ViewEvent::Add { title, url, reply })
            .await
    }

    /// Add a bookmark from the current drafts
    pub async fn submit(&self) -> ViewResult<AddOutcome> {
        self.submit_with(None, None).await
    }

    /// Add a bookmark, taking any field left as `None` from the drafts.
    ///
    /// The drafts are read when the view handles the request, so concurrent
    /// callers never see each other's fields.
    pub async fn submit_with(
        &self,
        title: Option<String>,
        url: Option<String>,
    ) -> ViewResult<AddOutcome> {
        self.request(|reply| ViewEvent::Submit { title, url, reply })
            .await
    }

    /// Delete one of the current user's bookmarks.
    ///
    /// Ids that do not belong to the user are silently left alone.
    pub async fn delete(&self, id: i64) -> ViewResult<()> {
        self.request(|reply| ViewEvent::Delete { id, reply }).await
    }

    pub async fn sign_in(&self, provider: OAuthProvider) -> ViewResult<SignIn> {
        self.request(|reply| ViewEvent::SignIn { provider, reply })
            .await
    }

    pub async fn sign_out(&self) -> ViewResult<()> {
        self.request(|reply| ViewEvent::SignOut { reply }).await
    }

    /// Stop the view and wait until its listener and subscription are released
    pub async fn unmount(&self) {
        let _ = self.events.send(ViewEvent::Unmount);
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Bookmark view task failed: {}", e);
            }
        }
    }

    fn send(&self, event: ViewEvent) -> ViewResult<()> {
        self.events.send(event).map_err(|_| ViewError::Unmounted)
    }

    async fn request<T>(
        &self,
        event: impl FnOnce(oneshot::Sender<ViewResult<T>>) -> ViewEvent,
    ) -> ViewResult<T> {
        let (reply, response) = oneshot::channel();
        self.send(event(reply))?;
        response.await.map_err(|_| ViewError::Unmounted)?
    }
}

impl Drop for BookmarkView {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

struct ViewActor {
    client: BackendClient,
    events: mpsc::UnboundedReceiver<ViewEvent>,
    /// Sender cloned into feed callbacks
    feed_events: mpsc::UnboundedSender<ViewEvent>,
    publisher: watch::Sender<ViewState>,
    state: ViewState,
    feed: Option<FeedSubscription>,
    _listener: SessionListener,
}

impl ViewActor {
    async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            match event {
                ViewEvent::SessionChanged(session) => self.on_session_change(session).await,
                ViewEvent::FeedSignal { user_id } => {
                    if self.state.session.user_id() == Some(user_id) {
                        self.refresh(user_id).await;
                    } else {
                        debug!("Dropping change signal for previous user {}", user_id);
                    }
                }
                ViewEvent::SetDraft { title, url } => {
                    if let Some(title) = title {
                        self.state.draft_title = title;
                    }
                    if let Some(url) = url {
                        self.state.draft_url = url;
                    }
                    self.publish();
                }
                ViewEvent::Add { title, url, reply } => {
                    let _ = reply.send(self.add(title, url).await);
                }
                ViewEvent::Submit { title, url, reply } => {
                    let title = title.unwrap_or_else(|| self.state.draft_title.clone());
                    let url = url.unwrap_or_else(|| self.state.draft_url.clone());
                    let _ = reply.send(self.add(title, url).await);
                }
                ViewEvent::Delete { id, reply } => {
                    let _ = reply.send(self.delete(id).await);
                }
                ViewEvent::SignIn { provider, reply } => {
                    let result = self
                        .client
                        .identity
                        .sign_in_with_provider(provider)
                        .await
                        .map_err(ViewError::from);
                    let _ = reply.send(result);
                }
                ViewEvent::SignOut { reply } => {
                    let result = self.client.identity.sign_out().await.map_err(ViewError::from);
                    let _ = reply.send(result);
                }
                ViewEvent::Unmount => break,
            }
        }

        // Listener and subscription are released when the actor drops.
        self.feed.take();
        info!("Bookmark view unmounted");
    }

    async fn on_session_change(&mut self, session: Session) {
        let previous = self.state.session.user_id();
        let next = session.user_id();
        self.state.session = session;

        let Some(user_id) = next else {
            if self.feed.take().is_some() {
                info!("Signed out, bookmark list cleared");
            }
            self.state.bookmarks.clear();
            self.publish();
            return;
        };

        if previous != Some(user_id) || self.feed.is_none() {
            // Old subscription goes before the new one is opened.
            self.feed.take();
            self.state.bookmarks.clear();
            self.publish();
            self.feed = self.subscribe(user_id).await;
        } else {
            self.publish();
        }

        self.refresh(user_id).await;
    }

    async fn subscribe(&self, user_id: Uuid) -> Option<FeedSubscription> {
        let events = self.feed_events.clone();
        let callback = Box::new(move |event: &ChangeEvent| {
            debug!(
                "Bookmark {} changed ({:?}), scheduling refresh",
                event.key.id, event.kind
            );
            let _ = events.send(ViewEvent::FeedSignal { user_id });
        });

        match self
            .client
            .feed
            .subscribe(
                Table::Bookmarks,
                Filter::owned_by(user_id),
                EventMask::ALL,
                callback,
            )
            .await
        {
            Ok(handle) => {
                debug!(
                    "Opened change feed subscription {} for {}",
                    handle.id(),
                    user_id
                );
                Some(FeedSubscription {
                    feed: Arc::clone(&self.client.feed),
                    handle,
                    user_id,
                })
            }
            Err(e) => {
                error!("Failed to subscribe to bookmark changes for {}: {}", user_id, e);
                None
            }
        }
    }

    async fn refresh(&mut self, user_id: Uuid) {
        let result = self
            .client
            .store
            .query(
                Table::Bookmarks,
                &Filter::owned_by(user_id),
                Order::newest_first(),
            )
            .await;

        match result {
            Ok(rows) => {
                debug!("Loaded {} bookmarks for {}", rows.len(), user_id);
                self.state.bookmarks = rows;
                self.publish();
            }
            Err(e) => warn!("Failed to refresh bookmarks for {}: {}", user_id, e),
        }
    }

    async fn add(&mut self, title: String, url: String) -> ViewResult<AddOutcome> {
        if title.is_empty() || url.is_empty() {
            debug!("Ignoring bookmark with an empty title or URL");
            return Ok(AddOutcome::Skipped);
        }
        let user_id = self.state.session.user_id().ok_or(ViewError::NotSignedIn)?;

        self.state.in_progress = true;
        self.publish();

        let result = self
            .client
            .store
            .insert(
                Table::Bookmarks,
                NewBookmark {
                    title,
                    url,
                    user_id,
                },
            )
            .await;

        self.state.in_progress = false;
        if result.is_ok() {
            self.state.draft_title.clear();
            self.state.draft_url.clear();
        }
        self.publish();

        match result {
            Ok(()) => Ok(AddOutcome::Inserted),
            Err(e) => {
                error!("Failed to add bookmark: {}", e);
                Err(e.into())
            }
        }
    }

    async fn delete(&mut self, id: i64) -> ViewResult<()> {
        let user_id = self.state.session.user_id().ok_or(ViewError::NotSignedIn)?;
        let filter = Filter::owned_by(user_id).eq(Column::Id, id);

        let removed = self.client.store.delete(Table::Bookmarks, &filter).await?;
        if removed == 0 {
            debug!("Bookmark {} not found for {}", id, user_id);
        }
        Ok(())
    }

    fn publish(&self) {
        self.publisher.send_replace(self.state.clone());
    }
}
