//! Backend contracts for the bookmarks application
//!
//! The bookmarks view talks to three capabilities:
//!
//! - [`IdentityService`]: the current session, change notifications, sign-in and sign-out
//! - [`RecordStore`]: query, insert and delete over the `bookmarks` table
//! - [`ChangeFeed`]: push notifications for row changes matching a filter
//!
//! The hosted implementation uses Google OAuth2, JWT sessions kept in Redis,
//! Postgres with row-level security and LISTEN/NOTIFY. [`MemoryBackend`]
//! implements the same contracts in process.

pub mod client;
pub mod error;
pub mod feed;
pub mod identity;
pub mod listeners;
pub mod memory;
pub mod models;
pub mod query;
pub mod store;

pub use client::BackendClient;
pub use error::{BackendError, BackendResult};
pub use feed::{ChangeFeed, ChannelHandle, FeedCallback};
pub use identity::{IdentityService, OAuthCallback, OAuthProvider, SessionListener, SignIn};
pub use memory::MemoryBackend;
pub use models::{
    AuthSession, Bookmark, ChangeEvent, ChangeKind, EventMask, NewBookmark, Principal, RecordKey,
    Session,
};
pub use query::{Column, Filter, Order, Table};
pub use store::RecordStore;
