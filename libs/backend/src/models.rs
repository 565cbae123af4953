//! Records exchanged with the backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::query::Table;

/// The authenticated account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
}

/// An authenticated session together with its token material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user: Principal,
    #[serde(skip_serializing, default)]
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Latest session state pushed by the identity service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Session {
    #[default]
    SignedOut,
    Authenticated(AuthSession),
}

impl Session {
    /// Owner identifier of the session, if any
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Session::SignedOut => None,
            Session::Authenticated(auth) => Some(auth.user.user_id),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated(_))
    }

    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Session::SignedOut => None,
            Session::Authenticated(auth) => Some(&auth.user),
        }
    }
}

/// A persisted bookmark row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Bookmark {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Insert payload; id and created_at are assigned by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBookmark {
    pub title: String,
    pub url: String,
    pub user_id: Uuid,
}

/// Kind of row change carried by a feed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Set of change kinds a subscription wants to hear about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl EventMask {
    pub const ALL: EventMask = EventMask {
        insert: true,
        update: true,
        delete: true,
    };

    pub fn only(kind: ChangeKind) -> Self {
        let mut mask = EventMask {
            insert: false,
            update: false,
            delete: false,
        };
        match kind {
            ChangeKind::Insert => mask.insert = true,
            ChangeKind::Update => mask.update = true,
            ChangeKind::Delete => mask.delete = true,
        }
        mask
    }

    pub fn contains(&self, kind: ChangeKind) -> bool {
        match kind {
            ChangeKind::Insert => self.insert,
            ChangeKind::Update => self.update,
            ChangeKind::Delete => self.delete,
        }
    }
}

/// Identity and owner of a changed row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordKey {
    pub id: i64,
    pub user_id: Uuid,
}

impl From<&Bookmark> for RecordKey {
    fn from(row: &Bookmark) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
        }
    }
}

/// A change notification. Only the key travels with it: Postgres caps a
/// notification payload at 8000 bytes, and subscribers re-query anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub key: RecordKey,
}
