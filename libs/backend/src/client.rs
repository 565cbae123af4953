//! The backend client handed to the bookmarks view
//!
//! Built once at start-up and passed explicitly to whatever needs the
//! backend; there is no process-wide client.

use common::cache::RedisPool;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::{
    error::BackendResult,
    feed::{ChangeFeed, PgChangeFeed},
    identity::{HostedIdentity, IdentityConfig, IdentityService},
    memory::MemoryBackend,
    store::{PgRecordStore, RecordStore},
};

/// The three capability contracts bundled together
#[derive(Clone)]
pub struct BackendClient {
    pub identity: Arc<dyn IdentityService>,
    pub store: Arc<dyn RecordStore>,
    pub feed: Arc<dyn ChangeFeed>,
}

impl BackendClient {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        store: Arc<dyn RecordStore>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Self {
        Self {
            identity,
            store,
            feed,
        }
    }

    /// Hosted backend: Google sign-in, Postgres rows, LISTEN/NOTIFY feed
    pub async fn hosted(
        config: &IdentityConfig,
        pool: PgPool,
        cache: RedisPool,
    ) -> BackendResult<Self> {
        let identity: Arc<dyn IdentityService> =
            Arc::new(HostedIdentity::connect(config, pool.clone(), cache).await?);
        let store = Arc::new(PgRecordStore::new(pool.clone(), Arc::clone(&identity)));
        let feed = Arc::new(PgChangeFeed::new(pool));

        info!("Hosted backend client ready");
        Ok(Self::new(identity, store, feed))
    }

    /// All three contracts served by one in-process backend
    pub fn in_process(backend: Arc<MemoryBackend>) -> Self {
        Self::new(backend.clone(), backend.clone(), backend)
    }
}
