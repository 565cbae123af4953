use std::sync::Arc;

use anyhow::Result;
use backend::{BackendClient, MemoryBackend, identity::IdentityConfig};
use common::{
    cache::{RedisConfig, RedisPool},
    database::{self, DatabaseConfig, init_pool},
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod error;
mod routes;
mod settings;
mod state;
mod view;

use crate::{
    settings::{BackendKind, Settings},
    state::AppState,
    view::BookmarkView,
};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting bookmarks service");

    let client = match settings.backend {
        BackendKind::Hosted => connect_hosted().await?,
        BackendKind::Memory => {
            warn!(
                "Using the in-process backend as {}; bookmarks are lost on exit",
                settings.dev_user_email
            );
            BackendClient::in_process(Arc::new(MemoryBackend::with_email(
                &settings.dev_user_email,
            )))
        }
    };

    let view = Arc::new(BookmarkView::mount(client.clone()).await?);
    let app = routes::create_router(AppState {
        view: Arc::clone(&view),
        client,
    });

    let address = settings.server.address();
    let listener = TcpListener::bind(&address).await?;
    info!("Bookmarks service listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    view.unmount().await;
    info!("Bookmarks service stopped");

    Ok(())
}

async fn connect_hosted() -> Result<BackendClient> {
    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    // Check database connectivity
    if database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }
    database::migrate(&pool).await?;

    let cache = RedisPool::new(&RedisConfig::from_env())?;
    if !cache.health_check().await? {
        anyhow::bail!("Failed to connect to Redis");
    }

    let identity_config = IdentityConfig::from_env()?;
    Ok(BackendClient::hosted(&identity_config, pool, cache).await?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
