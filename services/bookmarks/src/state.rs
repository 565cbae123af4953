//! Application state shared across handlers

use std::sync::Arc;

use backend::BackendClient;

use crate::view::BookmarkView;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub view: Arc<BookmarkView>,
    /// Used directly for the OAuth callback, which is not a view command
    pub client: BackendClient,
}
