//! HTTP surface of the workspace, versioned under `/v1`.
//!
//! Handlers are thin: they authenticate, validate input, call into the core
//! repositories and services, and map typed errors to status codes.

pub mod attachments;
pub mod emails;
pub mod error;
pub mod kanban;
pub mod mailboxes;

use axum::Router;

use crate::AppState;

/// Create the `/v1` API router with all endpoints mounted.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/mailboxes", mailboxes::router())
        .nest("/emails", emails::router())
        .nest("/kanban", kanban::router())
        .nest("/attachments", attachments::router())
}
