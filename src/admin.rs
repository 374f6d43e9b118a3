//! Read-only HTTP view of a running node.
//!
//! The tick loop publishes a fresh [`NodeStatus`] into a `watch` channel; the
//! handler returns whatever is latest.

use axum::extract::Extension;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::server::types::NodeStatus;

pub fn router(status: watch::Receiver<NodeStatus>) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .layer(Extension(status))
}

pub async fn serve(
    listener: TcpListener,
    status: watch::Receiver<NodeStatus>,
) -> anyhow::Result<()> {
    tracing::info!("Admin endpoint listening on {}", listener.local_addr()?);
    axum::serve(listener, router(status)).await?;
    Ok(())
}

async fn handle_status(
    Extension(status): Extension<watch::Receiver<NodeStatus>>,
) -> Json<NodeStatus> {
    Json(status.borrow().clone())
}
