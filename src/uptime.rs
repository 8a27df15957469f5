//! Liveness endpoint
//!
//! Serves a static confirmation that the process is up. Deliberately
//! independent of voice-session health: a degraded bot still answers.

use axum::{routing::get, Json, Router};
use tracing::info;

/// Static liveness payload
#[derive(serde::Serialize)]
pub struct Liveness {
    pub status: &'static str,
}

pub fn router() -> Router {
    Router::new().route("/", get(alive))
}

async fn alive() -> Json<Liveness> {
    Json(Liveness { status: "alive" })
}

/// Bind and serve until the process exits.
pub async fn serve(port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Uptime endpoint listening on port {}", port);
    axum::serve(listener, router()).await
}
