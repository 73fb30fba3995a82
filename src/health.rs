//! Health endpoint for the hosting platform
//!
//! Answers GET / and GET /healthz with fixed 200 text. Nothing else lives here.

use axum::{routing::get, Router};
use std::io;
use tracing::info;

pub async fn serve(port: u16) -> io::Result<()> {
    let app = Router::new()
        .route("/", get(alive))
        .route("/healthz", get(alive));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Health endpoint listening on port {}", port);
    axum::serve(listener, app).await
}

async fn alive() -> &'static str {
    "Bot alive"
}
