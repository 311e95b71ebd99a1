//! Health and pairing endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tokio_util::sync::CancellationToken;

use wab_core::{errors::Error, pairing::PairingState, Result};

pub const HEALTH_BODY: &str = "Bot FULL ON ✅";
pub const QR_PENDING: &str = "QR aún no generado. Reinicia el bot si es necesario.";

pub fn router(pairing: Arc<PairingState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/qr", get(qr))
        .with_state(pairing)
}

async fn health() -> &'static str {
    HEALTH_BODY
}

async fn qr(State(pairing): State<Arc<PairingState>>) -> Response {
    match pairing.latest().await {
        Some(qr) => Html(format!(
            r#"<img src="{}" alt="QR para WhatsApp">"#,
            qr.data_uri
        ))
        .into_response(),
        None => QR_PENDING.into_response(),
    }
}

/// Bind `host:port` and serve until `shutdown` fires.
pub async fn serve(
    host: &str,
    port: u16,
    pairing: Arc<PairingState>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::External(format!("failed to bind HTTP server to {addr}: {e}")))?;

    tracing::info!("HTTP server listening on {addr}");

    axum::serve(listener, router(pairing))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
