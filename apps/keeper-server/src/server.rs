//! HTTP server

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use keeper_github::ClientFactory;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::info;

use crate::dispatch::Dispatcher;

/// State shared by all routes
pub struct HttpState<F: ClientFactory> {
    pub dispatcher: Arc<Dispatcher<F>>,
    pub source_code_url: Arc<str>,
}

impl<F: ClientFactory> Clone for HttpState<F> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            source_code_url: self.source_code_url.clone(),
        }
    }
}

pub fn build_router<F: ClientFactory>(state: HttpState<F>) -> Router {
    Router::new()
        .route("/", get(source_code::<F>).post(webhook::<F>))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// Bind and serve until Ctrl-C or SIGTERM
pub async fn serve(router: Router, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind HTTP server")?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

// Route handlers

async fn source_code<F: ClientFactory>(State(state): State<HttpState<F>>) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, state.source_code_url.to_string())],
    )
        .into_response()
}

async fn health_check() -> &'static str {
    "OK"
}

async fn webhook<F: ClientFactory>(
    State(state): State<HttpState<F>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.dispatcher.handle(&headers, body).await {
        Ok(outcome) => outcome.into_response(),
        Err(err) => err.into_response(),
    }
}
