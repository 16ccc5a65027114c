// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Router assembly and serving.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use wa_gateway_core::InstanceManager;

use crate::{auth, handlers};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// The instance lifecycle manager.
    pub manager: Arc<InstanceManager>,
}

impl AppState {
    /// Create handler state around `manager`.
    pub fn new(manager: Arc<InstanceManager>) -> Self {
        Self { manager }
    }
}

/// Build the API router.
pub fn build_router(state: AppState, body_limit: usize) -> Router {
    let messages = Router::new()
        .route("/message/text", post(handlers::send_text))
        .route("/message/image", post(handlers::send_image))
        .route("/message/document", post(handlers::send_document))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/instance/init", post(handlers::init_instance))
        .route("/instance/qr/{id}", get(handlers::get_qr))
        .route("/instance/status/{id}", get(handlers::get_status))
        .route("/instance/disconnect", post(handlers::disconnect_instance))
        .merge(messages)
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves.
///
/// In-flight requests are allowed to finish before this returns.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
