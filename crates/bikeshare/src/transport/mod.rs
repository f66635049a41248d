// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the bike handshake.

pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::BikeshareState;
use crate::store::Store;

/// Build the axum `Router` terminating the bike wire protocol.
///
/// The broader user-facing REST API (rentals, reservations, users, reports)
/// is a separate external view layer and is not served here.
pub fn build_router<S: Store + 'static>(state: Arc<BikeshareState<S>>) -> Router {
    Router::new()
        .route("/bikes/connect", get(ws::connect_ws).post(ws::connect_post))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
