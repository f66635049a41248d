// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bikeshare: the server-side fleet coordinator for a bike-share network.
//!
//! Owns the live bike sessions, the rental and reservation state machines,
//! and the background loops that keep them honest (ticket sweep, reservation
//! expiry, shortage prediction). The broader REST surface users and
//! dashboards drive (listing rentals, booking reservations, reporting) is an
//! external view layer that consumes these managers; it is out of scope
//! here.

pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod model;
pub mod pricing;
pub mod rental;
pub mod reservation;
pub mod rpc;
pub mod session;
pub mod sourcer;
pub mod state;
pub mod store;
pub mod ticket_store;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::BikeshareConfig;
use crate::state::BikeshareState;
use crate::store::InMemoryStore;
use crate::transport::build_router;

/// Run the fleet coordinator until shutdown.
///
/// The in-process demo binary backs itself with [`InMemoryStore`]; a real
/// deployment wires [`BikeshareState`] to its own `Store` implementation
/// instead of calling this function.
pub async fn run(config: BikeshareConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let store = Arc::new(InMemoryStore::new());
    let state = Arc::new(BikeshareState::new(store, config, shutdown.clone()));
    state.rebuild().await;
    state.spawn_background().await?;

    tracing::info!("bikeshare listening on {addr}");
    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ctrl_c_shutdown.cancel();
    });

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}
