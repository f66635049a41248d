// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the bike handshake's HTTP leg.
//!
//! Uses `axum_test::TestServer` over a real loopback port so the
//! `ConnectInfo<SocketAddr>` extractor the handshake relies on is populated.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::{TestServer, TestServerConfig, Transport};
use tokio_util::sync::CancellationToken;

use bikeshare::config::BikeshareConfig;
use bikeshare::model::{Bike, BikeId};
use bikeshare::state::BikeshareState;
use bikeshare::store::{InMemoryStore, Store};
use bikeshare::transport::build_router;

fn test_config() -> BikeshareConfig {
    BikeshareConfig {
        host: "127.0.0.1".into(),
        port: 0,
        max_tickets_per_remote: 3,
        ticket_expiry_secs: 10,
        ticket_sweep_ms: 60_000,
        rpc_timeout_ms: 1_000,
        reservation_min_lead_min: 180,
        reservation_window_min: 60,
        reservation_sweep_ms: 60_000,
        sourcer_period_ms: 60_000,
    }
}

async fn test_server() -> (TestServer, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let state =
        Arc::new(BikeshareState::new(Arc::clone(&store), test_config(), CancellationToken::new()));
    let router = build_router(state).into_make_service_with_connect_info::<SocketAddr>();
    let config = TestServerConfig { transport: Some(Transport::HttpRandomPort), ..Default::default() };
    let server = TestServer::new_with_config(router, config).expect("failed to create test server");
    (server, store)
}

fn bike(byte: u8) -> BikeId {
    BikeId([byte; 32])
}

#[tokio::test]
async fn unregistered_bike_is_rejected() {
    let (server, _store) = test_server().await;
    let resp = server.post("/bikes/connect").bytes(vec![9u8; 32].into()).await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn registered_bike_receives_a_challenge() {
    let (server, store) = test_server().await;
    store.register_bike(Bike { id: bike(1), in_circulation: true }).await;

    let resp = server.post("/bikes/connect").bytes(vec![1u8; 32].into()).await;
    resp.assert_status(StatusCode::OK);
    assert_eq!(resp.as_bytes().len(), 64);
}

#[tokio::test]
async fn malformed_public_key_is_rejected() {
    let (server, _store) = test_server().await;
    let resp = server.post("/bikes/connect").bytes(vec![1u8; 10].into()).await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn fourth_distinct_ticket_from_same_remote_is_rejected() {
    let (server, store) = test_server().await;
    for b in 1..=4u8 {
        store.register_bike(Bike { id: bike(b), in_circulation: true }).await;
    }

    for b in 1..=3u8 {
        let resp = server.post("/bikes/connect").bytes(vec![b; 32].into()).await;
        resp.assert_status(StatusCode::OK);
    }

    let resp = server.post("/bikes/connect").bytes(vec![4u8; 32].into()).await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reissuing_the_same_bike_does_not_count_against_the_limit() {
    let (server, store) = test_server().await;
    store.register_bike(Bike { id: bike(1), in_circulation: true }).await;

    for _ in 0..5 {
        let resp = server.post("/bikes/connect").bytes(vec![1u8; 32].into()).await;
        resp.assert_status(StatusCode::OK);
    }
}
