// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bike handshake and notification/command loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::error::BikeshareError;
use crate::model::BikeId;
use crate::rpc::{RpcNotification, RpcResponse};
use crate::state::BikeshareState;
use crate::store::Store;

fn decode_hex(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let byte_str = std::str::from_utf8(chunk).ok()?;
        out[i] = u8::from_str_radix(byte_str, 16).ok()?;
    }
    Some(out)
}

/// `POST /bikes/connect` — a bike posts its raw 32-byte Ed25519 public key
/// and receives a fresh 64-byte challenge to sign.
pub async fn connect_post<S: Store + 'static>(
    State(state): State<Arc<BikeshareState<S>>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> impl IntoResponse {
    let Ok(raw): Result<[u8; 32], _> = body.as_ref().try_into() else {
        return BikeshareError::IdentityUnknown.to_http_response("public key must be 32 bytes").into_response();
    };
    let bike = BikeId(raw);
    match state.sessions.begin_handshake(remote.ip(), bike).await {
        Ok(challenge) => (StatusCode::OK, Bytes::copy_from_slice(&challenge)).into_response(),
        Err(err) => err.to_http_response(err.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    /// Hex-encoded 32-byte Ed25519 public key, matching the ticket issued by
    /// the preceding `POST /bikes/connect`.
    bike: String,
}

/// `GET /bikes/connect?bike=<hex>` — upgrades to a WebSocket and completes
/// the challenge/response handshake on the first binary frame.
pub async fn connect_ws<S: Store + 'static>(
    State(state): State<Arc<BikeshareState<S>>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(raw) = decode_hex(&query.bike) else {
        return (StatusCode::BAD_REQUEST, "malformed bike id").into_response();
    };
    let bike = BikeId(raw);
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote.ip(), bike))
}

async fn handle_socket<S: Store + 'static>(
    mut socket: WebSocket,
    state: Arc<BikeshareState<S>>,
    remote: std::net::IpAddr,
    bike: BikeId,
) {
    let Some(Ok(Message::Binary(frame))) = socket.recv().await else {
        let _ = close(&mut socket, "expected signed challenge frame").await;
        return;
    };
    if frame.len() != 128 {
        let _ = close(&mut socket, "malformed handshake frame").await;
        return;
    }
    let frame: &[u8] = &frame;
    let (signature, challenge) = frame.split_at(64);

    let (outgoing_tx, mut outgoing_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let session = match state.sessions.complete_handshake(remote, bike, signature, outgoing_tx).await {
        Ok(session) => session,
        Err(err) => {
            let _ = close(&mut socket, err.as_str()).await;
            return;
        }
    };
    debug_assert_eq!(challenge.len(), 64);

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => break,

            outgoing = outgoing_rx.recv() => {
                match outgoing {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_frame(&state, &session, bike, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    session.rpc.disconnect_all().await;
    if let Some(current) = state.sessions.registry.get(bike).await {
        if Arc::ptr_eq(&current, &session) {
            state.sessions.registry.remove(bike).await;
        }
    }
}

async fn dispatch_frame<S: Store + 'static>(
    state: &Arc<BikeshareState<S>>,
    session: &Arc<crate::session::BikeSession>,
    bike: BikeId,
    text: &str,
) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        tracing::debug!(bike = %bike, "dropping malformed rpc frame");
        return;
    };

    if value.get("method").is_some() {
        if let Ok(notification) = serde_json::from_value::<RpcNotification>(value) {
            state.sessions.handle_notification(bike, notification).await;
        }
        return;
    }

    if let Ok(response) = serde_json::from_value::<RpcResponse>(value) {
        if let Err(err) = session.rpc.resolve(response).await {
            tracing::warn!(bike = %bike, %err, "rpc response resolution failed");
        }
    }
}

async fn close(socket: &mut WebSocket, reason: &str) -> Result<(), axum::Error> {
    socket
        .send(Message::Close(Some(CloseFrame { code: 1008, reason: reason.to_owned().into() })))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_hex_round_trips() {
        let raw = [7u8; 32];
        let hex: String = raw.iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(decode_hex(&hex), Some(raw));
    }

    #[test]
    fn decode_hex_rejects_wrong_length() {
        assert_eq!(decode_hex("ab"), None);
    }

    #[test]
    fn decode_hex_rejects_non_hex_chars() {
        let bad = "zz".repeat(32);
        assert_eq!(decode_hex(&bad), None);
    }
}
