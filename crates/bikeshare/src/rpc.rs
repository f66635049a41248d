// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 request/response correlation over one bike's WebSocket.
//!
//! The pending-request table used to be keyed by weak references so an
//! abandoned call's slot would vanish once nothing else held it. Rust has no
//! equivalent of a weak-value dictionary that auto-evicts on drop of the
//! *value*, so eviction is instead the responsibility of a scoped guard:
//! whichever path out of [`RpcChannel::call`] runs — response, timeout, or
//! the future being dropped out from under it — removes the table entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::BikeshareError;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RpcNotification {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug)]
enum Completion {
    Response(Result<Value, Value>),
    Disconnected,
}

type PendingSlot = Arc<Mutex<Option<oneshot::Sender<Completion>>>>;

/// Correlates outgoing JSON-RPC requests with their responses on one socket.
#[derive(Debug)]
pub struct RpcChannel {
    pending: Mutex<HashMap<u64, PendingSlot>>,
    next_id: AtomicU64,
    outgoing: mpsc::UnboundedSender<String>,
}

impl RpcChannel {
    pub fn new(outgoing: mpsc::UnboundedSender<String>) -> Self {
        Self { pending: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1), outgoing }
    }

    /// Issue a server-originated call and await the bike's response, or time out.
    ///
    /// Takes `self` behind an `Arc` so the pending-table eviction guard can
    /// outlive the call's stack frame if the call future itself is dropped
    /// from cancellation.
    pub async fn call(
        self: &Arc<Self>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, BikeshareError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let slot: PendingSlot = Arc::new(Mutex::new(Some(tx)));
        self.pending.lock().await.insert(id, slot);
        let _guard = PendingGuard { channel: Arc::clone(self), id };

        let request = RpcRequest { jsonrpc: "2.0", id, method, params };
        let text = serde_json::to_string(&request).map_err(|_| BikeshareError::Internal)?;
        if self.outgoing.send(text).is_err() {
            return Err(BikeshareError::Disconnected);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Completion::Response(Ok(value)))) => Ok(value),
            Ok(Ok(Completion::Response(Err(_)))) => Err(BikeshareError::Internal),
            Ok(Ok(Completion::Disconnected)) => Err(BikeshareError::Disconnected),
            Ok(Err(_)) => Err(BikeshareError::Disconnected),
            Err(_) => Err(BikeshareError::RpcTimeout),
        }
    }

    /// Feed an incoming response frame from the bike's read loop.
    ///
    /// Logs and drops responses for ids the table no longer holds (the call
    /// already timed out or the caller cancelled). Returns
    /// [`BikeshareError::DoubleResolve`] if `id` was already resolved once but
    /// its slot has not yet been evicted by the owning guard.
    pub async fn resolve(&self, response: RpcResponse) -> Result<(), BikeshareError> {
        let Some(id) = response.id else {
            return Ok(());
        };
        let slot = {
            let pending = self.pending.lock().await;
            match pending.get(&id) {
                Some(slot) => Arc::clone(slot),
                None => {
                    tracing::debug!(id, "response for unknown rpc id, dropping");
                    return Ok(());
                }
            }
        };

        let mut guard = slot.lock().await;
        match guard.take() {
            Some(tx) => {
                let outcome = match response.error {
                    Some(err) => Err(err),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(Completion::Response(outcome));
                Ok(())
            }
            None => Err(BikeshareError::DoubleResolve),
        }
    }

    /// Fail every outstanding call on this socket. Called from the read loop's exit path.
    pub async fn disconnect_all(&self) {
        let pending = self.pending.lock().await;
        for slot in pending.values() {
            if let Some(tx) = slot.lock().await.take() {
                let _ = tx.send(Completion::Disconnected);
            }
        }
    }
}

/// Removes a pending-table entry once the call that owns it returns, times
/// out, or is cancelled — the scoped-acquisition replacement for a
/// weak-value pending table.
struct PendingGuard {
    channel: Arc<RpcChannel>,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let channel = Arc::clone(&self.channel);
        let id = self.id;
        tokio::spawn(async move {
            channel.pending.lock().await.remove(&id);
        });
    }
}
