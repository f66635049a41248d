// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ephemeral challenge storage for the bike handshake.
//!
//! A ticket is issued when a bike posts its public key and claimed when the
//! matching WebSocket upgrade arrives with a signed challenge. Tickets are
//! never persisted; a sweep task evicts anything older than `expiry`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use rand::RngCore;
use tokio::sync::RwLock;

use crate::error::BikeshareError;
use crate::model::BikeId;

/// A 64-byte random challenge issued to a connecting bike.
pub type Challenge = [u8; 64];

struct Ticket {
    challenge: Challenge,
    issued_at: Instant,
}

/// Per-remote, per-bike open challenges awaiting a signed response.
pub struct TicketStore {
    tickets: RwLock<HashMap<(IpAddr, BikeId), Ticket>>,
    max_per_remote: usize,
    expiry: Duration,
}

impl TicketStore {
    pub fn new(max_per_remote: usize, expiry: Duration) -> Self {
        Self { tickets: RwLock::new(HashMap::new()), max_per_remote, expiry }
    }

    /// Issue a fresh challenge for `(remote, bike)`, overwriting any existing
    /// ticket for the same pair. Fails with [`BikeshareError::TooManyTickets`]
    /// if `remote` already holds `max_per_remote` distinct tickets.
    pub async fn issue(&self, remote: IpAddr, bike: BikeId) -> Result<Challenge, BikeshareError> {
        let mut tickets = self.tickets.write().await;

        let existing_for_remote =
            tickets.keys().filter(|(addr, b)| *addr == remote && *b != bike).count();
        if existing_for_remote >= self.max_per_remote {
            return Err(BikeshareError::TooManyTickets);
        }

        let mut challenge = [0u8; 64];
        rand::rng().fill_bytes(&mut challenge);
        tickets.insert((remote, bike), Ticket { challenge, issued_at: Instant::now() });
        Ok(challenge)
    }

    /// Remove and return the ticket for `(remote, bike)`, if still open and unexpired.
    pub async fn claim(&self, remote: IpAddr, bike: BikeId) -> Result<Challenge, BikeshareError> {
        let mut tickets = self.tickets.write().await;
        match tickets.remove(&(remote, bike)) {
            Some(t) if t.issued_at.elapsed() <= self.expiry => Ok(t.challenge),
            _ => Err(BikeshareError::NoSuchTicket),
        }
    }

    /// Evict every ticket older than `expiry`. Intended to run on a periodic background task.
    pub async fn remove_expired(&self) -> usize {
        let mut tickets = self.tickets.write().await;
        let before = tickets.len();
        tickets.retain(|_, t| t.issued_at.elapsed() <= self.expiry);
        before - tickets.len()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.tickets.read().await.len()
    }
}

/// Spawn the background sweep loop. Runs until `shutdown` is cancelled.
pub fn spawn_sweep(
    store: std::sync::Arc<TicketStore>,
    period: Duration,
    shutdown: tokio_util::sync::CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let evicted = store.remove_expired().await;
                    if evicted > 0 {
                        tracing::debug!(evicted, "swept expired connection tickets");
                    }
                }
            }
        }
    });
}
