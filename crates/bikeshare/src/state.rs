// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wires every component into one shared, cloneable handle.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::BikeshareConfig;
use crate::error::BikeshareError;
use crate::events::{BikeshareEvent, EventHub};
use crate::rental::RentalManager;
use crate::reservation::{self, ReservationManager};
use crate::session::BikeSessionLayer;
use crate::sourcer::{self, ReservationSourcer};
use crate::store::Store;
use crate::ticket_store::{self, TicketStore};

/// Shared fleet coordinator state, generic over the persistence backend.
pub struct BikeshareState<S: Store> {
    pub store: Arc<S>,
    pub hub: Arc<EventHub<BikeshareEvent>>,
    pub tickets: Arc<TicketStore>,
    pub sessions: Arc<BikeSessionLayer<S>>,
    pub rentals: Arc<RentalManager<S>>,
    pub reservations: Arc<ReservationManager<S>>,
    pub sourcer: Arc<ReservationSourcer<S>>,
    pub config: BikeshareConfig,
    pub shutdown: CancellationToken,
}

impl<S: Store + 'static> BikeshareState<S> {
    pub fn new(store: Arc<S>, config: BikeshareConfig, shutdown: CancellationToken) -> Self {
        let hub = Arc::new(EventHub::new());
        let tickets =
            Arc::new(TicketStore::new(config.max_tickets_per_remote, config.ticket_expiry()));
        let sessions = Arc::new(BikeSessionLayer::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&tickets),
            config.rpc_timeout(),
        ));
        let rentals = Arc::new(RentalManager::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&sessions),
        ));
        let reservations = Arc::new(ReservationManager::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&sessions),
            Arc::clone(&rentals),
            config.reservation_min_lead(),
            config.reservation_window(),
        ));
        let sourcer =
            Arc::new(ReservationSourcer::new(Arc::clone(&reservations), config.reservation_min_lead()));

        Self { store, hub, tickets, sessions, rentals, reservations, sourcer, config, shutdown }
    }

    /// Reinstall open rentals/reservations from the store on startup.
    pub async fn rebuild(&self) {
        self.rentals.rebuild().await;
        self.reservations.rebuild().await;
    }

    /// Start every background loop. Each terminates cooperatively on `self.shutdown`.
    pub async fn spawn_background(self: &Arc<Self>) -> Result<(), BikeshareError> {
        ticket_store::spawn_sweep(
            Arc::clone(&self.tickets),
            self.config.ticket_sweep_interval(),
            self.shutdown.clone(),
        );
        reservation::spawn_expiry_sweep(
            Arc::clone(&self.reservations),
            self.config.reservation_sweep_interval(),
            self.shutdown.clone(),
        );
        sourcer::install(
            Arc::clone(&self.sourcer),
            &self.hub,
            self.config.sourcer_period(),
            self.shutdown.clone(),
        )
        .await
    }
}
