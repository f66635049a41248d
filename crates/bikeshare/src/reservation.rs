// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Slot accounting over pickup points.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::IndexedRandom;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::BikeshareError;
use crate::events::{BikeshareEvent, EventHub};
use crate::geo::Point;
use crate::model::{
    epoch_ms, BikeId, PickupId, PickupPoint, Rental, Reservation, ReservationId,
    ReservationOutcome, UserId,
};
use crate::rental::RentalManager;
use crate::session::BikeSessionLayer;
use crate::store::Store;

/// Accounts for expected bike supply against open reservations at each pickup point.
pub struct ReservationManager<S: Store> {
    store: Arc<S>,
    hub: Arc<EventHub<BikeshareEvent>>,
    sessions: Arc<BikeSessionLayer<S>>,
    rentals: Arc<RentalManager<S>>,
    open: RwLock<HashMap<ReservationId, Reservation>>,
    by_pickup: RwLock<HashMap<PickupId, HashSet<ReservationId>>>,
    by_user: RwLock<HashMap<UserId, ReservationId>>,
    min_lead: Duration,
    window: Duration,
}

impl<S: Store> ReservationManager<S> {
    pub fn new(
        store: Arc<S>,
        hub: Arc<EventHub<BikeshareEvent>>,
        sessions: Arc<BikeSessionLayer<S>>,
        rentals: Arc<RentalManager<S>>,
        min_lead: Duration,
        window: Duration,
    ) -> Self {
        Self {
            store,
            hub,
            sessions,
            rentals,
            open: RwLock::new(HashMap::new()),
            by_pickup: RwLock::new(HashMap::new()),
            by_user: RwLock::new(HashMap::new()),
            min_lead,
            window,
        }
    }

    async fn pickup_point(&self, id: PickupId) -> Option<PickupPoint> {
        self.store.pickup_points().await.into_iter().find(|p| p.id == id)
    }

    async fn open_count_at(&self, pickup: PickupId) -> usize {
        self.by_pickup.read().await.get(&pickup).map(|s| s.len()).unwrap_or(0)
    }

    /// Bikes at `pickup` that are connected and not currently rented.
    async fn available_bikes_at(&self, pickup: &PickupPoint) -> Vec<BikeId> {
        let present = self.sessions.bikes_in(pickup).await;
        self.rentals.available_bikes(&present).await
    }

    pub async fn surplus(&self, pickup: PickupId) -> Option<i64> {
        let point = self.pickup_point(pickup).await?;
        let available = self.available_bikes_at(&point).await.len() as i64;
        let open = self.open_count_at(pickup).await as i64;
        Some(available - open)
    }

    pub async fn is_reserved(&self, bike: BikeId) -> bool {
        let Some((_, _, Some(pickup))) = self.sessions.most_recent_location(bike).await else {
            return false;
        };
        let Some(point) = self.pickup_point(pickup).await else {
            return false;
        };
        let present = self.sessions.bikes_in(&point).await.len();
        let open = self.open_count_at(pickup).await;
        present <= open
    }

    pub async fn reserve(
        &self,
        user: UserId,
        pickup: PickupId,
        for_time: u64,
    ) -> Result<Reservation, BikeshareError> {
        if self.by_user.read().await.contains_key(&user) {
            return Err(BikeshareError::ReservationExists);
        }

        let now = epoch_ms();
        let lead = Duration::from_millis(for_time.saturating_sub(now));
        if lead < self.min_lead {
            let point = self.pickup_point(pickup).await.ok_or(BikeshareError::InsufficientSupply)?;
            let available = self.available_bikes_at(&point).await.len();
            let open = self.open_count_at(pickup).await;
            if available <= open {
                return Err(BikeshareError::InsufficientSupply);
            }
        }

        let reservation = Reservation {
            id: ReservationId(uuid::Uuid::new_v4()),
            user_id: user,
            pickup_id: pickup,
            reserved_for: for_time,
            claimed_rental: None,
            outcome: None,
            ended_at: None,
        };

        self.store.create_reservation(reservation.clone()).await;
        self.open.write().await.insert(reservation.id, reservation.clone());
        self.by_pickup.write().await.entry(pickup).or_default().insert(reservation.id);
        self.by_user.write().await.insert(user, reservation.id);

        self.hub
            .emit(BikeshareEvent::ReservationOpened {
                reservation: reservation.id,
                pickup,
                user,
                for_time,
            })
            .await;

        Ok(reservation)
    }

    pub async fn claim(
        &self,
        reservation_id: ReservationId,
        bike: Option<BikeId>,
    ) -> Result<(Rental, Option<Point>), BikeshareError> {
        // A reservation missing from the open cache already left the claimable
        // window by some other path (claimed, cancelled, or swept as expired).
        let reservation =
            self.open.read().await.get(&reservation_id).cloned().ok_or(BikeshareError::OutsideWindow)?;

        let now = epoch_ms();
        let half_window = self.window.as_millis() as u64 / 2;
        let lo = reservation.reserved_for.saturating_sub(half_window);
        let hi = reservation.reserved_for.saturating_add(half_window);
        if now < lo || now > hi {
            return Err(BikeshareError::OutsideWindow);
        }

        let point = self.pickup_point(reservation.pickup_id).await.ok_or(BikeshareError::NoBikes)?;

        let chosen = match bike {
            Some(b) => {
                let (_, _, containing) =
                    self.sessions.most_recent_location(b).await.ok_or(BikeshareError::NoBikes)?;
                if containing != Some(reservation.pickup_id) {
                    return Err(BikeshareError::WrongPickup);
                }
                b
            }
            None => {
                let candidates = self.available_bikes_at(&point).await;
                *candidates.choose(&mut rand::rng()).ok_or(BikeshareError::NoBikes)?
            }
        };

        let (rental, start_location) = self.rentals.start(reservation.user_id, chosen).await?;

        self.close(reservation_id, ReservationOutcome::Claimed, Some(rental.id), now).await;
        self.hub
            .emit(BikeshareEvent::ReservationClaimed { reservation: reservation_id, rental: rental.id })
            .await;

        Ok((rental, start_location))
    }

    pub async fn cancel(&self, reservation_id: ReservationId) -> Result<(), BikeshareError> {
        if !self.open.read().await.contains_key(&reservation_id) {
            return Err(BikeshareError::OutsideWindow);
        }
        self.close(reservation_id, ReservationOutcome::Cancelled, None, epoch_ms()).await;
        self.hub.emit(BikeshareEvent::ReservationCancelled { reservation: reservation_id }).await;
        Ok(())
    }

    async fn close(
        &self,
        id: ReservationId,
        outcome: ReservationOutcome,
        claimed_rental: Option<crate::model::RentalId>,
        ended_at: u64,
    ) {
        let reservation = self.open.write().await.remove(&id);
        if let Some(r) = &reservation {
            if let Some(bucket) = self.by_pickup.write().await.get_mut(&r.pickup_id) {
                bucket.remove(&id);
            }
            self.by_user.write().await.remove(&r.user_id);
        }
        self.store.close_reservation(id, outcome, claimed_rental, ended_at).await;
    }

    /// Close every open reservation whose claim window has fully passed.
    pub async fn sweep_expired(&self) -> usize {
        let now = epoch_ms();
        let half_window = self.window.as_millis() as u64 / 2;
        let expired: Vec<ReservationId> = self
            .open
            .read()
            .await
            .values()
            .filter(|r| now > r.reserved_for.saturating_add(half_window))
            .map(|r| r.id)
            .collect();

        for id in &expired {
            self.close(*id, ReservationOutcome::Expired, None, now).await;
            self.hub.emit(BikeshareEvent::ReservationExpired { reservation: *id }).await;
        }
        expired.len()
    }

    pub async fn rebuild(&self) {
        for reservation in self.store.open_reservations().await {
            self.by_pickup
                .write()
                .await
                .entry(reservation.pickup_id)
                .or_default()
                .insert(reservation.id);
            self.by_user.write().await.insert(reservation.user_id, reservation.id);
            self.open.write().await.insert(reservation.id, reservation);
        }
    }
}

/// Spawn the background reservation-expiry sweep. Runs until `shutdown` is cancelled.
pub fn spawn_expiry_sweep<S: Store + 'static>(
    manager: Arc<ReservationManager<S>>,
    period: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let expired = manager.sweep_expired().await;
                    if expired > 0 {
                        tracing::debug!(expired, "expired stale reservations");
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Polygon;
    use crate::store::InMemoryStore;
    use crate::ticket_store::TicketStore;

    fn pickup(id: u64) -> PickupPoint {
        PickupPoint {
            id: PickupId(id),
            name: "depot".into(),
            area: Polygon::new(vec![
                Point::new(0.0, 0.0),
                Point::new(10.0, 0.0),
                Point::new(10.0, 10.0),
                Point::new(0.0, 10.0),
            ]),
        }
    }

    async fn setup() -> (
        Arc<InMemoryStore>,
        Arc<BikeSessionLayer<InMemoryStore>>,
        Arc<RentalManager<InMemoryStore>>,
        ReservationManager<InMemoryStore>,
    ) {
        let store = Arc::new(InMemoryStore::new());
        store.seed_pickup_points(vec![pickup(1)]);
        let hub = Arc::new(EventHub::new());
        let tickets = Arc::new(TicketStore::new(3, Duration::from_secs(10)));
        let sessions = Arc::new(BikeSessionLayer::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            tickets,
            Duration::from_secs(1),
        ));
        let rentals =
            Arc::new(RentalManager::new(Arc::clone(&store), Arc::clone(&hub), Arc::clone(&sessions)));
        let manager = ReservationManager::new(
            Arc::clone(&store),
            hub,
            Arc::clone(&sessions),
            Arc::clone(&rentals),
            Duration::from_secs(3 * 3600),
            Duration::from_secs(3600),
        );
        (store, sessions, rentals, manager)
    }

    #[tokio::test]
    async fn reservation_far_enough_out_skips_supply_check() {
        let (_store, _sessions, _rentals, mgr) = setup().await;
        let now = epoch_ms();
        let far = now + Duration::from_secs(5 * 3600).as_millis() as u64;
        mgr.reserve(UserId(1), PickupId(1), far).await.unwrap();
    }

    #[tokio::test]
    async fn reservation_soon_with_no_supply_fails() {
        let (_store, _sessions, _rentals, mgr) = setup().await;
        let now = epoch_ms();
        let soon = now + Duration::from_secs(3600).as_millis() as u64;
        let err = mgr.reserve(UserId(1), PickupId(1), soon).await.unwrap_err();
        assert_eq!(err, BikeshareError::InsufficientSupply);
    }

    #[tokio::test]
    async fn user_cannot_hold_two_open_reservations() {
        let (_store, _sessions, _rentals, mgr) = setup().await;
        let now = epoch_ms();
        let far = now + Duration::from_secs(5 * 3600).as_millis() as u64;
        mgr.reserve(UserId(1), PickupId(1), far).await.unwrap();
        let err = mgr.reserve(UserId(1), PickupId(1), far).await.unwrap_err();
        assert_eq!(err, BikeshareError::ReservationExists);
    }

    #[tokio::test]
    async fn claim_outside_window_is_rejected() {
        let (_store, _sessions, _rentals, mgr) = setup().await;
        let now = epoch_ms();
        let far = now + Duration::from_secs(5 * 3600).as_millis() as u64;
        let reservation = mgr.reserve(UserId(1), PickupId(1), far).await.unwrap();
        let err = mgr.claim(reservation.id, None).await.unwrap_err();
        assert_eq!(err, BikeshareError::OutsideWindow);
    }

    #[tokio::test]
    async fn sweep_expires_unclaimed_reservations() {
        let (store, _sessions, _rentals, mgr) = setup().await;
        let now = epoch_ms();
        let reservation = Reservation {
            id: ReservationId(uuid::Uuid::new_v4()),
            user_id: UserId(1),
            pickup_id: PickupId(1),
            reserved_for: now.saturating_sub(Duration::from_secs(7200).as_millis() as u64),
            claimed_rental: None,
            outcome: None,
            ended_at: None,
        };
        store.create_reservation(reservation.clone()).await;
        mgr.rebuild().await;

        let expired = mgr.sweep_expired().await;
        assert_eq!(expired, 1);
    }
}
