// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistence boundary.
//!
//! The fleet's SQL-backed store is an external collaborator; this trait is
//! the seam it plugs into. [`InMemoryStore`] stands in for it in tests and in
//! the standalone demo binary.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use crate::model::{
    Bike, BikeId, LocationUpdate, PickupPoint, Rental, RentalId, RentalUpdate,
    Reservation, ReservationId, ReservationOutcome,
};

/// Async persistence boundary consumed by every manager.
pub trait Store: Send + Sync {
    fn register_bike(&self, bike: Bike) -> impl Future<Output = ()> + Send;
    fn find_bike(&self, id: BikeId) -> impl Future<Output = Option<Bike>> + Send;

    fn record_location_update(
        &self,
        bike: BikeId,
        update: LocationUpdate,
    ) -> impl Future<Output = ()> + Send;
    fn location_updates_between(
        &self,
        bike: BikeId,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Vec<LocationUpdate>> + Send;

    fn create_rental(&self, rental: Rental) -> impl Future<Output = ()> + Send;
    fn find_rental(&self, id: RentalId) -> impl Future<Output = Option<Rental>> + Send;
    fn append_rental_update(
        &self,
        rental: RentalId,
        update: RentalUpdate,
    ) -> impl Future<Output = ()> + Send;
    fn set_rental_price(&self, rental: RentalId, price: f64) -> impl Future<Output = ()> + Send;
    fn open_rentals(&self) -> impl Future<Output = Vec<Rental>> + Send;
    fn rental_updates_since(&self, since: u64) -> impl Future<Output = Vec<RentalUpdate>> + Send;

    fn create_reservation(&self, reservation: Reservation) -> impl Future<Output = ()> + Send;
    fn close_reservation(
        &self,
        id: ReservationId,
        outcome: ReservationOutcome,
        claimed_rental: Option<RentalId>,
        ended_at: u64,
    ) -> impl Future<Output = ()> + Send;
    fn open_reservations(&self) -> impl Future<Output = Vec<Reservation>> + Send;

    fn pickup_points(&self) -> impl Future<Output = Vec<PickupPoint>> + Send;
}

/// In-memory [`Store`] implementation used by tests and the demo binary.
#[derive(Default)]
pub struct InMemoryStore {
    bikes: Mutex<HashMap<BikeId, Bike>>,
    locations: Mutex<HashMap<BikeId, Vec<LocationUpdate>>>,
    rentals: Mutex<HashMap<RentalId, Rental>>,
    reservations: Mutex<HashMap<ReservationId, Reservation>>,
    pickups: Mutex<Vec<PickupPoint>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_pickup_points(&self, pickups: Vec<PickupPoint>) {
        *self.pickups.lock().unwrap_or_else(|e| e.into_inner()) = pickups;
    }
}

impl Store for InMemoryStore {
    async fn register_bike(&self, bike: Bike) {
        self.bikes.lock().unwrap_or_else(|e| e.into_inner()).insert(bike.id, bike);
    }

    async fn find_bike(&self, id: BikeId) -> Option<Bike> {
        self.bikes.lock().unwrap_or_else(|e| e.into_inner()).get(&id).cloned()
    }

    async fn record_location_update(&self, bike: BikeId, update: LocationUpdate) {
        self.locations.lock().unwrap_or_else(|e| e.into_inner()).entry(bike).or_default().push(update);
    }

    async fn location_updates_between(&self, bike: BikeId, from: u64, to: u64) -> Vec<LocationUpdate> {
        self.locations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&bike)
            .map(|updates| {
                updates.iter().filter(|u| u.time >= from && u.time <= to).copied().collect()
            })
            .unwrap_or_default()
    }

    async fn create_rental(&self, rental: Rental) {
        self.rentals.lock().unwrap_or_else(|e| e.into_inner()).insert(rental.id, rental);
    }

    async fn find_rental(&self, id: RentalId) -> Option<Rental> {
        self.rentals.lock().unwrap_or_else(|e| e.into_inner()).get(&id).cloned()
    }

    async fn append_rental_update(&self, rental: RentalId, update: RentalUpdate) {
        if let Some(r) = self.rentals.lock().unwrap_or_else(|e| e.into_inner()).get_mut(&rental) {
            r.updates.push(update);
        }
    }

    async fn set_rental_price(&self, rental: RentalId, price: f64) {
        if let Some(r) = self.rentals.lock().unwrap_or_else(|e| e.into_inner()).get_mut(&rental) {
            r.price = Some(price);
        }
    }

    async fn open_rentals(&self) -> Vec<Rental> {
        self.rentals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| r.is_open())
            .cloned()
            .collect()
    }

    async fn rental_updates_since(&self, since: u64) -> Vec<RentalUpdate> {
        let mut updates: Vec<RentalUpdate> = self
            .rentals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .flat_map(|r| r.updates.iter().copied())
            .filter(|u| u.time >= since)
            .collect();
        updates.sort_by_key(|u| u.time);
        updates
    }

    async fn create_reservation(&self, reservation: Reservation) {
        self.reservations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(reservation.id, reservation);
    }

    async fn close_reservation(
        &self,
        id: ReservationId,
        outcome: ReservationOutcome,
        claimed_rental: Option<RentalId>,
        ended_at: u64,
    ) {
        if let Some(r) = self.reservations.lock().unwrap_or_else(|e| e.into_inner()).get_mut(&id) {
            r.outcome = Some(outcome);
            r.claimed_rental = claimed_rental;
            r.ended_at = Some(ended_at);
        }
    }

    async fn open_reservations(&self) -> Vec<Reservation> {
        self.reservations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| r.is_open())
            .cloned()
            .collect()
    }

    async fn pickup_points(&self) -> Vec<PickupPoint> {
        self.pickups.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Point, Polygon};
    use crate::model::PickupId;

    fn bike(byte: u8) -> BikeId {
        BikeId([byte; 32])
    }

    #[tokio::test]
    async fn register_and_find_round_trip() {
        let store = InMemoryStore::new();
        store.register_bike(Bike { id: bike(1), in_circulation: true }).await;
        let found = store.find_bike(bike(1)).await.unwrap();
        assert!(found.in_circulation);
    }

    #[tokio::test]
    async fn pickup_points_round_trip() {
        let store = InMemoryStore::new();
        store.seed_pickup_points(vec![PickupPoint {
            id: PickupId(1),
            name: "depot".into(),
            area: Polygon::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0), Point::new(1.0, 1.0)]),
        }]);
        assert_eq!(store.pickup_points().await.len(), 1);
    }
}
