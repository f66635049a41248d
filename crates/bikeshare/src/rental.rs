// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-bike exclusivity and rental lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::BikeshareError;
use crate::events::{BikeshareEvent, EventHub};
use crate::geo::{polyline_length, Point};
use crate::model::{epoch_ms, BikeId, Rental, RentalId, RentalUpdate, RentalUpdateType, UserId};
use crate::pricing;
use crate::session::BikeSessionLayer;
use crate::store::Store;

const DAY_MS: u64 = 86_400_000;

/// Enforces at most one open rental per user and per bike.
pub struct RentalManager<S: Store> {
    store: Arc<S>,
    hub: Arc<EventHub<BikeshareEvent>>,
    sessions: Arc<BikeSessionLayer<S>>,
    by_user: RwLock<HashMap<UserId, (RentalId, BikeId)>>,
}

impl<S: Store> RentalManager<S> {
    pub fn new(
        store: Arc<S>,
        hub: Arc<EventHub<BikeshareEvent>>,
        sessions: Arc<BikeSessionLayer<S>>,
    ) -> Self {
        Self { store, hub, sessions, by_user: RwLock::new(HashMap::new()) }
    }

    pub async fn start(
        &self,
        user: UserId,
        bike: BikeId,
    ) -> Result<(Rental, Option<Point>), BikeshareError> {
        {
            let map = self.by_user.read().await;
            if map.contains_key(&user) {
                return Err(BikeshareError::ActiveRental);
            }
            if map.values().any(|(_, b)| *b == bike) {
                return Err(BikeshareError::CurrentlyRented);
            }
        }

        let start_location = self.sessions.most_recent_location(bike).await.map(|(p, _, _)| p);
        let now = epoch_ms();
        let rental_id = RentalId(uuid::Uuid::new_v4());
        let rental = Rental {
            id: rental_id,
            user_id: user,
            bike_id: bike,
            start_time: now,
            updates: vec![RentalUpdate { rental_id, kind: RentalUpdateType::Rent, time: now }],
            price: None,
        };

        let mut map = self.by_user.write().await;
        if map.contains_key(&user) {
            return Err(BikeshareError::ActiveRental);
        }
        if map.values().any(|(_, b)| *b == bike) {
            return Err(BikeshareError::CurrentlyRented);
        }
        self.store.create_rental(rental.clone()).await;
        map.insert(user, (rental.id, bike));
        drop(map);

        self.hub
            .emit(BikeshareEvent::RentalStarted {
                rental: rental.id,
                user,
                bike,
                start_location,
            })
            .await;

        Ok((rental, start_location))
    }

    pub async fn finish(&self, user: UserId, extra_cost: f64) -> Result<Rental, BikeshareError> {
        self.terminate(user, RentalUpdateType::Return, extra_cost).await
    }

    pub async fn cancel(&self, user: UserId) -> Result<Rental, BikeshareError> {
        self.terminate(user, RentalUpdateType::Cancel, 0.0).await
    }

    async fn terminate(
        &self,
        user: UserId,
        kind: RentalUpdateType,
        extra_cost: f64,
    ) -> Result<Rental, BikeshareError> {
        let (rental_id, bike) = {
            let mut map = self.by_user.write().await;
            map.remove(&user).ok_or(BikeshareError::InactiveRental)?
        };

        let now = epoch_ms();
        let start_time = self
            .store
            .open_rentals()
            .await
            .into_iter()
            .find(|r| r.id == rental_id)
            .map(|r| r.start_time)
            .unwrap_or(now);
        let end_location = self.sessions.most_recent_location(bike).await.map(|(p, _, _)| p);
        let locations = self.store.location_updates_between(bike, start_time, now).await;
        let distance = polyline_length(&locations.iter().map(|l| l.point).collect::<Vec<_>>());

        self.store
            .append_rental_update(rental_id, RentalUpdate { rental_id, kind, time: now })
            .await;

        let price = match kind {
            RentalUpdateType::Return => {
                let p = pricing::price(start_time, now, extra_cost);
                self.store.set_rental_price(rental_id, p).await;
                Some(p)
            }
            _ => None,
        };

        let rental = Rental {
            id: rental_id,
            user_id: user,
            bike_id: bike,
            start_time,
            updates: vec![RentalUpdate { rental_id, kind, time: now }],
            price,
        };

        match kind {
            RentalUpdateType::Return => {
                self.hub
                    .emit(BikeshareEvent::RentalEnded {
                        rental: rental_id,
                        user,
                        bike,
                        end_location,
                        price: price.unwrap_or(0.0),
                        distance,
                    })
                    .await;
            }
            RentalUpdateType::Cancel => {
                self.hub
                    .emit(BikeshareEvent::RentalCancelled { rental: rental_id, user, bike })
                    .await;
            }
            _ => {}
        }

        Ok(rental)
    }

    pub async fn active_rental(&self, user: UserId) -> Option<(RentalId, BikeId)> {
        self.by_user.read().await.get(&user).copied()
    }

    pub async fn has_active_rental(&self, user: UserId) -> bool {
        self.by_user.read().await.contains_key(&user)
    }

    pub async fn is_in_use(&self, bike: BikeId) -> bool {
        self.by_user.read().await.values().any(|(_, b)| *b == bike)
    }

    pub async fn is_renting(&self, user: UserId, bike: BikeId) -> bool {
        self.by_user.read().await.get(&user).is_some_and(|(_, b)| *b == bike)
    }

    /// Filter `candidates` down to bikes with no open rental.
    pub async fn available_bikes(&self, candidates: &[BikeId]) -> Vec<BikeId> {
        let map = self.by_user.read().await;
        candidates.iter().filter(|b| !map.values().any(|(_, rb)| rb == *b)).copied().collect()
    }

    pub fn estimate_price(&self, start_time: u64) -> f64 {
        pricing::price(start_time, epoch_ms(), 0.0)
    }

    /// Reinstall open rentals from the store and replay today's rental
    /// updates onto the hub so downstream subscribers (statistics, the
    /// shortage tracker) reconstruct the day's state on startup.
    pub async fn rebuild(&self) {
        let open = self.store.open_rentals().await;
        let mut map = self.by_user.write().await;
        for rental in &open {
            map.insert(rental.user_id, (rental.id, rental.bike_id));
        }
        drop(map);

        let midnight = epoch_ms() - (epoch_ms() % DAY_MS);
        let mut updates = self.store.rental_updates_since(midnight).await;
        updates.sort_by_key(|u| u.time);

        for update in updates {
            let Some(rental) = self.store.find_rental(update.rental_id).await else { continue };
            match update.kind {
                RentalUpdateType::Rent => {
                    self.hub
                        .emit(BikeshareEvent::RentalStarted {
                            rental: rental.id,
                            user: rental.user_id,
                            bike: rental.bike_id,
                            start_location: None,
                        })
                        .await;
                }
                RentalUpdateType::Return => {
                    let locations = self
                        .store
                        .location_updates_between(rental.bike_id, rental.start_time, update.time)
                        .await;
                    let distance =
                        polyline_length(&locations.iter().map(|l| l.point).collect::<Vec<_>>());
                    self.hub
                        .emit(BikeshareEvent::RentalEnded {
                            rental: rental.id,
                            user: rental.user_id,
                            bike: rental.bike_id,
                            end_location: None,
                            price: rental.price.unwrap_or(0.0),
                            distance,
                        })
                        .await;
                }
                RentalUpdateType::Cancel => {
                    self.hub
                        .emit(BikeshareEvent::RentalCancelled {
                            rental: rental.id,
                            user: rental.user_id,
                            bike: rental.bike_id,
                        })
                        .await;
                }
                RentalUpdateType::Lock | RentalUpdateType::Unlock => {}
            }
        }
    }
}
