// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests exercising the managers wired together through
//! [`BikeshareState`], rather than each in isolation.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use bikeshare::config::BikeshareConfig;
use bikeshare::error::BikeshareError;
use bikeshare::geo::{Point, Polygon};
use bikeshare::model::{epoch_ms, Bike, BikeId, PickupId, PickupPoint, UserId};
use bikeshare::state::BikeshareState;
use bikeshare::store::{InMemoryStore, Store};

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

fn depot(id: u64) -> PickupPoint {
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

async fn test_state() -> Arc<BikeshareState<InMemoryStore>> {
    let store = Arc::new(InMemoryStore::new());
    let state = Arc::new(BikeshareState::new(store, test_config(), CancellationToken::new()));
    state.rebuild().await;
    state
}

#[tokio::test]
async fn rental_lifecycle_round_trips_through_state() {
    let state = test_state().await;
    let bike = BikeId([7u8; 32]);
    state.store.register_bike(Bike { id: bike, in_circulation: true }).await;

    let (rental, _start_location) = state.rentals.start(UserId(1), bike).await.unwrap();
    assert!(state.rentals.has_active_rental(UserId(1)).await);

    let finished = state.rentals.finish(UserId(1), 0.0).await.unwrap();
    assert_eq!(finished.id, rental.id);
    assert!(finished.price.is_some());
    assert!(!state.rentals.has_active_rental(UserId(1)).await);
}

#[tokio::test]
async fn reservation_claim_outside_its_window_is_rejected_through_state() {
    let state = test_state().await;
    state.store.seed_pickup_points(vec![depot(1)]);

    let far = epoch_ms() + Duration::from_secs(5 * 3600).as_millis() as u64;
    let reservation = state.reservations.reserve(UserId(9), PickupId(1), far).await.unwrap();

    // The claim window is centered on `reserved_for`; outside it the claim
    // is rejected regardless of bike availability.
    let err = state.reservations.claim(reservation.id, None).await.unwrap_err();
    assert_eq!(err, BikeshareError::OutsideWindow);
}

#[tokio::test]
async fn sourcer_is_wired_to_reservation_events_and_promotes_on_tick() {
    // A zero lead time means every future reservation both skips the
    // at-booking supply check and is immediately eligible for promotion,
    // so a short real sleep is enough to observe the hub -> sourcer wiring
    // without mocking the clock.
    let mut config = test_config();
    config.reservation_min_lead_min = 0;
    let store = Arc::new(InMemoryStore::new());
    store.seed_pickup_points(vec![depot(1)]);
    let state = Arc::new(BikeshareState::new(store, config, CancellationToken::new()));
    state.rebuild().await;
    state.spawn_background().await.unwrap();

    let soon = epoch_ms() + 5;
    let reservation = state.reservations.reserve(UserId(3), PickupId(1), soon).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    state.sourcer.tick().await;

    // No bikes ever connect at this pickup, so the reservation that just
    // entered its (zero-width) lead window shows up as a shortage.
    let shortages = state.sourcer.shortages().await;
    assert_eq!(shortages.get(&PickupId(1)).map(|(count, _)| *count), Some(1));

    state.reservations.cancel(reservation.id).await.unwrap();
    assert!(state.sourcer.shortages().await.is_empty());
}

#[tokio::test]
async fn rebuild_restores_open_rentals_and_reservations_from_the_store() {
    let store = Arc::new(InMemoryStore::new());
    store.seed_pickup_points(vec![depot(1)]);

    let bike = BikeId([3u8; 32]);
    store.register_bike(Bike { id: bike, in_circulation: true }).await;

    {
        let warm = Arc::new(BikeshareState::new(
            Arc::clone(&store),
            test_config(),
            CancellationToken::new(),
        ));
        warm.rentals.start(UserId(1), bike).await.unwrap();
        let far = epoch_ms() + Duration::from_secs(5 * 3600).as_millis() as u64;
        warm.reservations.reserve(UserId(2), PickupId(1), far).await.unwrap();
    }

    let restarted = Arc::new(BikeshareState::new(store, test_config(), CancellationToken::new()));
    restarted.rebuild().await;

    assert!(restarted.rentals.has_active_rental(UserId(1)).await);
    let err =
        restarted.reservations.reserve(UserId(2), PickupId(1), epoch_ms()).await.unwrap_err();
    assert_eq!(err, BikeshareError::ReservationExists);
}
