// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Predicts pickup-point bike shortages ahead of their reservation windows.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::BikeshareError;
use crate::events::{BikeshareEvent, EventHub};
use crate::model::{epoch_ms, PickupId, ReservationId};
use crate::reservation::ReservationManager;
use crate::store::Store;

/// Background shortage tracker driven by the Reservation Manager's events.
pub struct ReservationSourcer<S: Store> {
    reservations: Arc<ReservationManager<S>>,
    heap: RwLock<BinaryHeap<Reverse<(u64, PickupId, ReservationId)>>>,
    live: RwLock<HashSet<ReservationId>>,
    located: RwLock<HashMap<ReservationId, PickupId>>,
    shortages: RwLock<HashMap<PickupId, BTreeSet<(u64, ReservationId)>>>,
    min_lead: Duration,
}

impl<S: Store> ReservationSourcer<S> {
    pub fn new(reservations: Arc<ReservationManager<S>>, min_lead: Duration) -> Self {
        Self {
            reservations,
            heap: RwLock::new(BinaryHeap::new()),
            live: RwLock::new(HashSet::new()),
            located: RwLock::new(HashMap::new()),
            shortages: RwLock::new(HashMap::new()),
            min_lead,
        }
    }

    async fn on_opened(&self, reservation: ReservationId, pickup: PickupId, for_time: u64) {
        let now = epoch_ms();
        if for_time <= now.saturating_add(self.min_lead.as_millis() as u64) {
            return;
        }
        self.heap.write().await.push(Reverse((for_time, pickup, reservation)));
        self.live.write().await.insert(reservation);
        self.located.write().await.insert(reservation, pickup);
    }

    async fn on_closed(&self, reservation: ReservationId) {
        self.live.write().await.remove(&reservation);
        let Some(pickup) = self.located.write().await.remove(&reservation) else {
            return;
        };
        if let Some(bucket) = self.shortages.write().await.get_mut(&pickup) {
            bucket.retain(|(_, id)| *id != reservation);
        }
    }

    /// Pop heap entries whose lead time has elapsed and record a shortage for
    /// any pickup that currently has no surplus to back them.
    async fn promote(&self) {
        let now = epoch_ms();
        let threshold = now.saturating_add(self.min_lead.as_millis() as u64);
        loop {
            let candidate = {
                let heap = self.heap.read().await;
                match heap.peek() {
                    Some(Reverse((reserved_for, _, _))) if *reserved_for <= threshold => true,
                    _ => false,
                }
            };
            if !candidate {
                break;
            }
            let Reverse((reserved_for, pickup, reservation)) =
                match self.heap.write().await.pop() {
                    Some(entry) => entry,
                    None => break,
                };

            if !self.live.write().await.remove(&reservation) {
                // Already cancelled or expired before reaching its lead window.
                continue;
            }

            let surplus = self.reservations.surplus(pickup).await.unwrap_or(0);
            if surplus < 0 {
                self.shortages
                    .write()
                    .await
                    .entry(pickup)
                    .or_default()
                    .insert((reserved_for, reservation));
            } else {
                self.located.write().await.remove(&reservation);
            }
        }
    }

    /// Re-check every pickup with a recorded shortage and drop entries the
    /// newly observed supply now covers.
    async fn cull(&self) {
        let pickups: Vec<PickupId> = self.shortages.read().await.keys().copied().collect();
        for pickup in pickups {
            let surplus = self.reservations.surplus(pickup).await.unwrap_or(0);
            let mut shortages = self.shortages.write().await;
            let Some(bucket) = shortages.get_mut(&pickup) else { continue };
            if surplus >= 0 {
                for (_, reservation) in bucket.iter() {
                    self.located.write().await.remove(reservation);
                }
                bucket.clear();
            } else {
                let deficit = (-surplus) as usize;
                while bucket.len() > deficit {
                    if let Some(earliest) = bucket.iter().next().copied() {
                        bucket.remove(&earliest);
                        self.located.write().await.remove(&earliest.1);
                    } else {
                        break;
                    }
                }
            }
            if bucket.is_empty() {
                shortages.remove(&pickup);
            }
        }
    }

    pub async fn tick(&self) {
        self.promote().await;
        self.cull().await;
    }

    /// `pickup -> (count, earliest reserved_for)` for every pickup currently short of bikes.
    pub async fn shortages(&self) -> HashMap<PickupId, (usize, u64)> {
        self.shortages
            .read()
            .await
            .iter()
            .filter_map(|(pickup, bucket)| {
                bucket.iter().next().map(|(earliest, _)| (*pickup, (bucket.len(), *earliest)))
            })
            .collect()
    }
}

/// Wire a sourcer's event-hub subscriptions and spawn its periodic tick loop.
///
/// Fails with [`BikeshareError::UnknownEvent`] only if the hub's declared
/// event names have drifted from what this function subscribes to.
pub async fn install<S: Store + 'static>(
    sourcer: Arc<ReservationSourcer<S>>,
    hub: &EventHub<BikeshareEvent>,
    period: Duration,
    shutdown: CancellationToken,
) -> Result<(), BikeshareError> {
    let s = Arc::clone(&sourcer);
    hub.subscribe_async("reservation_opened", move |event| {
        let s = Arc::clone(&s);
        async move {
            if let BikeshareEvent::ReservationOpened { reservation, pickup, for_time, .. } = event {
                s.on_opened(reservation, pickup, for_time).await;
            }
            Ok(())
        }
    })
    .await?;

    let s = Arc::clone(&sourcer);
    hub.subscribe_async("reservation_cancelled", move |event| {
        let s = Arc::clone(&s);
        async move {
            if let BikeshareEvent::ReservationCancelled { reservation } = event {
                s.on_closed(reservation).await;
            }
            Ok(())
        }
    })
    .await?;

    let s = Arc::clone(&sourcer);
    hub.subscribe_async("reservation_expired", move |event| {
        let s = Arc::clone(&s);
        async move {
            if let BikeshareEvent::ReservationExpired { reservation } = event {
                s.on_closed(reservation).await;
            }
            Ok(())
        }
    })
    .await?;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => sourcer.tick().await,
            }
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Point, Polygon};
    use crate::model::{epoch_ms, PickupPoint, UserId};
    use crate::rental::RentalManager;
    use crate::session::BikeSessionLayer;
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

    async fn rig() -> (Arc<ReservationManager<InMemoryStore>>, Arc<ReservationSourcer<InMemoryStore>>)
    {
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
        let min_lead = Duration::from_secs(3 * 3600);
        let reservations = Arc::new(ReservationManager::new(
            store,
            hub,
            sessions,
            rentals,
            min_lead,
            Duration::from_secs(3600),
        ));
        let sourcer = Arc::new(ReservationSourcer::new(Arc::clone(&reservations), min_lead));
        (reservations, sourcer)
    }

    #[tokio::test]
    async fn reservation_outside_lead_window_is_not_yet_promoted() {
        let (reservations, sourcer) = rig().await;
        let now = epoch_ms();
        let far = now + Duration::from_secs(5 * 3600).as_millis() as u64;
        let r1 = reservations.reserve(UserId(1), PickupId(1), far).await.unwrap();
        sourcer.on_opened(r1.id, PickupId(1), far).await;

        // `far` is 5h out and MIN_LEAD is 3h, so the heap entry isn't due yet.
        sourcer.tick().await;
        assert!(sourcer.shortages().await.is_empty());
    }

    #[tokio::test]
    async fn cull_clears_shortage_once_bikes_arrive() {
        let (reservations, sourcer) = rig().await;
        // Directly seed a shortage entry bypassing the lead-time gate, then
        // verify cull() drops it once surplus recovers.
        let reservation_id = ReservationId(uuid::Uuid::new_v4());
        sourcer
            .shortages
            .write()
            .await
            .entry(PickupId(1))
            .or_default()
            .insert((epoch_ms(), reservation_id));
        assert_eq!(sourcer.shortages().await.len(), 1);

        // No open reservations recorded against pickup 1, and no bikes
        // connected either, so surplus() is None -> unwrap_or(0) -> culled.
        let _ = &reservations;
        sourcer.cull().await;
        assert!(sourcer.shortages().await.is_empty());
    }
}
