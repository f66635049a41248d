// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed publish/subscribe spine.
//!
//! The fleet's original event hub dispatched by intercepting attribute access
//! on an event-name string and matching a handler's declared parameters against
//! the emitted payload's shape at call time. Rust has no attribute interception
//! and no runtime parameter-shape checks to begin with: a handler's argument
//! type *is* its event's payload type, enforced by the compiler before this
//! ever runs. What's left to check at runtime is exactly what the hub's own
//! name registry can't delegate to the type system — whether the name a
//! caller subscribes or emits under is one the hub actually declares.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::RwLock;

use crate::error::BikeshareError;

/// A closed event type dispatched by an [`EventHub`].
///
/// `event_name` identifies the variant for subscription routing; `all_names`
/// is the hub's full declared registry, used to reject `subscribe`/`emit`
/// calls naming an event the hub was never built to carry.
pub trait Event: Clone + Send + Sync + 'static {
    fn event_name(&self) -> &'static str;
    fn all_names() -> &'static [&'static str];
}

/// Handle returned by [`EventHub::subscribe`] / [`EventHub::subscribe_async`],
/// used to later [`EventHub::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type SyncHandler<E> = Arc<dyn Fn(&E) -> Result<(), BikeshareError> + Send + Sync>;
type AsyncHandler<E> = Arc<dyn Fn(E) -> BoxFuture<'static, Result<(), BikeshareError>> + Send + Sync>;

enum Slot<E: Event> {
    Sync(SyncHandler<E>),
    Async(AsyncHandler<E>),
}

/// A typed pub/sub registry over one closed event enum.
pub struct EventHub<E: Event> {
    listeners: RwLock<HashMap<&'static str, Vec<(ListenerId, Slot<E>)>>>,
    next_id: AtomicU64,
}

impl<E: Event> EventHub<E> {
    pub fn new() -> Self {
        Self { listeners: RwLock::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    fn known(name: &str) -> Result<&'static str, BikeshareError> {
        E::all_names().iter().find(|n| **n == name).copied().ok_or(BikeshareError::UnknownEvent)
    }

    /// Register a synchronous handler for `event_name`. Fails with
    /// [`BikeshareError::UnknownEvent`] if the hub was not declared to carry it.
    pub async fn subscribe(
        &self,
        event_name: &str,
        handler: impl Fn(&E) -> Result<(), BikeshareError> + Send + Sync + 'static,
    ) -> Result<ListenerId, BikeshareError> {
        let name = Self::known(event_name)?;
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .await
            .entry(name)
            .or_default()
            .push((id, Slot::Sync(Arc::new(handler))));
        Ok(id)
    }

    /// Register an asynchronous handler for `event_name`.
    pub async fn subscribe_async<F>(
        &self,
        event_name: &str,
        handler: impl Fn(E) -> F + Send + Sync + 'static,
    ) -> Result<ListenerId, BikeshareError>
    where
        F: std::future::Future<Output = Result<(), BikeshareError>> + Send + 'static,
    {
        let name = Self::known(event_name)?;
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler = Arc::new(handler);
        let slot: AsyncHandler<E> = Arc::new(move |event: E| {
            let handler = Arc::clone(&handler);
            Box::pin(async move { handler(event).await })
        });
        self.listeners.write().await.entry(name).or_default().push((id, Slot::Async(slot)));
        Ok(id)
    }

    /// Remove a previously registered handler. Fails with
    /// [`BikeshareError::UnknownListener`] if `id` is not currently registered.
    pub async fn unsubscribe(&self, id: ListenerId) -> Result<(), BikeshareError> {
        let mut listeners = self.listeners.write().await;
        for bucket in listeners.values_mut() {
            if let Some(pos) = bucket.iter().position(|(i, _)| *i == id) {
                bucket.remove(pos);
                return Ok(());
            }
        }
        Err(BikeshareError::UnknownListener)
    }

    /// Dispatch `event` to every subscriber of its name, synchronous handlers
    /// first, in registration order, then asynchronous handlers awaited in
    /// registration order. A handler's failure is logged and does not stop
    /// dispatch to the handlers after it.
    pub async fn emit(&self, event: E) {
        let name = event.event_name();
        let sync_handlers: Vec<SyncHandler<E>>;
        let async_handlers: Vec<AsyncHandler<E>>;
        {
            let listeners = self.listeners.read().await;
            let bucket = match listeners.get(name) {
                Some(b) => b,
                None => return,
            };
            sync_handlers = bucket
                .iter()
                .filter_map(|(_, slot)| match slot {
                    Slot::Sync(h) => Some(Arc::clone(h)),
                    Slot::Async(_) => None,
                })
                .collect();
            async_handlers = bucket
                .iter()
                .filter_map(|(_, slot)| match slot {
                    Slot::Async(h) => Some(Arc::clone(h)),
                    Slot::Sync(_) => None,
                })
                .collect();
        }

        for handler in &sync_handlers {
            if let Err(err) = handler(&event) {
                tracing::warn!(event = name, %err, "event handler failed");
            }
        }
        for handler in async_handlers {
            if let Err(err) = handler(event.clone()).await {
                tracing::warn!(event = name, %err, "async event handler failed");
            }
        }
    }
}

impl<E: Event> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

// -- Domain events ------------------------------------------------------------

use crate::geo::Point;
use crate::model::{BikeId, PickupId, RentalId, ReservationId, UserId};

/// Every event the fleet coordinator's components may emit.
#[derive(Debug, Clone)]
pub enum BikeshareEvent {
    BikeMoved { bike: BikeId, point: Point, time: u64 },
    RentalStarted { rental: RentalId, user: UserId, bike: BikeId, start_location: Option<Point> },
    RentalEnded {
        rental: RentalId,
        user: UserId,
        bike: BikeId,
        end_location: Option<Point>,
        price: f64,
        distance: f64,
    },
    RentalCancelled { rental: RentalId, user: UserId, bike: BikeId },
    ReservationOpened { reservation: ReservationId, pickup: PickupId, user: UserId, for_time: u64 },
    ReservationClaimed { reservation: ReservationId, rental: RentalId },
    ReservationCancelled { reservation: ReservationId },
    ReservationExpired { reservation: ReservationId },
}

impl Event for BikeshareEvent {
    fn event_name(&self) -> &'static str {
        match self {
            Self::BikeMoved { .. } => "bike_moved",
            Self::RentalStarted { .. } => "rental_started",
            Self::RentalEnded { .. } => "rental_ended",
            Self::RentalCancelled { .. } => "rental_cancelled",
            Self::ReservationOpened { .. } => "reservation_opened",
            Self::ReservationClaimed { .. } => "reservation_claimed",
            Self::ReservationCancelled { .. } => "reservation_cancelled",
            Self::ReservationExpired { .. } => "reservation_expired",
        }
    }

    fn all_names() -> &'static [&'static str] {
        &[
            "bike_moved",
            "rental_started",
            "rental_ended",
            "rental_cancelled",
            "reservation_opened",
            "reservation_claimed",
            "reservation_cancelled",
            "reservation_expired",
        ]
    }
}
