// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted and wire data model shared by the rental and reservation managers.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::{Point, Polygon};

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A bike's Ed25519 public key, also its unique identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BikeId(pub [u8; 32]);

impl BikeId {
    /// Short display identifier: the first 3 bytes, hex-encoded.
    pub fn short(&self) -> String {
        self.0[..3].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for BikeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BikeId({})", self.short())
    }
}

impl fmt::Display for BikeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PickupId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RentalId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReservationId(pub Uuid);

/// A registered bike's persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bike {
    pub id: BikeId,
    pub in_circulation: bool,
}

/// A user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub admin: bool,
}

/// A named polygonal area bikes may be picked up from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupPoint {
    pub id: PickupId,
    pub name: String,
    pub area: Polygon,
}

impl PickupPoint {
    pub fn contains(&self, point: &Point) -> bool {
        self.area.contains(point)
    }
}

/// One reported position/battery sample from a bike.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub point: Point,
    pub time: u64,
}

/// The lifecycle event recorded against a rental.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RentalUpdateType {
    Rent,
    Return,
    Lock,
    Unlock,
    Cancel,
}

impl RentalUpdateType {
    /// Update types that close out a rental's open-ended state.
    pub fn terminating_types() -> &'static [RentalUpdateType] {
        &[RentalUpdateType::Return, RentalUpdateType::Cancel]
    }

    pub fn is_terminating(&self) -> bool {
        Self::terminating_types().contains(self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RentalUpdate {
    pub rental_id: RentalId,
    pub kind: RentalUpdateType,
    pub time: u64,
}

/// A user's binding to a bike for the duration of a rental.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rental {
    pub id: RentalId,
    pub user_id: UserId,
    pub bike_id: BikeId,
    pub start_time: u64,
    pub updates: Vec<RentalUpdate>,
    pub price: Option<f64>,
}

impl Rental {
    pub fn is_open(&self) -> bool {
        !self.updates.iter().any(|u| u.kind.is_terminating())
    }

    pub fn end_time(&self) -> Option<u64> {
        self.updates.iter().rev().find(|u| u.kind.is_terminating()).map(|u| u.time)
    }
}

/// Terminal outcome of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationOutcome {
    Claimed,
    Cancelled,
    Expired,
}

/// A user's claim on a future bike at a pickup point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub user_id: UserId,
    pub pickup_id: PickupId,
    pub reserved_for: u64,
    pub claimed_rental: Option<RentalId>,
    pub outcome: Option<ReservationOutcome>,
    pub ended_at: Option<u64>,
}

impl Reservation {
    pub fn is_open(&self) -> bool {
        self.outcome.is_none()
    }
}
