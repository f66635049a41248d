// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes surfaced by the fleet coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BikeshareError {
    // Authentication
    IdentityUnknown,
    BadSignature,
    NoSuchTicket,
    TooManyTickets,
    // RPC
    Disconnected,
    RpcTimeout,
    DoubleResolve,
    // Rental
    ActiveRental,
    InactiveRental,
    CurrentlyRented,
    // Reservation
    ReservationExists,
    InsufficientSupply,
    OutsideWindow,
    NoBikes,
    WrongPickup,
    // Event hub
    UnknownEvent,
    HandlerSignatureMismatch,
    UnknownListener,
    Internal,
}

impl BikeshareError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::IdentityUnknown | Self::BadSignature => 401,
            Self::NoSuchTicket | Self::TooManyTickets => 400,
            Self::Disconnected => 409,
            Self::RpcTimeout => 504,
            Self::DoubleResolve => 500,
            Self::ActiveRental | Self::CurrentlyRented | Self::ReservationExists => 409,
            Self::InactiveRental => 404,
            Self::InsufficientSupply | Self::NoBikes => 409,
            Self::OutsideWindow => 400,
            Self::WrongPickup => 400,
            Self::UnknownEvent | Self::UnknownListener => 400,
            Self::HandlerSignatureMismatch => 500,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdentityUnknown => "IDENTITY_UNKNOWN",
            Self::BadSignature => "BAD_SIGNATURE",
            Self::NoSuchTicket => "NO_SUCH_TICKET",
            Self::TooManyTickets => "TOO_MANY_TICKETS",
            Self::Disconnected => "DISCONNECTED",
            Self::RpcTimeout => "RPC_TIMEOUT",
            Self::DoubleResolve => "DOUBLE_RESOLVE",
            Self::ActiveRental => "ACTIVE_RENTAL",
            Self::InactiveRental => "INACTIVE_RENTAL",
            Self::CurrentlyRented => "CURRENTLY_RENTED",
            Self::ReservationExists => "RESERVATION_EXISTS",
            Self::InsufficientSupply => "INSUFFICIENT_SUPPLY",
            Self::OutsideWindow => "OUTSIDE_WINDOW",
            Self::NoBikes => "NO_BIKES",
            Self::WrongPickup => "WRONG_PICKUP",
            Self::UnknownEvent => "UNKNOWN_EVENT",
            Self::HandlerSignatureMismatch => "HANDLER_SIGNATURE_MISMATCH",
            Self::UnknownListener => "UNKNOWN_LISTENER",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for BikeshareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for BikeshareError {}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
