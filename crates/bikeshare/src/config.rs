// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the fleet coordinator.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "bikeshare", about = "Bike-share fleet coordinator")]
pub struct BikeshareConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "BIKESHARE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9900, env = "BIKESHARE_PORT")]
    pub port: u16,

    /// Max open connection tickets per remote address.
    #[arg(long, default_value_t = 3, env = "BIKESHARE_MAX_TICKETS_PER_REMOTE")]
    pub max_tickets_per_remote: usize,

    /// Connection ticket expiry, in seconds.
    #[arg(long, default_value_t = 10, env = "BIKESHARE_TICKET_EXPIRY_SECS")]
    pub ticket_expiry_secs: u64,

    /// Ticket sweep interval, in milliseconds.
    #[arg(long, default_value_t = 5000, env = "BIKESHARE_TICKET_SWEEP_MS")]
    pub ticket_sweep_ms: u64,

    /// Timeout for a bike RPC call, in milliseconds.
    #[arg(long, default_value_t = 5000, env = "BIKESHARE_RPC_TIMEOUT_MS")]
    pub rpc_timeout_ms: u64,

    /// Minimum lead time for a reservation not to require present supply, in minutes.
    #[arg(long, default_value_t = 180, env = "BIKESHARE_RESERVATION_MIN_LEAD_MIN")]
    pub reservation_min_lead_min: i64,

    /// Width of the claim window around a reservation's `reserved_for` time, in minutes.
    #[arg(long, default_value_t = 60, env = "BIKESHARE_RESERVATION_WINDOW_MIN")]
    pub reservation_window_min: i64,

    /// Reservation expiry sweep interval, in milliseconds.
    #[arg(long, default_value_t = 60000, env = "BIKESHARE_RESERVATION_SWEEP_MS")]
    pub reservation_sweep_ms: u64,

    /// Reservation sourcer loop period, in milliseconds.
    #[arg(long, default_value_t = 60000, env = "BIKESHARE_SOURCER_PERIOD_MS")]
    pub sourcer_period_ms: u64,
}

impl BikeshareConfig {
    pub fn ticket_expiry(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ticket_expiry_secs)
    }

    pub fn ticket_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.ticket_sweep_ms)
    }

    pub fn rpc_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn reservation_min_lead(&self) -> std::time::Duration {
        std::time::Duration::from_secs((self.reservation_min_lead_min.max(0) as u64) * 60)
    }

    pub fn reservation_window(&self) -> std::time::Duration {
        std::time::Duration::from_secs((self.reservation_window_min.max(0) as u64) * 60)
    }

    pub fn reservation_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reservation_sweep_ms)
    }

    pub fn sourcer_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sourcer_period_ms)
    }
}
