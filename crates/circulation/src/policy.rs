//! Circulation policy knobs loaded from environment variables.

use chrono::Duration;
use common::Money;

/// Tunable circulation rules with library-standard defaults.
///
/// Reads from environment variables:
/// - `LC_DAILY_FINE_CENTS` — overdue fine accrued per day (default: `50`)
/// - `LC_LOAN_PERIOD_DAYS` — default loan length (default: `14`)
/// - `LC_RENEWAL_HORIZON_DAYS` — furthest a renewal may push the due date (default: `30`)
/// - `LC_MAX_ACTIVE_LOANS` — open loans allowed per member (default: `5`)
/// - `LC_MAX_ACTIVE_RESERVATIONS` — active reservations allowed per member (default: `3`)
/// - `LC_PICKUP_WINDOW_HOURS` — how long a fulfilled reservation is held (default: `72`)
/// - `LC_DAMAGE_FEE_CENTS` — flat fee for a copy returned damaged (default: `1000`)
#[derive(Debug, Clone)]
pub struct CirculationPolicy {
    pub daily_fine: Money,
    pub loan_period_days: i64,
    pub renewal_horizon_days: i64,
    pub max_open_loans: usize,
    pub max_active_reservations: usize,
    pub pickup_window_hours: i64,
    pub damage_fee: Money,
}

impl CirculationPolicy {
    /// Loads policy from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            daily_fine: env_i64("LC_DAILY_FINE_CENTS")
                .map(Money::from_cents)
                .unwrap_or(defaults.daily_fine),
            loan_period_days: env_i64("LC_LOAN_PERIOD_DAYS").unwrap_or(defaults.loan_period_days),
            renewal_horizon_days: env_i64("LC_RENEWAL_HORIZON_DAYS")
                .unwrap_or(defaults.renewal_horizon_days),
            max_open_loans: env_i64("LC_MAX_ACTIVE_LOANS")
                .map(|n| n as usize)
                .unwrap_or(defaults.max_open_loans),
            max_active_reservations: env_i64("LC_MAX_ACTIVE_RESERVATIONS")
                .map(|n| n as usize)
                .unwrap_or(defaults.max_active_reservations),
            pickup_window_hours: env_i64("LC_PICKUP_WINDOW_HOURS")
                .unwrap_or(defaults.pickup_window_hours),
            damage_fee: env_i64("LC_DAMAGE_FEE_CENTS")
                .map(Money::from_cents)
                .unwrap_or(defaults.damage_fee),
        }
    }

    /// Default loan length as a duration.
    pub fn loan_period(&self) -> Duration {
        Duration::days(self.loan_period_days)
    }

    /// Furthest point from "now" a renewal may set the due date.
    pub fn renewal_horizon(&self) -> Duration {
        Duration::days(self.renewal_horizon_days)
    }

    /// How long a fulfilled reservation is held before it expires.
    pub fn pickup_window(&self) -> Duration {
        Duration::hours(self.pickup_window_hours)
    }
}

impl Default for CirculationPolicy {
    fn default() -> Self {
        Self {
            daily_fine: Money::from_cents(50),
            loan_period_days: 14,
            renewal_horizon_days: 30,
            max_open_loans: 5,
            max_active_reservations: 3,
            pickup_window_hours: 72,
            damage_fee: Money::from_cents(1000),
        }
    }
}

fn env_i64(key: &str) -> Option<i64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
