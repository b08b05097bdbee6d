//! Prometheus metrics for the rider peer process.
//!
//! Exposed on `/metrics` alongside `/healthz`/`/readyz` by [`crate::server`].

#![allow(dead_code)]

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec};

lazy_static! {
    pub static ref UP: Gauge = register_gauge!("rider_up", "Whether the rider process is up").unwrap();

    pub static ref OFFERS_SENT: CounterVec = register_counter_vec!(
        "rider_offers_sent_total",
        "Total ride offers emitted, by mode",
        &["mode"]
    )
    .unwrap();

    pub static ref RIDES_COMPLETED: CounterVec = register_counter_vec!(
        "rider_rides_completed_total",
        "Total rides that reached Completed",
        &["payment_path"]
    )
    .unwrap();

    pub static ref RIDES_CANCELLED: CounterVec = register_counter_vec!(
        "rider_rides_cancelled_total",
        "Total rides cancelled, by who cancelled",
        &["by"]
    )
    .unwrap();

    pub static ref PIN_ATTEMPTS: CounterVec = register_counter_vec!(
        "rider_pin_attempts_total",
        "PIN verification attempts, by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref SECURITY_ALERTS: CounterVec =
        register_counter_vec!("rider_security_alerts_total", "Security alerts raised, by reason", &["reason"]).unwrap();

    pub static ref ACTIVE_RIDE: GaugeVec =
        register_gauge_vec!("rider_active_ride", "1 if a ride is currently active", &["state"]).unwrap();

    pub static ref DRIVER_BALANCE_SATS: GaugeVec =
        register_gauge_vec!("rider_wallet_balance_sats", "Current wallet balance per mint", &["mint"]).unwrap();
}

pub fn record_offer_sent(mode: &str) {
    OFFERS_SENT.with_label_values(&[mode]).inc();
}

pub fn record_ride_completed(payment_path: &str) {
    RIDES_COMPLETED.with_label_values(&[payment_path]).inc();
}

pub fn record_ride_cancelled(by: &str) {
    RIDES_CANCELLED.with_label_values(&[by]).inc();
}

pub fn record_pin_attempt(outcome: &str) {
    PIN_ATTEMPTS.with_label_values(&[outcome]).inc();
}

pub fn record_security_alert(reason: &str) {
    SECURITY_ALERTS.with_label_values(&[reason]).inc();
}

pub fn set_wallet_balance(mint: &str, sats: u64) {
    DRIVER_BALANCE_SATS.with_label_values(&[mint]).set(sats as f64);
}
