//! Prometheus metrics for the driver peer.

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec};

lazy_static! {
    pub static ref UP: Gauge = register_gauge!("wayfare_driver_up", "Process liveness gauge, always 1 while running")
        .expect("metric registration must not be called twice");

    pub static ref AVAILABILITY_PUBLISHED: CounterVec = register_counter_vec!(
        "wayfare_driver_availability_published_total",
        "AVAILABILITY events published, broken down by reason the republish fired",
        &["reason"]
    )
    .expect("metric registration must not be called twice");

    pub static ref OFFERS_RECEIVED: CounterVec = register_counter_vec!(
        "wayfare_driver_offers_received_total",
        "OFFER events observed, broken down by disposition",
        &["disposition"]
    )
    .expect("metric registration must not be called twice");

    pub static ref RIDES_COMPLETED: CounterVec = register_counter_vec!(
        "wayfare_driver_rides_completed_total",
        "Rides completed, broken down by payment path",
        &["payment_path"]
    )
    .expect("metric registration must not be called twice");

    pub static ref RIDES_CANCELLED: CounterVec = register_counter_vec!(
        "wayfare_driver_rides_cancelled_total",
        "Rides cancelled, broken down by who cancelled",
        &["cancelled_by"]
    )
    .expect("metric registration must not be called twice");

    pub static ref PIN_VERIFICATIONS: CounterVec = register_counter_vec!(
        "wayfare_driver_pin_verifications_total",
        "PIN verification attempts seen at the driver, broken down by outcome",
        &["outcome"]
    )
    .expect("metric registration must not be called twice");

    pub static ref CLAIM_ATTEMPTS: CounterVec = register_counter_vec!(
        "wayfare_driver_claim_attempts_total",
        "HTLC claim attempts, broken down by outcome",
        &["outcome"]
    )
    .expect("metric registration must not be called twice");

    pub static ref ACTIVE_RIDE: GaugeVec = register_gauge_vec!(
        "wayfare_driver_active_ride",
        "1 if the driver currently has a non-terminal ride, 0 otherwise",
        &["confirmation_id"]
    )
    .expect("metric registration must not be called twice");

    pub static ref WALLET_BALANCE_SATS: GaugeVec = register_gauge_vec!(
        "wayfare_driver_wallet_balance_sats",
        "Current wallet balance in satoshis, broken down by mint url",
        &["mint_url"]
    )
    .expect("metric registration must not be called twice");
}

pub fn record_availability_published(reason: &str) {
    AVAILABILITY_PUBLISHED.with_label_values(&[reason]).inc();
}

pub fn record_offer_received(disposition: &str) {
    OFFERS_RECEIVED.with_label_values(&[disposition]).inc();
}

pub fn record_ride_completed(payment_path: &str) {
    RIDES_COMPLETED.with_label_values(&[payment_path]).inc();
}

pub fn record_ride_cancelled(cancelled_by: &str) {
    RIDES_CANCELLED.with_label_values(&[cancelled_by]).inc();
}

pub fn record_pin_verification(outcome: &str) {
    PIN_VERIFICATIONS.with_label_values(&[outcome]).inc();
}

pub fn record_claim_attempt(outcome: &str) {
    CLAIM_ATTEMPTS.with_label_values(&[outcome]).inc();
}

pub fn set_wallet_balance(mint_url: &str, sats: u64) {
    WALLET_BALANCE_SATS.with_label_values(&[mint_url]).set(sats as f64);
}
