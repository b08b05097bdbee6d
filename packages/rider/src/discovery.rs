//! Driver discovery: geohash-prefix matching against published
//! `AVAILABILITY` events, staleness filtering, and payment-method
//! compatibility.

use wayfare_core::types::{PaymentMethod, DRIVER_STALENESS_SECS};

#[derive(Debug, Clone)]
pub struct DriverAvailability {
    pub driver_pubkey: String,
    pub geohash: String,
    pub accepted_payment_methods: Vec<PaymentMethod>,
    pub published_at: i64,
}

/// A driver matches a rider's discovery request if their geohash shares the
/// rider's precision-truncated prefix, their availability event is not
/// stale, and they accept at least one payment method the rider offers.
pub fn matches(
    driver: &DriverAvailability,
    rider_geohash_prefix: &str,
    rider_payment_methods: &[PaymentMethod],
    now_unix: i64,
) -> bool {
    if now_unix - driver.published_at > DRIVER_STALENESS_SECS {
        return false;
    }
    if !driver.geohash.starts_with(rider_geohash_prefix) {
        return false;
    }
    driver
        .accepted_payment_methods
        .iter()
        .any(|m| rider_payment_methods.contains(m))
}

pub fn find_matching<'a>(
    drivers: &'a [DriverAvailability],
    rider_geohash_prefix: &str,
    rider_payment_methods: &[PaymentMethod],
    now_unix: i64,
) -> Vec<&'a DriverAvailability> {
    drivers
        .iter()
        .filter(|d| matches(d, rider_geohash_prefix, rider_payment_methods, now_unix))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(geohash: &str, published_at: i64, methods: Vec<PaymentMethod>) -> DriverAvailability {
        DriverAvailability {
            driver_pubkey: "driver".to_string(),
            geohash: geohash.to_string(),
            accepted_payment_methods: methods,
            published_at,
        }
    }

    #[test]
    fn matches_same_prefix_fresh_and_compatible() {
        let d = driver("9q8yy", 1000, vec![PaymentMethod::Ecash]);
        assert!(matches(&d, "9q8yy", &[PaymentMethod::Ecash], 1100));
    }

    #[test]
    fn rejects_stale_availability() {
        let d = driver("9q8yy", 0, vec![PaymentMethod::Ecash]);
        assert!(!matches(&d, "9q8yy", &[PaymentMethod::Ecash], DRIVER_STALENESS_SECS + 1));
    }

    #[test]
    fn rejects_mismatched_geohash_prefix() {
        let d = driver("9q8zz", 1000, vec![PaymentMethod::Ecash]);
        assert!(!matches(&d, "9q8yy", &[PaymentMethod::Ecash], 1100));
    }

    #[test]
    fn rejects_incompatible_payment_methods() {
        let d = driver("9q8yy", 1000, vec![PaymentMethod::FiatCash]);
        assert!(!matches(&d, "9q8yy", &[PaymentMethod::Ecash], 1100));
    }

    #[test]
    fn find_matching_filters_a_list() {
        let drivers = vec![
            driver("9q8yy", 1000, vec![PaymentMethod::Ecash]),
            driver("9q8zz", 1000, vec![PaymentMethod::Ecash]),
        ];
        let found = find_matching(&drivers, "9q8yy", &[PaymentMethod::Ecash], 1100);
        assert_eq!(found.len(), 1);
    }
}
