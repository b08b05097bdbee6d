//! Resolves admin-signed fare/mint recommendations from a `CONFIG` event,
//! falling back to built-in defaults when none can be fetched.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{
    Id32, DEFAULT_FARE_USD_PER_MILE, DEFAULT_MINIMUM_FARE_USD,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideConfig {
    pub fare_rate_usd_per_mile: f64,
    pub minimum_fare_usd: f64,
    pub roadflare_fare_rate_usd_per_mile: f64,
    pub roadflare_minimum_fare_usd: f64,
    pub recommended_mints: Vec<String>,
}

impl Default for RideConfig {
    fn default() -> Self {
        Self {
            fare_rate_usd_per_mile: DEFAULT_FARE_USD_PER_MILE,
            minimum_fare_usd: DEFAULT_MINIMUM_FARE_USD,
            roadflare_fare_rate_usd_per_mile: DEFAULT_FARE_USD_PER_MILE,
            roadflare_minimum_fare_usd: DEFAULT_MINIMUM_FARE_USD,
            recommended_mints: Vec::new(),
        }
    }
}

/// Fetches the latest `CONFIG` event authored by `admin_pubkey` and parses
/// its content as [`RideConfig`]. `fetch_latest` is supplied by the caller
/// (typically backed by the relay client) so this module stays free of any
/// transport dependency.
pub struct ConfigResolver<F> {
    admin_pubkey: Id32,
    fetch_latest: F,
    cached: RideConfig,
}

impl<F> ConfigResolver<F>
where
    F: Fn(Id32) -> eyre::Result<Option<String>>,
{
    pub fn new(admin_pubkey: Id32, fetch_latest: F) -> Self {
        Self {
            admin_pubkey,
            fetch_latest,
            cached: RideConfig::default(),
        }
    }

    /// Refresh the cache from the relay network. On any failure the
    /// previously cached (or default) configuration is kept and the failure
    /// is logged, never propagated: fare config must never block a ride.
    pub fn refresh(&mut self) {
        match (self.fetch_latest)(self.admin_pubkey) {
            Ok(Some(content)) => match serde_json::from_str::<RideConfig>(&content) {
                Ok(cfg) => self.cached = cfg,
                Err(e) => warn!(error = %e, "CONFIG event content did not parse, keeping cached config"),
            },
            Ok(None) => {
                warn!("no CONFIG event found for admin pubkey, keeping cached config");
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch CONFIG event, keeping cached config");
            }
        }
    }

    pub fn current(&self) -> &RideConfig {
        &self.cached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_fallback() {
        let cfg = RideConfig::default();
        assert_eq!(cfg.fare_rate_usd_per_mile, 1.85);
        assert_eq!(cfg.minimum_fare_usd, 5.00);
    }

    #[test]
    fn refresh_keeps_default_on_fetch_error() {
        let mut resolver = ConfigResolver::new(Id32([0u8; 32]), |_| Err(eyre::eyre!("no relay")));
        resolver.refresh();
        assert_eq!(resolver.current().fare_rate_usd_per_mile, DEFAULT_FARE_USD_PER_MILE);
    }

    #[test]
    fn refresh_applies_well_formed_config() {
        let mut resolver = ConfigResolver::new(Id32([0u8; 32]), |_| {
            Ok(Some(
                r#"{"fare_rate_usd_per_mile":2.25,"minimum_fare_usd":6.00,"roadflare_fare_rate_usd_per_mile":2.25,"roadflare_minimum_fare_usd":6.00,"recommended_mints":["https://mint.example"]}"#
                    .to_string(),
            ))
        });
        resolver.refresh();
        assert_eq!(resolver.current().fare_rate_usd_per_mile, 2.25);
        assert_eq!(resolver.current().recommended_mints, vec!["https://mint.example"]);
    }

    #[test]
    fn refresh_keeps_previous_on_malformed_content() {
        let mut resolver = ConfigResolver::new(Id32([0u8; 32]), |_| Ok(Some("not json".to_string())));
        resolver.refresh();
        assert_eq!(resolver.current().fare_rate_usd_per_mile, DEFAULT_FARE_USD_PER_MILE);
    }
}
