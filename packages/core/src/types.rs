//! Shared domain types for ride coordination.

#![allow(dead_code)]

use std::fmt;

use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};

/// Event kinds used by the ride protocol. Values are arbitrary but fixed and
/// disjoint; relays treat kinds >= 30000 as "replaceable" per `#d` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Offer,
    Acceptance,
    Confirmation,
    DriverState,
    RiderState,
    Chat,
    Cancellation,
    Deletion,
    Availability,
    Config,
    Profile,
    RideHistoryBackup,
}

impl Kind {
    pub fn as_u32(&self) -> u32 {
        match self {
            Kind::Offer => 30101,
            Kind::Acceptance => 30102,
            Kind::Confirmation => 30103,
            Kind::DriverState => 30104,
            Kind::RiderState => 30105,
            Kind::Chat => 30106,
            Kind::Cancellation => 30107,
            Kind::Deletion => 5,
            Kind::Availability => 30108,
            Kind::Config => 30109,
            Kind::Profile => 0,
            Kind::RideHistoryBackup => 30110,
        }
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            30101 => Kind::Offer,
            30102 => Kind::Acceptance,
            30103 => Kind::Confirmation,
            30104 => Kind::DriverState,
            30105 => Kind::RiderState,
            30106 => Kind::Chat,
            30107 => Kind::Cancellation,
            5 => Kind::Deletion,
            30108 => Kind::Availability,
            30109 => Kind::Config,
            0 => Kind::Profile,
            30110 => Kind::RideHistoryBackup,
            _ => return None,
        })
    }

    /// Replaceable kinds keep only the newest event per (pubkey, kind, `#d` tag).
    pub fn is_replaceable(&self) -> bool {
        matches!(
            self,
            Kind::DriverState
                | Kind::RiderState
                | Kind::Availability
                | Kind::RideHistoryBackup
                | Kind::Profile
        )
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// A 32-byte hex-displayed identifier (event id, pubkey, payment hash, preimage).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id32(pub [u8; 32]);

impl Id32 {
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))?;
        if bytes.len() != 32 {
            return Err(eyre!("Id32 must be 32 bytes, got {}", bytes.len()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Id32(out))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Id32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id32({})", self.to_hex())
    }
}

impl fmt::Display for Id32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Driver-authoritative ride phase, carried in `DRIVER_STATE.currentStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RidePhase {
    EnRoutePickup,
    Arrived,
    InProgress,
    Completed,
    Cancelled,
}

impl RidePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RidePhase::EnRoutePickup => "en_route_pickup",
            RidePhase::Arrived => "arrived",
            RidePhase::InProgress => "in_progress",
            RidePhase::Completed => "completed",
            RidePhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RidePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rider-side UI stage. Anything past `DriverAccepted` is derived from the
/// latest observed `RidePhase`, not independently decided (the AtoB pattern).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiderStage {
    Idle,
    Broadcasting,
    WaitingForAcceptance,
    DriverAccepted,
    RideConfirmed,
    DriverArrived,
    InProgress,
    Completed,
}

/// Driver-side authoritative stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverStage {
    Offline,
    RoadflareOnly,
    Available,
    RideAccepted,
    EnRouteToPickup,
    ArrivedAtPickup,
    InRide,
    RideCompleted,
}

impl From<RidePhase> for DriverStage {
    fn from(p: RidePhase) -> Self {
        match p {
            RidePhase::EnRoutePickup => DriverStage::EnRouteToPickup,
            RidePhase::Arrived => DriverStage::ArrivedAtPickup,
            RidePhase::InProgress => DriverStage::InRide,
            RidePhase::Completed => DriverStage::RideCompleted,
            RidePhase::Cancelled => DriverStage::Available,
        }
    }
}

/// How a ride will ultimately settle. Computed once at confirm time from the
/// rider's and driver's advertised mint URL and payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentPath {
    SameMint,
    CrossMint,
    FiatCash,
    NoPayment,
}

/// How an offer was addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferMode {
    Direct,
    Broadcast,
    Roadflare,
}

/// Accepted payment methods a peer may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Ecash,
    FiatCash,
}

/// Reveal target for precise coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationRevealKind {
    Pickup,
    Destination,
}

pub const MAX_PIN_ATTEMPTS: u8 = 3;
pub const DIRECT_OFFER_TIMEOUT_SECS: u64 = 15;
pub const ROADFLARE_OFFER_TIMEOUT_SECS: u64 = 120;
pub const BROADCAST_OFFER_TIMEOUT_SECS: u64 = 120;
pub const AVAILABILITY_HEARTBEAT_SECS: u64 = 300;
pub const AVAILABILITY_MOVE_THRESHOLD_METERS: f64 = 1000.0;
pub const AVAILABILITY_MIN_REPUBLISH_SECS: u64 = 30;
pub const OFFER_MAX_AGE_SECS: i64 = 120;
pub const DRIVER_STALENESS_SECS: i64 = 600;
pub const PIN_VERIFY_TIMEOUT_SECS: u64 = 30;
pub const ESCROW_EXPIRY_SECS: i64 = 900;
pub const BRIDGE_POLL_INTERVAL_SECS: u64 = 30;
pub const BRIDGE_POLL_MAX_SECS: u64 = 600;
pub const SESSION_SNAPSHOT_MAX_AGE_SECS: i64 = 2 * 3600;
pub const DEFAULT_FARE_USD_PER_MILE: f64 = 1.85;
pub const DEFAULT_MINIMUM_FARE_USD: f64 = 5.00;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_u32() {
        for k in [
            Kind::Offer,
            Kind::Acceptance,
            Kind::Confirmation,
            Kind::DriverState,
            Kind::RiderState,
            Kind::Availability,
            Kind::Cancellation,
        ] {
            assert_eq!(Kind::from_u32(k.as_u32()), Some(k));
        }
    }

    #[test]
    fn replaceable_kinds_are_marked() {
        assert!(Kind::DriverState.is_replaceable());
        assert!(Kind::Availability.is_replaceable());
        assert!(!Kind::Offer.is_replaceable());
        assert!(!Kind::Cancellation.is_replaceable());
    }

    #[test]
    fn id32_hex_roundtrip() {
        let id = Id32([7u8; 32]);
        let hex = id.to_hex();
        assert_eq!(Id32::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn id32_rejects_wrong_length() {
        assert!(Id32::from_hex("deadbeef").is_err());
    }

    #[test]
    fn ride_phase_maps_to_driver_stage() {
        assert_eq!(DriverStage::from(RidePhase::Arrived), DriverStage::ArrivedAtPickup);
        assert_eq!(DriverStage::from(RidePhase::InProgress), DriverStage::InRide);
    }
}
