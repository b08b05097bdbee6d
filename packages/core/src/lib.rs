//! Wayfare Core: event codec, ride state machine, subscription registry, and
//! local persistence shared by the rider and driver peer processes.

pub mod bounded_cache;
pub mod config_resolver;
pub mod crypto;
pub mod error;
pub mod event;
pub mod hash;
pub mod redact;
pub mod ride;
pub mod storage;
pub mod subscription;
pub mod types;

pub use error::{PaymentError, PeerError, Result};
pub use event::{pubkey_of, sign, Event, EventDraft};
pub use ride::{transition, RideContext, RideEvent, RideState, TransitionResult};
pub use types::{
    DriverStage, Id32, Kind, OfferMode, PaymentMethod, PaymentPath, RidePhase, RiderStage,
};
