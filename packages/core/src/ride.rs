//! Pure ride state machine. No I/O: callers apply side effects only after
//! seeing [`TransitionResult::Valid`].

use serde::{Deserialize, Serialize};

use crate::types::{Id32, PaymentPath, RidePhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RideState {
    Created,
    Accepted,
    Confirmed,
    EnRoute,
    Arrived,
    InProgress,
    Completed,
    Cancelled,
}

impl RideState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RideState::Completed | RideState::Cancelled)
    }
}

/// The subset of ride context the transition function needs to read or
/// update. The coordinators own a richer context; this is the sliver that
/// participates in transition validity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideContext {
    pub confirmation_id: Option<Id32>,
    pub driver_pubkey: Option<Id32>,
    pub payment_hash: Option<Id32>,
    pub payment_path: Option<PaymentPath>,
    pub pin_attempts: u8,
    pub final_fare_sats: Option<u64>,
}

impl Default for RideContext {
    fn default() -> Self {
        Self {
            confirmation_id: None,
            driver_pubkey: None,
            payment_hash: None,
            payment_path: None,
            pin_attempts: 0,
            final_fare_sats: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RideEvent {
    Create,
    Accept {
        driver_pubkey: Id32,
    },
    Confirm {
        payment_hash: Id32,
        payment_path: PaymentPath,
    },
    StatusUpdate(RidePhase),
    PinSubmit,
    PinVerify {
        verified: bool,
    },
    RevealLocation,
    ShareBridgeInvoice,
    BridgeComplete,
    Complete {
        final_fare_sats: Option<u64>,
    },
    Cancel {
        by_pubkey: Id32,
        reason: String,
    },
    Expire,
}

#[derive(Debug, Clone)]
pub enum TransitionResult {
    Valid {
        new_state: RideState,
        new_context: RideContext,
    },
    Invalid {
        reason: String,
    },
}

fn invalid(reason: impl Into<String>) -> TransitionResult {
    TransitionResult::Invalid {
        reason: reason.into(),
    }
}

fn valid(new_state: RideState, new_context: RideContext) -> TransitionResult {
    TransitionResult::Valid {
        new_state,
        new_context,
    }
}

/// The one entry point every coordinator calls before mutating ride state.
pub fn transition(state: RideState, context: &RideContext, event: &RideEvent) -> TransitionResult {
    if state.is_terminal() {
        return invalid(format!("ride is already terminal ({state:?})"));
    }

    match (state, event) {
        (_, RideEvent::Cancel { .. }) => {
            let mut ctx = context.clone();
            ctx.confirmation_id = None;
            valid(RideState::Cancelled, ctx)
        }
        (_, RideEvent::Expire) => valid(RideState::Cancelled, context.clone()),

        (RideState::Created, RideEvent::Accept { driver_pubkey }) => {
            let mut ctx = context.clone();
            ctx.driver_pubkey = Some(*driver_pubkey);
            valid(RideState::Accepted, ctx)
        }

        (
            RideState::Accepted,
            RideEvent::Confirm {
                payment_hash,
                payment_path,
            },
        ) => {
            let mut ctx = context.clone();
            ctx.payment_hash = Some(*payment_hash);
            ctx.payment_path = Some(*payment_path);
            valid(RideState::Confirmed, ctx)
        }

        (RideState::Confirmed, RideEvent::StatusUpdate(RidePhase::EnRoutePickup)) => {
            valid(RideState::EnRoute, context.clone())
        }

        (RideState::EnRoute, RideEvent::StatusUpdate(RidePhase::Arrived)) => {
            valid(RideState::Arrived, context.clone())
        }

        (RideState::Arrived, RideEvent::PinSubmit) => valid(RideState::Arrived, context.clone()),

        (RideState::Arrived, RideEvent::PinVerify { verified }) => {
            let mut ctx = context.clone();
            if *verified {
                valid(RideState::Arrived, ctx)
            } else {
                ctx.pin_attempts += 1;
                valid(RideState::Arrived, ctx)
            }
        }

        (RideState::Arrived, RideEvent::StatusUpdate(RidePhase::InProgress)) => {
            valid(RideState::InProgress, context.clone())
        }

        (RideState::Arrived, RideEvent::RevealLocation)
        | (RideState::EnRoute, RideEvent::RevealLocation)
        | (RideState::Confirmed, RideEvent::RevealLocation) => valid(state, context.clone()),

        (RideState::Arrived, RideEvent::ShareBridgeInvoice) => valid(state, context.clone()),

        (RideState::InProgress, RideEvent::BridgeComplete) => valid(state, context.clone()),

        (RideState::InProgress, RideEvent::Complete { final_fare_sats }) => {
            let mut ctx = context.clone();
            ctx.final_fare_sats = *final_fare_sats;
            valid(RideState::Completed, ctx)
        }

        (from, event) => invalid(format!("{event:?} is not valid from {from:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> Id32 {
        Id32([byte; 32])
    }

    #[test]
    fn happy_path_walks_every_state() {
        let ctx = RideContext::default();
        let r = transition(RideState::Created, &ctx, &RideEvent::Accept { driver_pubkey: id(1) });
        let (state, ctx) = match r {
            TransitionResult::Valid { new_state, new_context } => (new_state, new_context),
            TransitionResult::Invalid { reason } => panic!("{reason}"),
        };
        assert_eq!(state, RideState::Accepted);

        let r = transition(
            state,
            &ctx,
            &RideEvent::Confirm {
                payment_hash: id(2),
                payment_path: PaymentPath::SameMint,
            },
        );
        let (state, ctx) = match r {
            TransitionResult::Valid { new_state, new_context } => (new_state, new_context),
            TransitionResult::Invalid { reason } => panic!("{reason}"),
        };
        assert_eq!(state, RideState::Confirmed);

        let r = transition(state, &ctx, &RideEvent::StatusUpdate(RidePhase::EnRoutePickup));
        let (state, ctx) = match r {
            TransitionResult::Valid { new_state, new_context } => (new_state, new_context),
            _ => panic!("expected valid"),
        };
        assert_eq!(state, RideState::EnRoute);

        let r = transition(state, &ctx, &RideEvent::StatusUpdate(RidePhase::Arrived));
        let (state, ctx) = match r {
            TransitionResult::Valid { new_state, new_context } => (new_state, new_context),
            _ => panic!("expected valid"),
        };
        assert_eq!(state, RideState::Arrived);

        let r = transition(state, &ctx, &RideEvent::StatusUpdate(RidePhase::InProgress));
        let (state, ctx) = match r {
            TransitionResult::Valid { new_state, new_context } => (new_state, new_context),
            _ => panic!("expected valid"),
        };
        assert_eq!(state, RideState::InProgress);

        let r = transition(state, &ctx, &RideEvent::Complete { final_fare_sats: Some(1200) });
        match r {
            TransitionResult::Valid { new_state, new_context } => {
                assert_eq!(new_state, RideState::Completed);
                assert_eq!(new_context.final_fare_sats, Some(1200));
            }
            TransitionResult::Invalid { reason } => panic!("{reason}"),
        }
    }

    #[test]
    fn skipping_accept_is_rejected() {
        let ctx = RideContext::default();
        let r = transition(
            RideState::Created,
            &ctx,
            &RideEvent::Confirm {
                payment_hash: id(2),
                payment_path: PaymentPath::SameMint,
            },
        );
        assert!(matches!(r, TransitionResult::Invalid { .. }));
    }

    #[test]
    fn terminal_states_reject_every_event() {
        let ctx = RideContext::default();
        let r = transition(RideState::Completed, &ctx, &RideEvent::PinSubmit);
        assert!(matches!(r, TransitionResult::Invalid { .. }));
    }

    #[test]
    fn cancel_is_allowed_from_any_non_terminal_state() {
        let ctx = RideContext::default();
        for state in [
            RideState::Created,
            RideState::Accepted,
            RideState::Confirmed,
            RideState::EnRoute,
            RideState::Arrived,
            RideState::InProgress,
        ] {
            let r = transition(
                state,
                &ctx,
                &RideEvent::Cancel {
                    by_pubkey: id(9),
                    reason: "rider cancelled".into(),
                },
            );
            assert!(matches!(r, TransitionResult::Valid { new_state: RideState::Cancelled, .. }));
        }
    }

    #[test]
    fn wrong_pin_increments_attempt_counter_without_changing_state() {
        let ctx = RideContext::default();
        let r = transition(RideState::Arrived, &ctx, &RideEvent::PinVerify { verified: false });
        match r {
            TransitionResult::Valid { new_state, new_context } => {
                assert_eq!(new_state, RideState::Arrived);
                assert_eq!(new_context.pin_attempts, 1);
            }
            TransitionResult::Invalid { reason } => panic!("{reason}"),
        }
    }
}
