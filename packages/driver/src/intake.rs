//! Offer intake: filters incoming `OFFER` events before they reach the
//! coordinator. An offer is accepted for consideration only if it is fresh,
//! addressed to this driver (directly or via broadcast/RoadFlare), and not
//! already claimed by another driver.

use wayfare_core::types::{OfferMode, OFFER_MAX_AGE_SECS};

#[derive(Debug, Clone)]
pub struct IncomingOffer {
    pub rider_pubkey: String,
    pub mode: OfferMode,
    pub target_driver_pubkey: Option<String>,
    pub created_at_unix: i64,
    pub already_taken: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeDisposition {
    Consider,
    Stale,
    NotAddressedToMe,
    AlreadyTaken,
}

pub fn disposition_label(d: IntakeDisposition) -> &'static str {
    match d {
        IntakeDisposition::Consider => "consider",
        IntakeDisposition::Stale => "stale",
        IntakeDisposition::NotAddressedToMe => "not_addressed_to_me",
        IntakeDisposition::AlreadyTaken => "already_taken",
    }
}

pub fn evaluate(offer: &IncomingOffer, my_pubkey: &str, now_unix: i64, roadflare_only: bool) -> IntakeDisposition {
    if now_unix - offer.created_at_unix > OFFER_MAX_AGE_SECS {
        return IntakeDisposition::Stale;
    }
    if offer.already_taken {
        return IntakeDisposition::AlreadyTaken;
    }
    match offer.mode {
        OfferMode::Direct => {
            if offer.target_driver_pubkey.as_deref() != Some(my_pubkey) {
                return IntakeDisposition::NotAddressedToMe;
            }
        }
        OfferMode::Broadcast => {
            if roadflare_only {
                return IntakeDisposition::NotAddressedToMe;
            }
        }
        OfferMode::Roadflare => {}
    }
    IntakeDisposition::Consider
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(mode: OfferMode, target: Option<&str>, created_at: i64, taken: bool) -> IncomingOffer {
        IncomingOffer {
            rider_pubkey: "rider".to_string(),
            mode,
            target_driver_pubkey: target.map(|s| s.to_string()),
            created_at_unix: created_at,
            already_taken: taken,
        }
    }

    #[test]
    fn stale_offer_is_rejected() {
        let o = offer(OfferMode::Broadcast, None, 0, false);
        assert_eq!(evaluate(&o, "me", OFFER_MAX_AGE_SECS + 1, false), IntakeDisposition::Stale);
    }

    #[test]
    fn direct_offer_to_someone_else_is_rejected() {
        let o = offer(OfferMode::Direct, Some("other"), 1000, false);
        assert_eq!(evaluate(&o, "me", 1000, false), IntakeDisposition::NotAddressedToMe);
    }

    #[test]
    fn direct_offer_to_me_is_considered() {
        let o = offer(OfferMode::Direct, Some("me"), 1000, false);
        assert_eq!(evaluate(&o, "me", 1000, false), IntakeDisposition::Consider);
    }

    #[test]
    fn already_taken_offer_is_rejected() {
        let o = offer(OfferMode::Broadcast, None, 1000, true);
        assert_eq!(evaluate(&o, "me", 1000, false), IntakeDisposition::AlreadyTaken);
    }

    #[test]
    fn roadflare_only_driver_skips_broadcast_offers() {
        let o = offer(OfferMode::Broadcast, None, 1000, false);
        assert_eq!(evaluate(&o, "me", 1000, true), IntakeDisposition::NotAddressedToMe);
    }

    #[test]
    fn roadflare_only_driver_considers_roadflare_offers() {
        let o = offer(OfferMode::Roadflare, None, 1000, false);
        assert_eq!(evaluate(&o, "me", 1000, true), IntakeDisposition::Consider);
    }
}
