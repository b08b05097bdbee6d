//! Driver-side ride coordinator: the single task that owns the active
//! ride's mutable state and is the sole authority on its phase. Unlike the
//! rider, which only ever derives its UI stage from what the driver last
//! published, the driver decides every `StatusUpdate` itself and is the one
//! that claims the HTLC escrow once the ride completes.

use std::sync::Arc;

use secp256k1::SecretKey;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use wayfare_core::event::{sign, EventDraft};
use wayfare_core::ride::{transition, RideContext, RideEvent, RideState, TransitionResult};
use wayfare_core::storage::{self, ActiveRideSnapshot, NewHistoryEntry};
use wayfare_core::types::{Kind, OfferMode, PaymentMethod, RidePhase, MAX_PIN_ATTEMPTS};
use wayfare_core::{Event, Id32};
use wayfare_payment::{PaymentEngine, Proofs};
use wayfare_relay::RelayHandle;

use crate::availability::{self, LastPublished};
use crate::intake::{self, IncomingOffer, IntakeDisposition};
use crate::metrics;

/// Claim retry backoff, same shape as the payment engine's bridge-deposit
/// retry: a few quick attempts rather than one shot, since the mint may be
/// momentarily unavailable right after the rider reveals the preimage.
const CLAIM_RETRY_BACKOFFS_SECS: [u64; 4] = [0, 2, 4, 8];

pub enum Command {
    /// The driver accepted an outstanding `OFFER`.
    OfferAccepted { rider_pubkey: Id32 },
    /// The rider's signed `CONFIRMATION` arrived with the HTLC-locked fare.
    RiderConfirmed {
        payment_hash: Id32,
        payment_path: wayfare_core::PaymentPath,
        mint_url: String,
        locked_proofs: Proofs,
    },
    /// The driver advances the ride phase (en route, arrived, in progress).
    AdvanceStatus(RidePhase),
    /// The rider (or app) submitted a PIN; compared locally against the
    /// value the driver generated at pickup.
    PinSubmitted { presented_pin: String, expected_pin: String },
    /// Ride completed; `preimage` is the escrow secret revealed to the
    /// driver once the PIN check passed, used to claim the fare.
    CompleteRide { final_fare_sats: Option<u64>, preimage: Option<[u8; 32]> },
    Cancel { reason: String },
    /// A fresh GPS fix; re-published as `AVAILABILITY` only when
    /// [`availability::should_republish`] says it's due.
    UpdateLocation {
        lat: f64,
        lon: f64,
        geohash: String,
        payment_methods: Vec<PaymentMethod>,
        roadflare_only: bool,
    },
    GetState { reply: oneshot::Sender<(RideState, RideContext)> },
    Shutdown,
}

pub struct Coordinator {
    commands: mpsc::Sender<Command>,
}

impl Coordinator {
    pub fn spawn(
        db: SqlitePool,
        relay: Arc<dyn RelayHandle>,
        payment: Arc<PaymentEngine>,
        identity_secret: SecretKey,
        identity_pubkey: Id32,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run(db, relay, payment, identity_secret, identity_pubkey, tx.clone(), rx));
        Self { commands: tx }
    }

    pub async fn send(&self, cmd: Command) {
        let _ = self.commands.send(cmd).await;
    }

    pub async fn state(&self) -> Option<(RideState, RideContext)> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::GetState { reply: tx }).await.ok()?;
        rx.await.ok()
    }
}

/// Fields the driver coordinator tracks alongside the shared `RideContext`
/// that do not participate in transition validity (the mint url and the
/// proofs locked under the HTLC, needed only to claim at completion).
#[derive(Default)]
struct DriverExtra {
    mint_url: Option<String>,
    locked_proofs: Option<Proofs>,
}

async fn run(
    db: SqlitePool,
    relay: Arc<dyn RelayHandle>,
    payment: Arc<PaymentEngine>,
    identity_secret: SecretKey,
    identity_pubkey: Id32,
    self_commands: mpsc::Sender<Command>,
    mut commands: mpsc::Receiver<Command>,
) {
    let mut state = RideState::Created;
    let mut ctx = RideContext::default();
    let mut extra = DriverExtra::default();
    let mut last_published: Option<LastPublished> = None;

    if let Ok(Some(snapshot)) = storage::restore_active_ride(&db).await {
        if let (Ok(restored), Some(restored_state)) = (
            serde_json::from_str::<RideContext>(&snapshot.context_json),
            parse_ride_state(&snapshot.state),
        ) {
            ctx = restored;
            state = restored_state;
            info!(confirmation_id = %snapshot.confirmation_id, "restored active ride session");
        }
    }

    let my_pubkey_hex = identity_pubkey.to_hex();
    relay
        .subscribe(
            "driver-offers".to_string(),
            vec![serde_json::json!({ "kinds": [Kind::Offer.as_u32()] })],
            Arc::new(move |event: Event| handle_incoming_offer(&event, &my_pubkey_hex)),
        )
        .await;
    {
        let cancel_tx = self_commands.clone();
        relay
            .subscribe(
                "driver-cancellations".to_string(),
                vec![serde_json::json!({ "kinds": [Kind::Cancellation.as_u32()] })],
                Arc::new(move |event: Event| {
                    let _ = cancel_tx.try_send(Command::Cancel { reason: event.content.clone() });
                }),
            )
            .await;
    }
    {
        let preimage_tx = self_commands.clone();
        relay
            .subscribe(
                "driver-chat".to_string(),
                vec![serde_json::json!({ "kinds": [Kind::Chat.as_u32()] })],
                Arc::new(move |event: Event| {
                    if let Some(preimage) = parse_preimage_reveal(&event) {
                        let _ = preimage_tx.try_send(Command::CompleteRide {
                            final_fare_sats: None,
                            preimage: Some(preimage),
                        });
                    }
                }),
            )
            .await;
    }

    while let Some(cmd) = commands.recv().await {
        match cmd {
            Command::GetState { reply } => {
                let _ = reply.send((state, ctx.clone()));
            }
            Command::Shutdown => break,
            Command::OfferAccepted { rider_pubkey } => {
                apply(&mut state, &mut ctx, RideEvent::Accept { driver_pubkey: identity_pubkey }, &db).await;
                publish_event(
                    &relay,
                    &identity_secret,
                    identity_pubkey,
                    Kind::Acceptance,
                    vec![vec!["p".to_string(), rider_pubkey.to_hex()]],
                    String::new(),
                )
                .await;
            }
            Command::RiderConfirmed { payment_hash, payment_path, mint_url, locked_proofs } => {
                extra.mint_url = Some(mint_url);
                extra.locked_proofs = Some(locked_proofs);
                apply(&mut state, &mut ctx, RideEvent::Confirm { payment_hash, payment_path }, &db).await;
            }
            Command::AdvanceStatus(phase) => {
                apply(&mut state, &mut ctx, RideEvent::StatusUpdate(phase), &db).await;
                publish_driver_state(&relay, &identity_secret, identity_pubkey, phase.as_str(), None).await;
            }
            Command::PinSubmitted { presented_pin, expected_pin } => {
                let verified = presented_pin == expected_pin;
                apply(&mut state, &mut ctx, RideEvent::PinVerify { verified }, &db).await;
                metrics::record_pin_verification(if verified { "correct" } else { "wrong" });
                if !verified && ctx.pin_attempts >= MAX_PIN_ATTEMPTS {
                    warn!(attempts = ctx.pin_attempts, "PIN brute-force threshold reached, cancelling ride");
                    let reason = "pin brute-force threshold reached".to_string();
                    let history = history_entry(&ctx, "driver", &reason);
                    apply(
                        &mut state,
                        &mut ctx,
                        RideEvent::Cancel { by_pubkey: Id32([0u8; 32]), reason: reason.clone() },
                        &db,
                    )
                    .await;
                    publish_event(&relay, &identity_secret, identity_pubkey, Kind::Cancellation, vec![], reason).await;
                    append_history(&db, history).await;
                }
            }
            Command::CompleteRide { final_fare_sats, preimage } => {
                apply(&mut state, &mut ctx, RideEvent::Complete { final_fare_sats }, &db).await;
                if state == RideState::Completed {
                    let path_label = ctx.payment_path.map(path_label).unwrap_or("unknown");
                    metrics::record_ride_completed(path_label);
                    publish_driver_state(&relay, &identity_secret, identity_pubkey, "completed", final_fare_sats).await;
                    claim_fare(&payment, &ctx, &extra, preimage).await;
                    let history = history_entry(&ctx, "driver", "completed");
                    append_history(&db, history).await;
                }
            }
            Command::Cancel { reason } => {
                metrics::record_ride_cancelled("driver");
                let history = history_entry(&ctx, "driver", &reason);
                apply(
                    &mut state,
                    &mut ctx,
                    RideEvent::Cancel { by_pubkey: Id32([0u8; 32]), reason: reason.clone() },
                    &db,
                )
                .await;
                publish_event(&relay, &identity_secret, identity_pubkey, Kind::Cancellation, vec![], reason).await;
                append_history(&db, history).await;
            }
            Command::UpdateLocation { lat, lon, geohash, payment_methods, roadflare_only } => {
                if roadflare_only {
                    last_published = None;
                } else if let Some(reason) = availability::should_republish(last_published, lat, lon, chrono::Utc::now().timestamp()) {
                    #[derive(Serialize)]
                    struct AvailabilityContent<'a> {
                        geohash: &'a str,
                        payment_methods: &'a [PaymentMethod],
                    }
                    let content = serde_json::to_string(&AvailabilityContent {
                        geohash: &geohash,
                        payment_methods: &payment_methods,
                    })
                    .unwrap_or_default();
                    publish_event(
                        &relay,
                        &identity_secret,
                        identity_pubkey,
                        Kind::Availability,
                        vec![vec!["g".to_string(), geohash]],
                        content,
                    )
                    .await;
                    last_published = Some(LastPublished {
                        geohash_lat: lat,
                        geohash_lon: lon,
                        published_at_unix: chrono::Utc::now().timestamp(),
                    });
                    debug!(reason = availability::reason_label(reason), "published availability heartbeat");
                }
            }
        }
    }
}

/// Builds, signs, and publishes a `DRIVER_STATE` event carrying the driver's
/// authoritative phase string, replacing any previously published state
/// (the kind is replaceable, so the relay keeps only the newest per pubkey).
async fn publish_driver_state(
    relay: &Arc<dyn RelayHandle>,
    secret_key: &SecretKey,
    pubkey: Id32,
    status: &str,
    final_fare_sats: Option<u64>,
) {
    #[derive(Serialize)]
    struct DriverStateContent<'a> {
        status: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        final_fare_sats: Option<u64>,
    }
    let content = serde_json::to_string(&DriverStateContent { status, final_fare_sats }).unwrap_or_default();
    publish_event(relay, secret_key, pubkey, Kind::DriverState, vec![], content).await;
}

async fn publish_event(
    relay: &Arc<dyn RelayHandle>,
    secret_key: &SecretKey,
    pubkey: Id32,
    kind: Kind,
    tags: Vec<Vec<String>>,
    content: String,
) {
    let draft = EventDraft {
        pubkey,
        created_at: chrono::Utc::now().timestamp(),
        kind: kind.as_u32(),
        tags,
        content,
    };
    match sign(draft, secret_key) {
        Ok(event) => {
            relay.publish(event).await;
        }
        Err(e) => warn!(error = %e, ?kind, "failed to sign outgoing event"),
    }
}

fn handle_incoming_offer(event: &Event, my_pubkey_hex: &str) {
    let mode = match event.tag_value("mode") {
        Some("direct") => OfferMode::Direct,
        Some("roadflare") => OfferMode::Roadflare,
        _ => OfferMode::Broadcast,
    };
    let offer = IncomingOffer {
        rider_pubkey: event.pubkey.to_hex(),
        mode,
        target_driver_pubkey: event.tag_value("p").map(|s| s.to_string()),
        created_at_unix: event.created_at,
        already_taken: false,
    };
    match intake::evaluate(&offer, my_pubkey_hex, chrono::Utc::now().timestamp(), false) {
        IntakeDisposition::Consider => info!(rider = %offer.rider_pubkey, "considering incoming offer"),
        other => debug!(disposition = intake::disposition_label(other), "dropping incoming offer"),
    }
}

fn parse_preimage_reveal(event: &Event) -> Option<[u8; 32]> {
    let value: serde_json::Value = serde_json::from_str(&event.content).ok()?;
    let hex_str = value.get("preimage")?.as_str()?;
    let bytes = hex::decode(hex_str).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Some(out)
}

fn history_entry(ctx: &RideContext, role: &str, status: &str) -> NewHistoryEntry {
    NewHistoryEntry {
        confirmation_id: ctx.confirmation_id.map(|id| id.to_hex()).unwrap_or_default(),
        role: role.to_string(),
        counterparty_pubkey: ctx.driver_pubkey.map(|id| id.to_hex()).unwrap_or_default(),
        pickup_geohash: None,
        destination_geohash: None,
        distance_km: None,
        duration_secs: None,
        fare_sats: ctx.final_fare_sats.map(|f| f as i64),
        status: status.to_string(),
    }
}

async fn append_history(db: &SqlitePool, entry: NewHistoryEntry) {
    if let Err(e) = storage::append_history(db, &entry).await {
        warn!(error = %e, "failed to append ride history");
    }
}

/// Attempts to claim the HTLC escrow, retrying across a short backoff since
/// the mint may be briefly unreachable right after completion. Gives up
/// (logging) after the last retry; the escrow's own refund locktime is the
/// backstop if every attempt fails.
async fn claim_fare(payment: &Arc<PaymentEngine>, ctx: &RideContext, extra: &DriverExtra, preimage: Option<[u8; 32]>) {
    let (Some(mint_url), Some(locked_proofs), Some(payment_hash), Some(preimage)) =
        (extra.mint_url.clone(), extra.locked_proofs.clone(), ctx.payment_hash, preimage)
    else {
        warn!("ride completed without enough state to claim the escrow");
        metrics::record_claim_attempt("missing_state");
        return;
    };

    for (attempt, backoff_secs) in CLAIM_RETRY_BACKOFFS_SECS.iter().enumerate() {
        if *backoff_secs > 0 {
            sleep(Duration::from_secs(*backoff_secs)).await;
        }
        match payment
            .claim_htlc(&mint_url, locked_proofs.clone(), &preimage, &payment_hash)
            .await
        {
            Ok(wayfare_payment::ClaimOutcome::Claimed { amount_sats }) => {
                info!(amount_sats, attempt, "claimed HTLC escrow");
                metrics::record_claim_attempt("claimed");
                return;
            }
            Ok(wayfare_payment::ClaimOutcome::AlreadyClaimed) => {
                metrics::record_claim_attempt("already_claimed");
                return;
            }
            Ok(wayfare_payment::ClaimOutcome::Expired) => {
                warn!("HTLC escrow expired before it could be claimed");
                metrics::record_claim_attempt("expired");
                return;
            }
            Ok(wayfare_payment::ClaimOutcome::PreimageMismatch) => {
                warn!("preimage did not match escrow payment hash, not retrying");
                metrics::record_claim_attempt("preimage_mismatch");
                return;
            }
            Err(e) => {
                warn!(error = %e, attempt, "HTLC claim attempt failed");
            }
        }
    }
    metrics::record_claim_attempt("exhausted_retries");
}

async fn apply(state: &mut RideState, ctx: &mut RideContext, event: RideEvent, db: &SqlitePool) {
    match transition(*state, ctx, &event) {
        TransitionResult::Valid { new_state, new_context } => {
            *state = new_state;
            *ctx = new_context;
            persist(*state, ctx, db).await;
        }
        TransitionResult::Invalid { reason } => {
            warn!(reason, ?event, "rejected ride event");
        }
    }
}

async fn persist(state: RideState, ctx: &RideContext, db: &SqlitePool) {
    if state.is_terminal() {
        let _ = storage::clear_active_ride(db).await;
        return;
    }
    let Some(confirmation_id) = ctx.confirmation_id else { return };
    let snapshot = ActiveRideSnapshot {
        confirmation_id: confirmation_id.to_hex(),
        state: format!("{state:?}"),
        context_json: serde_json::to_string(ctx).unwrap_or_default(),
        last_processed_driver_action_count: 0,
        snapshot_at: chrono::Utc::now(),
    };
    if let Err(e) = storage::save_active_ride_snapshot(db, &snapshot).await {
        warn!(error = %e, "failed to persist active ride snapshot");
    }
}

fn path_label(p: wayfare_core::PaymentPath) -> &'static str {
    match p {
        wayfare_core::PaymentPath::SameMint => "same_mint",
        wayfare_core::PaymentPath::CrossMint => "cross_mint",
        wayfare_core::PaymentPath::FiatCash => "fiat_cash",
        wayfare_core::PaymentPath::NoPayment => "no_payment",
    }
}

fn parse_ride_state(raw: &str) -> Option<RideState> {
    Some(match raw {
        "Created" => RideState::Created,
        "Accepted" => RideState::Accepted,
        "Confirmed" => RideState::Confirmed,
        "EnRoute" => RideState::EnRoute,
        "Arrived" => RideState::Arrived,
        "InProgress" => RideState::InProgress,
        "Completed" => RideState::Completed,
        "Cancelled" => RideState::Cancelled,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ride_state_round_trips_debug_format() {
        for state in [
            RideState::Created,
            RideState::Accepted,
            RideState::Confirmed,
            RideState::EnRoute,
            RideState::Arrived,
            RideState::InProgress,
            RideState::Completed,
            RideState::Cancelled,
        ] {
            assert_eq!(parse_ride_state(&format!("{state:?}")), Some(state));
        }
        assert_eq!(parse_ride_state("garbage"), None);
    }

    #[test]
    fn path_label_covers_every_variant() {
        assert_eq!(path_label(wayfare_core::PaymentPath::SameMint), "same_mint");
        assert_eq!(path_label(wayfare_core::PaymentPath::CrossMint), "cross_mint");
        assert_eq!(path_label(wayfare_core::PaymentPath::FiatCash), "fiat_cash");
        assert_eq!(path_label(wayfare_core::PaymentPath::NoPayment), "no_payment");
    }
}
