//! Rider-side ride coordinator: the single task that owns the active ride's
//! mutable state. Everything else (relay handlers, the HTTP server, the CLI)
//! talks to it over `commands`; nobody else ever touches `RideContext`
//! directly. This is the actor-model generalization of the bridge relayer's
//! independent `tokio::select!`-polled managers: here there is exactly one
//! mutable ride per rider process, so one actor owns it outright.

use std::sync::Arc;

use secp256k1::SecretKey;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use wayfare_core::event::{sign, EventDraft};
use wayfare_core::ride::{transition, RideContext, RideEvent, RideState, TransitionResult};
use wayfare_core::storage::{self, ActiveRideSnapshot, NewHistoryEntry};
use wayfare_core::types::{Kind, OfferMode, MAX_PIN_ATTEMPTS};
use wayfare_core::{Event, Id32};
use wayfare_payment::{cdk_pubkey_from_id32, default_escrow_locktime, generate_preimage, LockOutcome, PaymentEngine};
use wayfare_relay::RelayHandle;

use crate::metrics;
use crate::offer::OfferDraft;

pub enum Command {
    /// A signed `ACCEPTANCE` arrived for the outstanding offer.
    DriverAccepted { driver_pubkey: Id32 },
    /// The rider checks the offer, signs it, and publishes it.
    SubmitOffer(OfferDraft),
    /// The rider confirms the ride at the quoted fare: generates the escrow
    /// preimage, locks the fare under an HTLC, and publishes the signed
    /// `CONFIRMATION` naming the driver as claimant.
    ConfirmRide {
        driver_pubkey: Id32,
        mint_url: String,
        amount_sats: u64,
        payment_path: wayfare_core::PaymentPath,
    },
    /// The driver's `DRIVER_STATE` advanced the ride phase.
    DriverStatusUpdate(wayfare_core::RidePhase),
    /// The rider typed a PIN; `verified` is the driver's published answer.
    PinAnswer { verified: bool },
    Cancel { reason: String },
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

    {
        let accept_tx = self_commands.clone();
        relay
            .subscribe(
                "rider-acceptance".to_string(),
                vec![serde_json::json!({ "kinds": [Kind::Acceptance.as_u32()] })],
                Arc::new(move |event: Event| {
                    let _ = accept_tx.try_send(Command::DriverAccepted { driver_pubkey: event.pubkey });
                }),
            )
            .await;
    }
    {
        let status_tx = self_commands.clone();
        relay
            .subscribe(
                "rider-driver-state".to_string(),
                vec![serde_json::json!({ "kinds": [Kind::DriverState.as_u32()] })],
                Arc::new(move |event: Event| {
                    if let Some(phase) = parse_driver_state(&event) {
                        let _ = status_tx.try_send(Command::DriverStatusUpdate(phase));
                    }
                }),
            )
            .await;
    }
    {
        let cancel_tx = self_commands.clone();
        relay
            .subscribe(
                "rider-cancellations".to_string(),
                vec![serde_json::json!({ "kinds": [Kind::Cancellation.as_u32()] })],
                Arc::new(move |event: Event| {
                    let _ = cancel_tx.try_send(Command::Cancel { reason: event.content.clone() });
                }),
            )
            .await;
    }
    relay
        .subscribe(
            "rider-chat".to_string(),
            vec![serde_json::json!({ "kinds": [Kind::Chat.as_u32()] })],
            Arc::new(move |event: Event| {
                debug!(from = %event.pubkey.to_hex(), "chat event received");
            }),
        )
        .await;
    relay
        .subscribe(
            "rider-availability".to_string(),
            vec![serde_json::json!({ "kinds": [Kind::Availability.as_u32()] })],
            Arc::new(move |event: Event| {
                debug!(driver = %event.pubkey.to_hex(), "driver availability update received");
            }),
        )
        .await;
    relay
        .subscribe(
            "rider-profiles".to_string(),
            vec![serde_json::json!({ "kinds": [Kind::Profile.as_u32()] })],
            Arc::new(move |event: Event| {
                debug!(pubkey = %event.pubkey.to_hex(), "profile update received");
            }),
        )
        .await;

    while let Some(cmd) = commands.recv().await {
        match cmd {
            Command::GetState { reply } => {
                let _ = reply.send((state, ctx.clone()));
            }
            Command::Shutdown => break,
            Command::DriverAccepted { driver_pubkey } => {
                apply(&mut state, &mut ctx, RideEvent::Accept { driver_pubkey }, &db).await;
            }
            Command::SubmitOffer(draft) => {
                submit_offer(&relay, &identity_secret, identity_pubkey, &draft).await;
            }
            Command::ConfirmRide { driver_pubkey, mint_url, amount_sats, payment_path } => {
                confirm_ride(
                    &relay,
                    &payment,
                    &identity_secret,
                    identity_pubkey,
                    &mut state,
                    &mut ctx,
                    &db,
                    driver_pubkey,
                    &mint_url,
                    amount_sats,
                    payment_path,
                )
                .await;
            }
            Command::DriverStatusUpdate(phase) => {
                apply(&mut state, &mut ctx, RideEvent::StatusUpdate(phase), &db).await;
                publish_rider_state(&relay, &identity_secret, identity_pubkey, phase.as_str()).await;
                if matches!(phase, wayfare_core::RidePhase::Completed) {
                    metrics::record_ride_completed(ctx.payment_path.map(path_label).unwrap_or("unknown"));
                    let history = history_entry(&ctx, "completed");
                    append_history(&db, history).await;
                }
            }
            Command::PinAnswer { verified } => {
                apply(&mut state, &mut ctx, RideEvent::PinVerify { verified }, &db).await;
                metrics::record_pin_attempt(if verified { "correct" } else { "wrong" });
                if !verified && ctx.pin_attempts >= MAX_PIN_ATTEMPTS {
                    metrics::record_security_alert("pin_brute_force");
                    warn!(attempts = ctx.pin_attempts, "PIN brute-force threshold reached, cancelling ride");
                    let reason = "pin brute-force threshold reached".to_string();
                    let history = history_entry(&ctx, &reason);
                    apply(
                        &mut state,
                        &mut ctx,
                        RideEvent::Cancel {
                            by_pubkey: Id32([0u8; 32]),
                            reason: reason.clone(),
                        },
                        &db,
                    )
                    .await;
                    publish_event(&relay, &identity_secret, identity_pubkey, Kind::Cancellation, vec![], reason).await;
                    append_history(&db, history).await;
                }
            }
            Command::Cancel { reason } => {
                metrics::record_ride_cancelled("rider");
                let history = history_entry(&ctx, &reason);
                apply(
                    &mut state,
                    &mut ctx,
                    RideEvent::Cancel {
                        by_pubkey: Id32([0u8; 32]),
                        reason: reason.clone(),
                    },
                    &db,
                )
                .await;
                publish_event(&relay, &identity_secret, identity_pubkey, Kind::Cancellation, vec![], reason).await;
                append_history(&db, history).await;
            }
        }
    }
}

async fn submit_offer(relay: &Arc<dyn RelayHandle>, secret_key: &SecretKey, pubkey: Id32, draft: &OfferDraft) {
    let mut tags = vec![
        vec!["g".to_string(), draft.pickup_geohash.clone()],
        vec!["dest".to_string(), draft.destination_geohash.clone()],
        vec!["mode".to_string(), offer_mode_label(draft.mode).to_string()],
    ];
    if let Some(target) = &draft.target_driver_pubkey {
        tags.push(vec!["p".to_string(), target.clone()]);
    }
    let content = serde_json::json!({ "quoted_fare_sats": draft.quoted_fare_sats }).to_string();
    publish_event(relay, secret_key, pubkey, Kind::Offer, tags, content).await;
}

fn offer_mode_label(mode: OfferMode) -> &'static str {
    match mode {
        OfferMode::Direct => "direct",
        OfferMode::Broadcast => "broadcast",
        OfferMode::Roadflare => "roadflare",
    }
}

/// Locks the quoted fare under an HTLC naming `driver_pubkey` as claimant,
/// then publishes the signed `CONFIRMATION`. On `ProofsSpent` the wallet is
/// resynced and the lock retried exactly once before giving up, mirroring
/// the payment engine's own spent-proof recovery for claims.
#[allow(clippy::too_many_arguments)]
async fn confirm_ride(
    relay: &Arc<dyn RelayHandle>,
    payment: &Arc<PaymentEngine>,
    secret_key: &SecretKey,
    pubkey: Id32,
    state: &mut RideState,
    ctx: &mut RideContext,
    db: &SqlitePool,
    driver_pubkey: Id32,
    mint_url: &str,
    amount_sats: u64,
    payment_path: wayfare_core::PaymentPath,
) {
    let driver_cdk_pubkey = match cdk_pubkey_from_id32(&driver_pubkey) {
        Ok(pk) => pk,
        Err(e) => {
            warn!(error = %e, "driver pubkey could not be used as an HTLC claimant");
            return;
        }
    };
    let preimage_pair = generate_preimage();
    let locktime = default_escrow_locktime(chrono::Utc::now().timestamp());

    let mut outcome = match payment
        .lock_for_ride(mint_url, amount_sats, &driver_cdk_pubkey, &preimage_pair.payment_hash, locktime)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "failed to lock fare under HTLC");
            return;
        }
    };

    if matches!(outcome, LockOutcome::ProofsSpent { .. }) {
        warn!(mint_url, "wallet proofs spent mid-lock, resyncing and retrying once");
        if payment.refresh_balance(mint_url).await.is_ok() {
            outcome = match payment
                .lock_for_ride(mint_url, amount_sats, &driver_cdk_pubkey, &preimage_pair.payment_hash, locktime)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "HTLC lock retry failed");
                    return;
                }
            };
        }
    }

    match outcome {
        LockOutcome::Success { .. } => {
            apply(
                state,
                ctx,
                RideEvent::Confirm { payment_hash: preimage_pair.payment_hash, payment_path },
                db,
            )
            .await;
            let content = serde_json::json!({ "preimage": hex::encode(preimage_pair.preimage) }).to_string();
            publish_event(
                relay,
                secret_key,
                pubkey,
                Kind::Confirmation,
                vec![vec!["p".to_string(), driver_pubkey.to_hex()]],
                content,
            )
            .await;
        }
        LockOutcome::InsufficientBalance { required, available } => {
            warn!(required, available, "insufficient balance to confirm ride");
        }
        LockOutcome::ProofsSpent { .. } => {
            warn!("HTLC lock still failing with spent proofs after resync, giving up");
        }
        LockOutcome::Failure { msg } => {
            warn!(msg, "HTLC lock failed");
        }
    }
}

async fn publish_rider_state(relay: &Arc<dyn RelayHandle>, secret_key: &SecretKey, pubkey: Id32, status: &str) {
    #[derive(Serialize)]
    struct RiderStateContent<'a> {
        status: &'a str,
    }
    let content = serde_json::to_string(&RiderStateContent { status }).unwrap_or_default();
    publish_event(relay, secret_key, pubkey, Kind::RiderState, vec![], content).await;
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

fn parse_driver_state(event: &Event) -> Option<wayfare_core::RidePhase> {
    let value: serde_json::Value = serde_json::from_str(&event.content).ok()?;
    match value.get("status")?.as_str()? {
        "en_route_pickup" => Some(wayfare_core::RidePhase::EnRoutePickup),
        "arrived" => Some(wayfare_core::RidePhase::Arrived),
        "in_progress" => Some(wayfare_core::RidePhase::InProgress),
        "completed" => Some(wayfare_core::RidePhase::Completed),
        "cancelled" => Some(wayfare_core::RidePhase::Cancelled),
        _ => None,
    }
}

fn history_entry(ctx: &RideContext, status: &str) -> NewHistoryEntry {
    NewHistoryEntry {
        confirmation_id: ctx.confirmation_id.map(|id| id.to_hex()).unwrap_or_default(),
        role: "rider".to_string(),
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

pub fn default_offer_mode(raw: &str) -> OfferMode {
    match raw {
        "direct" => OfferMode::Direct,
        "roadflare" => OfferMode::Roadflare,
        _ => OfferMode::Broadcast,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_offer_mode_falls_back_to_broadcast() {
        assert!(matches!(default_offer_mode("nonsense"), OfferMode::Broadcast));
        assert!(matches!(default_offer_mode("direct"), OfferMode::Direct));
        assert!(matches!(default_offer_mode("roadflare"), OfferMode::Roadflare));
    }

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
