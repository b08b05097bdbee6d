//! Local sqlite-backed persistence: the active-ride snapshot, the ride
//! history log, and pending cross-mint bridge payments.
//!
//! Mirrors the shape of a Postgres-backed operator database (pool,
//! `run_migrations`, typed row structs, `wrap_err`-annotated queries) but
//! targets a single embedded sqlite file per peer rather than a shared
//! server database.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::warn;

use crate::types::SESSION_SNAPSHOT_MAX_AGE_SECS;

pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .wrap_err("failed to open local sqlite database")
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("failed to run local database migrations")?;
    Ok(())
}

/// Durable snapshot of the active ride, written on every state-affecting
/// update. `context_json` is the serialized coordinator-specific ride
/// context; this module does not interpret it, only stores and age-gates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveRideSnapshot {
    pub confirmation_id: String,
    pub state: String,
    pub context_json: String,
    pub last_processed_driver_action_count: i64,
    pub snapshot_at: DateTime<Utc>,
}

pub async fn save_active_ride_snapshot(pool: &SqlitePool, snapshot: &ActiveRideSnapshot) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO active_ride (id, confirmation_id, state, context_json, last_processed_driver_action_count, snapshot_at)
        VALUES (1, ?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(id) DO UPDATE SET
            confirmation_id = excluded.confirmation_id,
            state = excluded.state,
            context_json = excluded.context_json,
            last_processed_driver_action_count = excluded.last_processed_driver_action_count,
            snapshot_at = excluded.snapshot_at
        "#,
    )
    .bind(&snapshot.confirmation_id)
    .bind(&snapshot.state)
    .bind(&snapshot.context_json)
    .bind(snapshot.last_processed_driver_action_count)
    .bind(snapshot.snapshot_at.to_rfc3339())
    .execute(pool)
    .await
    .wrap_err("failed to save active ride snapshot")?;

    Ok(())
}

pub async fn clear_active_ride(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM active_ride WHERE id = 1")
        .execute(pool)
        .await
        .wrap_err("failed to clear active ride snapshot")?;
    Ok(())
}

/// Loads the snapshot and discards it if older than
/// [`SESSION_SNAPSHOT_MAX_AGE_SECS`], returning `None` in that case. A
/// malformed row (should not happen outside disk corruption) is treated the
/// same way: cleared and reported as absent, never surfaced as an error that
/// would block startup.
pub async fn restore_active_ride(pool: &SqlitePool) -> Result<Option<ActiveRideSnapshot>> {
    let row = sqlx::query(
        "SELECT confirmation_id, state, context_json, last_processed_driver_action_count, snapshot_at FROM active_ride WHERE id = 1",
    )
    .fetch_optional(pool)
    .await
    .wrap_err("failed to read active ride snapshot")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let snapshot_at_raw: String = row.get("snapshot_at");
    let snapshot_at = match DateTime::parse_from_rfc3339(&snapshot_at_raw) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(e) => {
            warn!(error = %e, "active ride snapshot had an unparsable timestamp, discarding");
            clear_active_ride(pool).await?;
            return Ok(None);
        }
    };

    let age_secs = (Utc::now() - snapshot_at).num_seconds();
    if age_secs > SESSION_SNAPSHOT_MAX_AGE_SECS {
        warn!(age_secs, "active ride snapshot is stale, discarding");
        clear_active_ride(pool).await?;
        return Ok(None);
    }

    Ok(Some(ActiveRideSnapshot {
        confirmation_id: row.get("confirmation_id"),
        state: row.get("state"),
        context_json: row.get("context_json"),
        last_processed_driver_action_count: row.get("last_processed_driver_action_count"),
        snapshot_at,
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewHistoryEntry {
    pub confirmation_id: String,
    pub role: String,
    pub counterparty_pubkey: String,
    pub pickup_geohash: Option<String>,
    pub destination_geohash: Option<String>,
    pub distance_km: Option<f64>,
    pub duration_secs: Option<i64>,
    pub fare_sats: Option<i64>,
    pub status: String,
}

pub async fn append_history(pool: &SqlitePool, entry: &NewHistoryEntry) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO ride_history (confirmation_id, role, counterparty_pubkey, pickup_geohash, destination_geohash, distance_km, duration_secs, fare_sats, status, completed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        RETURNING id
        "#,
    )
    .bind(&entry.confirmation_id)
    .bind(&entry.role)
    .bind(&entry.counterparty_pubkey)
    .bind(&entry.pickup_geohash)
    .bind(&entry.destination_geohash)
    .bind(entry.distance_km)
    .bind(entry.duration_secs)
    .bind(entry.fare_sats)
    .bind(&entry.status)
    .bind(Utc::now().to_rfc3339())
    .fetch_one(pool)
    .await
    .wrap_err("failed to append ride history entry")?;

    Ok(row.get("id"))
}

pub async fn recent_history(pool: &SqlitePool, limit: i64) -> Result<Vec<NewHistoryEntry>> {
    let rows = sqlx::query(
        "SELECT confirmation_id, role, counterparty_pubkey, pickup_geohash, destination_geohash, distance_km, duration_secs, fare_sats, status FROM ride_history ORDER BY id DESC LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .wrap_err("failed to read ride history")?;

    Ok(rows
        .into_iter()
        .map(|r| NewHistoryEntry {
            confirmation_id: r.get("confirmation_id"),
            role: r.get("role"),
            counterparty_pubkey: r.get("counterparty_pubkey"),
            pickup_geohash: r.get("pickup_geohash"),
            destination_geohash: r.get("destination_geohash"),
            distance_km: r.get("distance_km"),
            duration_secs: r.get("duration_secs"),
            fare_sats: r.get("fare_sats"),
            status: r.get("status"),
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeStatus {
    Pending,
    Settled,
    Failed,
}

impl BridgeStatus {
    fn as_str(&self) -> &'static str {
        match self {
            BridgeStatus::Pending => "pending",
            BridgeStatus::Settled => "settled",
            BridgeStatus::Failed => "failed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "settled" => BridgeStatus::Settled,
            "failed" => BridgeStatus::Failed,
            _ => BridgeStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingBridgePayment {
    pub id: String,
    pub ride_id: String,
    pub quote_id: String,
    pub amount_sats: i64,
    pub fee_reserve_sats: i64,
    pub invoice: String,
    pub status: BridgeStatus,
    pub lightning_preimage: Option<String>,
}

pub async fn insert_pending_bridge(pool: &SqlitePool, payment: &PendingBridgePayment) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pending_bridge_payments (id, ride_id, quote_id, amount_sats, fee_reserve_sats, invoice, status, lightning_preimage, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&payment.id)
    .bind(&payment.ride_id)
    .bind(&payment.quote_id)
    .bind(payment.amount_sats)
    .bind(payment.fee_reserve_sats)
    .bind(&payment.invoice)
    .bind(payment.status.as_str())
    .bind(&payment.lightning_preimage)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .wrap_err("failed to insert pending bridge payment")?;

    Ok(())
}

/// Used at `bridge_payment` entry to enforce ride-id-keyed idempotence: a
/// ride with an in-progress bridge must resume polling it, not start a new
/// melt.
pub async fn find_pending_bridge_for_ride(pool: &SqlitePool, ride_id: &str) -> Result<Option<PendingBridgePayment>> {
    let row = sqlx::query(
        "SELECT id, ride_id, quote_id, amount_sats, fee_reserve_sats, invoice, status, lightning_preimage FROM pending_bridge_payments WHERE ride_id = ?1 AND status = 'pending' LIMIT 1",
    )
    .bind(ride_id)
    .fetch_optional(pool)
    .await
    .wrap_err("failed to look up pending bridge payment")?;

    Ok(row.map(|r| PendingBridgePayment {
        id: r.get("id"),
        ride_id: r.get("ride_id"),
        quote_id: r.get("quote_id"),
        amount_sats: r.get("amount_sats"),
        fee_reserve_sats: r.get("fee_reserve_sats"),
        invoice: r.get("invoice"),
        status: BridgeStatus::from_str(&r.get::<String, _>("status")),
        lightning_preimage: r.get("lightning_preimage"),
    }))
}

pub async fn mark_bridge_settled(pool: &SqlitePool, id: &str, lightning_preimage: &str) -> Result<()> {
    sqlx::query("UPDATE pending_bridge_payments SET status = 'settled', lightning_preimage = ?1 WHERE id = ?2")
        .bind(lightning_preimage)
        .bind(id)
        .execute(pool)
        .await
        .wrap_err_with(|| format!("failed to mark bridge payment {id} settled"))?;
    Ok(())
}

pub async fn mark_bridge_failed(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("UPDATE pending_bridge_payments SET status = 'failed' WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await
        .wrap_err_with(|| format!("failed to mark bridge payment {id} failed"))?;
    Ok(())
}

pub async fn kv_get(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?1")
        .bind(key)
        .fetch_optional(pool)
        .await
        .wrap_err_with(|| format!("failed to read kv key {key}"))?;
    Ok(row.map(|r| r.get("value")))
}

pub async fn kv_set(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO kv_store (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("failed to write kv key {key}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn snapshot_round_trips_when_fresh() {
        let pool = memory_pool().await;
        let snap = ActiveRideSnapshot {
            confirmation_id: "abc".into(),
            state: "Confirmed".into(),
            context_json: "{}".into(),
            last_processed_driver_action_count: 3,
            snapshot_at: Utc::now(),
        };
        save_active_ride_snapshot(&pool, &snap).await.unwrap();
        let restored = restore_active_ride(&pool).await.unwrap().unwrap();
        assert_eq!(restored.confirmation_id, "abc");
        assert_eq!(restored.last_processed_driver_action_count, 3);
    }

    #[tokio::test]
    async fn stale_snapshot_is_discarded() {
        let pool = memory_pool().await;
        let snap = ActiveRideSnapshot {
            confirmation_id: "old".into(),
            state: "EnRoute".into(),
            context_json: "{}".into(),
            last_processed_driver_action_count: 0,
            snapshot_at: Utc::now() - chrono::Duration::hours(3),
        };
        save_active_ride_snapshot(&pool, &snap).await.unwrap();
        assert!(restore_active_ride(&pool).await.unwrap().is_none());
        // discarding also clears the row so a second restore stays empty
        assert!(restore_active_ride(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_entries_append_and_list_newest_first() {
        let pool = memory_pool().await;
        for i in 0..3 {
            append_history(
                &pool,
                &NewHistoryEntry {
                    confirmation_id: format!("ride-{i}"),
                    role: "rider".into(),
                    counterparty_pubkey: "pk".into(),
                    pickup_geohash: Some("9q8yy".into()),
                    destination_geohash: None,
                    distance_km: Some(4.2),
                    duration_secs: Some(600),
                    fare_sats: Some(1500),
                    status: "completed".into(),
                },
            )
            .await
            .unwrap();
        }
        let recent = recent_history(&pool, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].confirmation_id, "ride-2");
    }

    #[tokio::test]
    async fn pending_bridge_lookup_is_ride_id_keyed() {
        let pool = memory_pool().await;
        insert_pending_bridge(
            &pool,
            &PendingBridgePayment {
                id: "bridge-1".into(),
                ride_id: "ride-1".into(),
                quote_id: "quote-1".into(),
                amount_sats: 2000,
                fee_reserve_sats: 20,
                invoice: "lnbc...".into(),
                status: BridgeStatus::Pending,
                lightning_preimage: None,
            },
        )
        .await
        .unwrap();

        let found = find_pending_bridge_for_ride(&pool, "ride-1").await.unwrap();
        assert!(found.is_some());
        assert!(find_pending_bridge_for_ride(&pool, "ride-2").await.unwrap().is_none());

        mark_bridge_settled(&pool, "bridge-1", "preimage-hex").await.unwrap();
        assert!(find_pending_bridge_for_ride(&pool, "ride-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn kv_store_round_trips() {
        let pool = memory_pool().await;
        assert!(kv_get(&pool, "roadflare_state").await.unwrap().is_none());
        kv_set(&pool, "roadflare_state", "{\"trusted\":[]}").await.unwrap();
        assert_eq!(
            kv_get(&pool, "roadflare_state").await.unwrap().as_deref(),
            Some("{\"trusted\":[]}")
        );
    }
}
