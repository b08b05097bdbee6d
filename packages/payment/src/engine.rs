//! Payment Engine: wraps one `cdk` wallet per known mint and layers ride
//! semantics (HTLC locking, claiming, cross-mint bridging) on top.
//!
//! One `PaymentEngine` per peer process. `wallets` is populated lazily as
//! mints are encountered in offers/confirmations; `pool` is the peer's own
//! sqlite database (shared with `wayfare_core::storage`), used only for the
//! bridge-payment idempotence table.

use std::collections::HashMap;
use std::sync::Arc;

use cdk::amount::Amount as CdkAmount;
use cdk::nuts::{CurrencyUnit, Proofs};
use cdk::wallet::Wallet;
use cdk_sqlite::WalletSqliteDatabase;
use sqlx::sqlite::SqlitePool;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{PaymentEngineError, Result};
use crate::htlc::{generate_claim_keypair, htlc_spending_conditions, verify_preimage};

pub struct PaymentEngine {
    mint_wallets: RwLock<HashMap<String, Arc<Wallet>>>,
    wallet_db: Arc<WalletSqliteDatabase>,
    seed: [u8; 64],
    bridge_pool: SqlitePool,
}

impl PaymentEngine {
    pub async fn new(wallet_db_path: &str, seed: [u8; 64], bridge_pool: SqlitePool) -> Result<Self> {
        let wallet_db = WalletSqliteDatabase::new(wallet_db_path)
            .await
            .map_err(|e| PaymentEngineError::Mint(format!("failed to open wallet database: {e}")))?;
        Ok(Self {
            mint_wallets: RwLock::new(HashMap::new()),
            wallet_db: Arc::new(wallet_db),
            seed,
            bridge_pool,
        })
    }

    async fn wallet_for(&self, mint_url: &str) -> Result<Arc<Wallet>> {
        if let Some(w) = self.mint_wallets.read().await.get(mint_url) {
            return Ok(w.clone());
        }
        let wallet = Wallet::new(mint_url, CurrencyUnit::Sat, self.wallet_db.clone(), &self.seed, None)
            .map_err(|e| PaymentEngineError::Mint(format!("failed to connect to mint {mint_url}: {e}")))?;
        let wallet = Arc::new(wallet);
        self.mint_wallets
            .write()
            .await
            .insert(mint_url.to_string(), wallet.clone());
        Ok(wallet)
    }

    /// Current local-balance view for a mint, refreshed from the wallet's
    /// proof store (no network round trip).
    pub async fn get_balance(&self, mint_url: &str) -> Result<u64> {
        let wallet = self.wallet_for(mint_url).await?;
        let balance = wallet
            .total_balance()
            .await
            .map_err(|e| PaymentEngineError::Mint(e.to_string()))?;
        Ok(u64::from(balance))
    }

    /// Forces a sync with the mint to pick up proofs minted or swapped
    /// outside of this process (e.g. a restored session).
    pub async fn refresh_balance(&self, mint_url: &str) -> Result<u64> {
        let wallet = self.wallet_for(mint_url).await?;
        wallet
            .get_mint_info()
            .await
            .map_err(|e| PaymentEngineError::Mint(e.to_string()))?;
        self.get_balance(mint_url).await
    }

    /// Requests a Lightning invoice from the mint to top up this wallet's
    /// ecash balance (used by the rider ahead of a ride, or by the driver
    /// cashing out).
    pub async fn get_deposit_invoice(&self, mint_url: &str, amount_sats: u64) -> Result<(String, String)> {
        let wallet = self.wallet_for(mint_url).await?;
        let quote = wallet
            .mint_quote(CdkAmount::from(amount_sats), None)
            .await
            .map_err(|e| PaymentEngineError::Mint(e.to_string()))?;
        Ok((quote.id, quote.request))
    }

    /// Polls a mint quote and, once paid, mints the resulting proofs into
    /// the wallet. Callers apply their own retry/backoff (see
    /// `crate::bridge::claim_deposit_by_quote_id`); this call is a single
    /// best-effort attempt.
    pub async fn try_claim_deposit(&self, mint_url: &str, quote_id: &str) -> Result<Option<u64>> {
        let wallet = self.wallet_for(mint_url).await?;
        let status = wallet
            .mint_quote_state(quote_id)
            .await
            .map_err(|e| PaymentEngineError::Mint(e.to_string()))?;
        if !status.state.is_paid() {
            return Ok(None);
        }
        let proofs = wallet
            .mint(quote_id, Default::default(), None)
            .await
            .map_err(|e| PaymentEngineError::Mint(e.to_string()))?;
        let total: u64 = proofs.iter().map(|p| u64::from(p.amount)).sum();
        Ok(Some(total))
    }

    /// Locks `amount_sats` from this wallet under an HTLC spending condition
    /// naming `driver_pubkey` as the claimant and `payment_hash` as the
    /// unlocking secret, refundable to the rider after `locktime`.
    pub async fn lock_for_ride(
        &self,
        mint_url: &str,
        amount_sats: u64,
        driver_pubkey: &cdk::nuts::PublicKey,
        payment_hash: &wayfare_core::Id32,
        locktime: i64,
    ) -> Result<crate::htlc::LockOutcome> {
        let wallet = self.wallet_for(mint_url).await?;
        let available = self.get_balance(mint_url).await?;
        if available < amount_sats {
            return Ok(crate::htlc::LockOutcome::InsufficientBalance {
                required: amount_sats,
                available,
            });
        }

        let (_refund_secret, refund_pubkey) = generate_claim_keypair();
        let conditions = htlc_spending_conditions(driver_pubkey, payment_hash, &refund_pubkey, locktime);

        let send_options = cdk::wallet::SendOptions {
            conditions: Some(conditions),
            ..Default::default()
        };

        let prepared = match wallet.prepare_send(CdkAmount::from(amount_sats), send_options).await {
            Ok(prepared) => prepared,
            Err(e) => return Ok(lock_outcome_from_mint_error(e.to_string())),
        };
        let token = match prepared.confirm(None).await {
            Ok(token) => token,
            Err(e) => return Ok(lock_outcome_from_mint_error(e.to_string())),
        };
        let locked_proofs: Proofs = token.proofs();
        let escrow_token = token.to_string();

        info!(mint_url, amount_sats, "locked fare under HTLC");
        Ok(crate::htlc::LockOutcome::Success {
            escrow_token,
            locked_proofs,
            amount_sats,
        })
    }

    /// Claims an HTLC-locked escrow by presenting the preimage. Verifies the
    /// preimage locally first so a wrong PIN never reaches the mint.
    pub async fn claim_htlc(
        &self,
        mint_url: &str,
        locked_proofs: Proofs,
        preimage: &[u8; 32],
        expected_payment_hash: &wayfare_core::Id32,
    ) -> Result<crate::htlc::ClaimOutcome> {
        if verify_preimage(preimage, expected_payment_hash).is_err() {
            return Ok(crate::htlc::ClaimOutcome::PreimageMismatch);
        }

        let wallet = self.wallet_for(mint_url).await?;
        let witness = hex::encode(preimage);
        match wallet.receive_proofs(locked_proofs, Default::default(), &[witness]).await {
            Ok(amount) => Ok(crate::htlc::ClaimOutcome::Claimed {
                amount_sats: u64::from(amount),
            }),
            Err(e) => {
                let msg = e.to_string();
                if msg.to_lowercase().contains("spent") {
                    warn!(mint_url, "HTLC proofs already spent");
                    Ok(crate::htlc::ClaimOutcome::AlreadyClaimed)
                } else if msg.to_lowercase().contains("expired") || msg.to_lowercase().contains("locktime") {
                    Ok(crate::htlc::ClaimOutcome::Expired)
                } else {
                    Err(PaymentEngineError::Mint(msg))
                }
            }
        }
    }

    pub(crate) fn bridge_pool(&self) -> &SqlitePool {
        &self.bridge_pool
    }

    pub(crate) async fn wallet_handle(&self, mint_url: &str) -> Result<Arc<Wallet>> {
        self.wallet_for(mint_url).await
    }
}

/// Classifies a mint error from a send/swap attempt the same way
/// `claim_htlc` classifies a receive error: a "spent" proof means some of
/// the wallet's own proofs raced another spend, everything else is an
/// unrecoverable failure.
fn lock_outcome_from_mint_error(msg: String) -> crate::htlc::LockOutcome {
    let lower = msg.to_lowercase();
    if lower.contains("spent") {
        warn!("wallet proofs already spent while preparing HTLC lock");
        crate::htlc::LockOutcome::ProofsSpent { spent: 0, total: 0 }
    } else {
        crate::htlc::LockOutcome::Failure { msg }
    }
}

