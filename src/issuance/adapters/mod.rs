//! Capability Adapters
//!
//! Interfaces to the external systems the issuance core depends on: the
//! payment gateway, the primary issuance ledger, and one anchor client per
//! secondary chain. All mutating calls take an `IdempotencyKey` and MUST be
//! idempotent with respect to it.

#[cfg(feature = "simulated-clients")]
pub mod simulated;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::credential::{AnchorMemo, CredentialData};
use super::types::{CallOutcome, ChainId, IdempotencyKey};

/// Confirmed payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    /// External payment-system identifier
    pub payment_reference: String,
}

/// Minted token on the primary ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReceipt {
    /// Ledger transaction / token identifier
    pub token_reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    Active,
    Revoked,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnchorConfirmation {
    Confirmed,
    Pending,
    NotFound,
}

/// Payment gateway: confirms that the fee for a transaction was paid.
///
/// # Idempotency
/// Confirming the same key twice must report the same payment.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Success` = confirmed, `Permanent` = declined, anything else = no decision yet
    async fn confirm(&self, key: &IdempotencyKey) -> CallOutcome<PaymentConfirmation>;
}

/// Primary issuance ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Mint the credential token.
    ///
    /// # Idempotency
    /// A second mint with the same key must return the first token, never mint again.
    async fn mint(&self, key: &IdempotencyKey, data: &CredentialData) -> CallOutcome<MintReceipt>;

    /// Read token status
    async fn token_status(&self, token_reference: &str) -> CallOutcome<TokenStatus>;
}

/// Secondary chain used for hash anchoring
#[async_trait]
pub trait AnchorClient: Send + Sync {
    fn chain(&self) -> &ChainId;

    /// Submit a hash-anchoring transaction; returns the chain transaction reference
    async fn submit(&self, key: &IdempotencyKey, memo: &AnchorMemo) -> CallOutcome<String>;

    /// Query a previously submitted anchoring transaction
    async fn status(&self, chain_tx_reference: &str) -> CallOutcome<AnchorConfirmation>;
}

/// Per-call deadlines for external collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    pub payment: Duration,
    pub ledger: Duration,
    pub anchor: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            payment: Duration::from_secs(15),
            ledger: Duration::from_secs(15),
            anchor: Duration::from_secs(10),
        }
    }
}

/// Run one external call under a deadline.
///
/// A timeout or a panic inside the collaborator is an `Unknown` outcome:
/// the effect may or may not have happened, so no transition may follow.
pub async fn guarded_call<T, F>(operation: &'static str, timeout: Duration, call: F) -> CallOutcome<T>
where
    F: Future<Output = CallOutcome<T>>,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(call).catch_unwind()).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => {
            error!(operation, "External call panicked; treating outcome as unknown");
            CallOutcome::Unknown(format!("{} failed unexpectedly", operation))
        }
        Err(_) => {
            warn!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "External call timed out"
            );
            CallOutcome::Unknown(format!("{} timed out after {:?}", operation, timeout))
        }
    }
}
