//! Simulated Collaborators
//!
//! In-process stand-ins for the payment gateway, the primary ledger and the
//! anchoring chains, used when no SDK-backed client is configured. They keep
//! the idempotency contract of the real clients so the FSM behaves the same.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::{
    AnchorClient, AnchorConfirmation, LedgerClient, MintReceipt, PaymentConfirmation,
    PaymentGateway, TokenStatus,
};
use crate::issuance::credential::{AnchorMemo, CredentialData};
use crate::issuance::types::{CallOutcome, ChainId, IdempotencyKey};

/// Confirms every payment, once per key
#[derive(Debug, Default)]
pub struct SimulatedPaymentGateway {
    confirmed: DashMap<String, String>,
}

impl SimulatedPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPaymentGateway {
    fn name(&self) -> &'static str {
        "simulated-payment"
    }

    async fn confirm(&self, key: &IdempotencyKey) -> CallOutcome<PaymentConfirmation> {
        let reference = self
            .confirmed
            .entry(key.as_str().to_string())
            .or_insert_with(|| format!("sim-pay-{}", uuid::Uuid::new_v4().simple()))
            .clone();
        CallOutcome::Success(PaymentConfirmation {
            payment_reference: reference,
        })
    }
}

/// Serial-numbered NFT collection in memory
#[derive(Debug)]
pub struct SimulatedLedger {
    collection: String,
    next_serial: AtomicU64,
    /// key -> token reference
    minted: DashMap<String, String>,
}

impl SimulatedLedger {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            next_serial: AtomicU64::new(1),
            minted: DashMap::new(),
        }
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    fn name(&self) -> &'static str {
        "simulated-ledger"
    }

    async fn mint(&self, key: &IdempotencyKey, data: &CredentialData) -> CallOutcome<MintReceipt> {
        let token_reference = self
            .minted
            .entry(key.as_str().to_string())
            .or_insert_with(|| {
                let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
                format!("{}@{}", self.collection, serial)
            })
            .clone();
        debug!(
            key = %key,
            schema = data.payload().schema(),
            token = %token_reference,
            "Simulated mint"
        );
        CallOutcome::Success(MintReceipt { token_reference })
    }

    async fn token_status(&self, token_reference: &str) -> CallOutcome<TokenStatus> {
        let known = self.minted.iter().any(|e| e.value() == token_reference);
        CallOutcome::Success(if known {
            TokenStatus::Active
        } else {
            TokenStatus::NotFound
        })
    }
}

/// Anchoring chain that derives a deterministic transaction hash from the key
#[derive(Debug)]
pub struct SimulatedAnchorClient {
    chain: ChainId,
    network: String,
    anchored: DashMap<String, String>,
}

impl SimulatedAnchorClient {
    pub fn new(chain: ChainId, network: impl Into<String>) -> Self {
        Self {
            chain,
            network: network.into(),
            anchored: DashMap::new(),
        }
    }
}

#[async_trait]
impl AnchorClient for SimulatedAnchorClient {
    fn chain(&self) -> &ChainId {
        &self.chain
    }

    async fn submit(&self, key: &IdempotencyKey, memo: &AnchorMemo) -> CallOutcome<String> {
        let digest = md5::compute(format!("{}:{}", self.network, key));
        let tx_ref = format!("{:X}", digest);
        self.anchored
            .entry(tx_ref.clone())
            .or_insert_with(|| memo.certificate_hash.clone());
        CallOutcome::Success(tx_ref)
    }

    async fn status(&self, chain_tx_reference: &str) -> CallOutcome<AnchorConfirmation> {
        CallOutcome::Success(if self.anchored.contains_key(chain_tx_reference) {
            AnchorConfirmation::Confirmed
        } else {
            AnchorConfirmation::NotFound
        })
    }
}
