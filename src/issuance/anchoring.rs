//! Anchoring Coordinator
//!
//! Once a transaction reaches ISSUANCE_COMPLETE, submits its certificate hash
//! to every configured secondary chain. Each chain gets its own task and its
//! own AnchorRecord; nothing that happens on one chain is visible to another
//! or to the owning transaction.
//!
//! # Record protocol
//! `attempts` is the CAS version of a record:
//! 1. claim: `(status, n) -> (PENDING, n + 1)` before calling the chain
//! 2. finalize: `(PENDING, n + 1) -> ANCHORED | FAILED`
//!
//! An unknown outcome leaves the record PENDING; the sweeper re-submits it
//! with the same idempotency key once it has been stuck long enough.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::adapters::{AnchorClient, guarded_call};
use super::credential::{AnchorMemo, certificate_hash};
use super::error::IssuanceError;
use super::state::{AnchorStatus, TransactionStatus};
use super::store::TransactionStore;
use super::types::{
    AnchorRecord, AnchorUpdate, CallOutcome, ChainId, ErrorDetail, FailureKind, IdempotencyKey,
    IssuanceTransaction, TransactionId,
};

// ============================================================================
// Trigger channel
// ============================================================================

/// Sender side, held by the IssuanceCoordinator
#[derive(Clone)]
pub struct AnchorTrigger {
    tx: mpsc::Sender<TransactionId>,
}

impl AnchorTrigger {
    /// Queue a completed transaction for anchoring without waiting.
    ///
    /// Returns false if the queue is full or closed; the sweeper's
    /// missing-anchor scan picks the transaction up later.
    pub fn notify(&self, id: TransactionId) -> bool {
        match self.tx.try_send(id) {
            Ok(()) => true,
            Err(e) => {
                warn!(transaction_id = %id, error = %e, "Anchoring trigger dropped");
                false
            }
        }
    }
}

/// Receiver side, drained by [`AnchoringCoordinator::run`]
pub struct AnchorReceiver {
    rx: mpsc::Receiver<TransactionId>,
}

impl AnchorReceiver {
    pub async fn recv(&mut self) -> Option<TransactionId> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TransactionId> {
        self.rx.try_recv().ok()
    }
}

/// Create a new trigger channel pair
pub fn anchor_channel(buffer: usize) -> (AnchorTrigger, AnchorReceiver) {
    let (tx, rx) = mpsc::channel(buffer);
    (AnchorTrigger { tx }, AnchorReceiver { rx })
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct AnchoringCoordinator {
    store: Arc<dyn TransactionStore>,
    clients: Vec<Arc<dyn AnchorClient>>,
    timeout: Duration,
}

impl AnchoringCoordinator {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        clients: Vec<Arc<dyn AnchorClient>>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            clients,
            timeout,
        }
    }

    /// Configured chains, in configuration order
    pub fn chains(&self) -> Vec<ChainId> {
        self.clients.iter().map(|c| c.chain().clone()).collect()
    }

    fn client(&self, chain: &ChainId) -> Option<Arc<dyn AnchorClient>> {
        self.clients.iter().find(|c| c.chain() == chain).cloned()
    }

    /// Drain the trigger channel until every sender is dropped
    pub async fn run(self: Arc<Self>, mut receiver: AnchorReceiver) {
        info!(chains = ?self.chains(), "Starting anchoring worker");

        while let Some(id) = receiver.recv().await {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.anchor_by_id(id).await {
                    error!(transaction_id = %id, error = %e, "Anchoring failed");
                }
            });
        }

        info!("Anchoring trigger channel closed, worker exiting");
    }

    pub async fn anchor_by_id(&self, id: TransactionId) -> Result<Vec<AnchorRecord>, IssuanceError> {
        let tx = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| IssuanceError::TransactionNotFound(id.to_string()))?;
        self.anchor_transaction(&tx).await
    }

    /// Fan out to every chain and wait for all of them.
    ///
    /// Chains whose record already exists are left to the sweeper, so calling
    /// this again for the same transaction submits nothing new.
    pub async fn anchor_transaction(
        &self,
        tx: &IssuanceTransaction,
    ) -> Result<Vec<AnchorRecord>, IssuanceError> {
        let issuance_reference = completed_reference(tx)?;
        let hash = certificate_hash(&tx.credential_data, &issuance_reference);

        let mut tasks: JoinSet<Result<Option<AnchorRecord>, IssuanceError>> = JoinSet::new();
        for client in &self.clients {
            let store = self.store.clone();
            let client = client.clone();
            let record = AnchorRecord::new(tx.id, client.chain().clone(), hash.clone());
            let issuance_reference = issuance_reference.clone();
            let timeout = self.timeout;

            tasks.spawn(async move {
                let chain = record.chain.clone();
                if !store.insert_anchor_if_absent(&record).await? {
                    debug!(transaction_id = %record.transaction_id, chain = %chain, "Anchor record exists, skipping");
                    return Ok(None);
                }
                submit_anchor(store.as_ref(), client.as_ref(), timeout, record, &issuance_reference)
                    .await
                    .map(Some)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(record))) => debug!(
                    transaction_id = %record.transaction_id,
                    chain = %record.chain,
                    status = %record.status,
                    "Chain anchoring finished"
                ),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    error!(transaction_id = %tx.id, error = %e, "Chain anchoring aborted")
                }
                Err(e) => error!(transaction_id = %tx.id, error = %e, "Chain anchoring task panicked"),
            }
        }

        Ok(self.store.list_anchors(tx.id).await?)
    }

    /// Re-submit one existing record (sweeper path)
    pub async fn retry_anchor(&self, record: &AnchorRecord) -> Result<AnchorRecord, IssuanceError> {
        let Some(client) = self.client(&record.chain) else {
            warn!(
                transaction_id = %record.transaction_id,
                chain = %record.chain,
                "No client configured for chain, leaving record as is"
            );
            return Ok(record.clone());
        };

        let tx = self
            .store
            .get_by_id(record.transaction_id)
            .await?
            .ok_or_else(|| IssuanceError::TransactionNotFound(record.transaction_id.to_string()))?;
        let issuance_reference = completed_reference(&tx)?;

        submit_anchor(
            self.store.as_ref(),
            client.as_ref(),
            self.timeout,
            record.clone(),
            &issuance_reference,
        )
        .await
    }

    /// Per-chain records of a transaction
    pub async fn get_anchor_statuses(&self, id: TransactionId) -> Result<Vec<AnchorRecord>, IssuanceError> {
        if self.store.get_by_id(id).await?.is_none() {
            return Err(IssuanceError::TransactionNotFound(id.to_string()));
        }
        Ok(self.store.list_anchors(id).await?)
    }
}

fn completed_reference(tx: &IssuanceTransaction) -> Result<String, IssuanceError> {
    match (&tx.status, &tx.issuance_reference) {
        (TransactionStatus::IssuanceComplete, Some(reference)) => Ok(reference.clone()),
        (TransactionStatus::IssuanceComplete, None) => Err(IssuanceError::SystemError(format!(
            "{} is complete without an issuance reference",
            tx.id
        ))),
        (status, _) => Err(IssuanceError::InvalidTransition {
            operation: "anchor",
            from: *status,
        }),
    }
}

/// Claim, submit and finalize one record
async fn submit_anchor(
    store: &dyn TransactionStore,
    client: &dyn AnchorClient,
    timeout: Duration,
    record: AnchorRecord,
    issuance_reference: &str,
) -> Result<AnchorRecord, IssuanceError> {
    let id = record.transaction_id;
    let chain = record.chain.clone();
    let attempt = record.attempts + 1;

    let claim = AnchorUpdate {
        status: AnchorStatus::Pending,
        attempts: attempt,
        chain_tx_reference: None,
        last_attempt_at: Some(Utc::now()),
        last_error: record.last_error.clone(),
    };
    if !store
        .conditional_update_anchor(id, &chain, record.status, record.attempts, claim)
        .await?
    {
        debug!(transaction_id = %id, chain = %chain, "Anchor record claimed elsewhere");
        return current(store, id, &chain).await;
    }

    let memo = AnchorMemo::new(record.certificate_hash.clone(), issuance_reference.to_string(), id);
    let key = IdempotencyKey::anchor(id, &chain);
    let outcome = guarded_call("anchor.submit", timeout, client.submit(&key, &memo)).await;

    let finalize = match outcome {
        CallOutcome::Success(chain_tx_reference) => {
            info!(
                transaction_id = %id,
                chain = %chain,
                chain_tx = %chain_tx_reference,
                attempts = attempt,
                "Certificate hash anchored"
            );
            AnchorUpdate {
                status: AnchorStatus::Anchored,
                attempts: attempt,
                chain_tx_reference: Some(chain_tx_reference),
                last_attempt_at: None,
                last_error: None,
            }
        }
        CallOutcome::Permanent(msg) => failed_update(id, &chain, attempt, FailureKind::Permanent, msg),
        CallOutcome::Transient(msg) => failed_update(id, &chain, attempt, FailureKind::Transient, msg),
        CallOutcome::Unknown(msg) => {
            warn!(
                transaction_id = %id,
                chain = %chain,
                attempts = attempt,
                error = %msg,
                "Anchor outcome unknown, record stays PENDING"
            );
            AnchorUpdate {
                status: AnchorStatus::Pending,
                attempts: attempt,
                chain_tx_reference: None,
                last_attempt_at: None,
                last_error: Some(ErrorDetail::new(FailureKind::Unknown, msg)),
            }
        }
    };

    if !store
        .conditional_update_anchor(id, &chain, AnchorStatus::Pending, attempt, finalize)
        .await?
    {
        warn!(transaction_id = %id, chain = %chain, "Anchor record changed during submission");
    }
    current(store, id, &chain).await
}

fn failed_update(
    id: TransactionId,
    chain: &ChainId,
    attempt: u32,
    kind: FailureKind,
    msg: String,
) -> AnchorUpdate {
    warn!(
        transaction_id = %id,
        chain = %chain,
        attempts = attempt,
        kind = kind.as_str(),
        error = %msg,
        "Anchor submission failed"
    );
    AnchorUpdate {
        status: AnchorStatus::Failed,
        attempts: attempt,
        chain_tx_reference: None,
        last_attempt_at: None,
        last_error: Some(ErrorDetail::new(kind, msg).with_context(format!("attempt {}", attempt))),
    }
}

async fn current(
    store: &dyn TransactionStore,
    id: TransactionId,
    chain: &ChainId,
) -> Result<AnchorRecord, IssuanceError> {
    store.get_anchor(id, chain).await?.ok_or_else(|| {
        error!(transaction_id = %id, chain = %chain, "Anchor record vanished after update");
        IssuanceError::SystemError(format!("anchor record {}/{} not found", id, chain))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuance::adapters::mock::{Behavior, MockAnchorClient};
    use crate::issuance::credential::CredentialData;
    use crate::issuance::credential::fixtures::academic_json;
    use crate::issuance::store::MemoryTransactionStore;
    use crate::issuance::types::{TransactionType, TransitionFields};

    async fn completed_tx(store: &MemoryTransactionStore) -> IssuanceTransaction {
        let tx = IssuanceTransaction::new(
            "univ-1".into(),
            TransactionType::CredentialIssuance,
            CredentialData::parse(academic_json("Juan Perez")).unwrap(),
        );
        store.create(&tx).await.unwrap();
        store
            .conditional_update_status(
                tx.id,
                TransactionStatus::PendingPayment,
                TransactionStatus::PendingIssuance,
                TransitionFields::payment("0.0.7001@1"),
            )
            .await
            .unwrap();
        store
            .conditional_update_status(
                tx.id,
                TransactionStatus::PendingIssuance,
                TransactionStatus::IssuanceComplete,
                TransitionFields::issuance("0.0.4821@1"),
            )
            .await
            .unwrap();
        store.get_by_id(tx.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_anchor_all_chains() {
        let store = Arc::new(MemoryTransactionStore::new());
        let xrp = Arc::new(MockAnchorClient::new("XRP"));
        let algo = Arc::new(MockAnchorClient::new("ALGORAND"));
        let coordinator = AnchoringCoordinator::new(
            store.clone(),
            vec![xrp.clone() as Arc<dyn AnchorClient>, algo.clone()],
            Duration::from_secs(1),
        );
        let tx = completed_tx(&store).await;

        let records = coordinator.anchor_transaction(&tx).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == AnchorStatus::Anchored));
        assert!(records.iter().all(|r| r.attempts == 1));

        // Both chains received the same hash under chain-specific keys
        let expected = certificate_hash(&tx.credential_data, "0.0.4821@1");
        assert_eq!(xrp.submissions()[0].1, expected);
        assert_eq!(algo.submissions()[0].1, expected);
        assert_ne!(xrp.submissions()[0].0, algo.submissions()[0].0);
    }

    #[tokio::test]
    async fn test_second_trigger_submits_nothing() {
        let store = Arc::new(MemoryTransactionStore::new());
        let xrp = Arc::new(MockAnchorClient::new("XRP"));
        let coordinator =
            AnchoringCoordinator::new(store.clone(), vec![xrp.clone() as Arc<dyn AnchorClient>], Duration::from_secs(1));
        let tx = completed_tx(&store).await;

        coordinator.anchor_transaction(&tx).await.unwrap();
        coordinator.anchor_transaction(&tx).await.unwrap();
        assert_eq!(xrp.submit_calls(), 1);
    }

    #[tokio::test]
    async fn test_refuses_incomplete_transaction() {
        let store = Arc::new(MemoryTransactionStore::new());
        let coordinator = AnchoringCoordinator::new(
            store.clone(),
            vec![Arc::new(MockAnchorClient::new("XRP")) as Arc<dyn AnchorClient>],
            Duration::from_secs(1),
        );
        let tx = IssuanceTransaction::new(
            "univ-1".into(),
            TransactionType::CredentialIssuance,
            CredentialData::parse(academic_json("Juan Perez")).unwrap(),
        );
        store.create(&tx).await.unwrap();

        let err = coordinator.anchor_transaction(&tx).await.unwrap_err();
        assert!(matches!(err, IssuanceError::InvalidTransition { operation: "anchor", .. }));
        assert!(store.list_anchors(tx.id).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_outcome_stays_pending() {
        let store = Arc::new(MemoryTransactionStore::new());
        let xrp = Arc::new(MockAnchorClient::new("XRP"));
        xrp.push(Behavior::Hang);
        let coordinator =
            AnchoringCoordinator::new(store.clone(), vec![xrp.clone() as Arc<dyn AnchorClient>], Duration::from_secs(1));
        let tx = completed_tx(&store).await;

        let records = coordinator.anchor_transaction(&tx).await.unwrap();
        assert_eq!(records[0].status, AnchorStatus::Pending);
        assert_eq!(records[0].attempts, 1);
        assert_eq!(
            records[0].last_error.as_ref().map(|e| e.kind),
            Some(FailureKind::Unknown)
        );
    }

    #[tokio::test]
    async fn test_retry_after_transient_failure() {
        let store = Arc::new(MemoryTransactionStore::new());
        let xrp = Arc::new(MockAnchorClient::new("XRP"));
        xrp.push(Behavior::Transient("rippled unavailable"));
        let coordinator =
            AnchoringCoordinator::new(store.clone(), vec![xrp.clone() as Arc<dyn AnchorClient>], Duration::from_secs(1));
        let tx = completed_tx(&store).await;

        let records = coordinator.anchor_transaction(&tx).await.unwrap();
        assert_eq!(records[0].status, AnchorStatus::Failed);
        assert!(!records[0].is_permanently_failed());

        let retried = coordinator.retry_anchor(&records[0]).await.unwrap();
        assert_eq!(retried.status, AnchorStatus::Anchored);
        assert_eq!(retried.attempts, 2);
        assert!(retried.last_error.is_none());

        // A stale copy of the record cannot claim again
        let stale = coordinator.retry_anchor(&records[0]).await.unwrap();
        assert_eq!(stale.status, AnchorStatus::Anchored);
        assert_eq!(xrp.submit_calls(), 2);
    }

    #[tokio::test]
    async fn test_trigger_channel() {
        let (trigger, mut receiver) = anchor_channel(1);
        let id = TransactionId::new();
        assert!(trigger.notify(id));
        // Full queue drops instead of blocking
        assert!(!trigger.notify(TransactionId::new()));
        assert_eq!(receiver.try_recv(), Some(id));
    }

    #[tokio::test]
    async fn test_anchor_statuses_unknown_transaction() {
        let store = Arc::new(MemoryTransactionStore::new());
        let coordinator = AnchoringCoordinator::new(store, vec![], Duration::from_secs(1));
        assert!(matches!(
            coordinator.get_anchor_statuses(TransactionId::new()).await,
            Err(IssuanceError::TransactionNotFound(_))
        ));
    }
}
