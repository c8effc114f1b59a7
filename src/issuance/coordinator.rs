//! Issuance Coordinator
//!
//! Drives one transaction through the issuance FSM:
//!
//! ```text
//! PENDING_PAYMENT --confirm_payment--> PENDING_ISSUANCE --issue--> ISSUANCE_COMPLETE
//!        |                                    |
//!        +--> PAYMENT_FAILED                  +--> ISSUANCE_FAILED
//! ```
//!
//! Only an explicit `Permanent` outcome moves a transaction to a failure
//! state. `Transient` and `Unknown` leave it where it is; the call is safe to
//! repeat because the collaborator sees the same idempotency key every time.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use super::adapters::{CallTimeouts, LedgerClient, PaymentConfirmation, PaymentGateway, TokenStatus, guarded_call};
use super::anchoring::AnchorTrigger;
use super::credential::{CredentialData, CredentialPayload};
use super::error::IssuanceError;
use super::state::TransactionStatus;
use super::store::TransactionStore;
use super::types::{
    CallOutcome, ErrorDetail, FailureKind, IdempotencyKey, IssuanceTransaction, TransactionId,
    TransactionType, TransitionFields,
};

/// Payment reference recorded when the mint fee is zero
pub const WAIVED_PAYMENT_REFERENCE: &str = "waived";

/// Longest subject id the stores accept
pub const MAX_SUBJECT_ID_LEN: usize = 128;

/// Largest batch `process_batch` accepts
pub const MAX_BATCH_SIZE: usize = 500;

/// Transactions of one batch driven at the same time
const BATCH_CONCURRENCY: usize = 8;

/// Outcome of one batch item
#[derive(Debug)]
pub struct BatchItem {
    pub transaction_id: TransactionId,
    pub result: Result<TransactionStatus, IssuanceError>,
}

impl BatchItem {
    pub fn is_successful(&self) -> bool {
        matches!(self.result, Ok(TransactionStatus::IssuanceComplete))
    }

    pub fn is_failed(&self) -> bool {
        match &self.result {
            Ok(status) => status.is_terminal() && *status != TransactionStatus::IssuanceComplete,
            Err(_) => true,
        }
    }
}

/// Per-item outcomes in request order, plus counts
#[derive(Debug, Default)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
    pub successful: usize,
    pub failed: usize,
    /// Payment or mint undecided; the sweeper or a later call finishes these
    pub pending: usize,
}

pub struct IssuanceCoordinator {
    store: Arc<dyn TransactionStore>,
    payment: Arc<dyn PaymentGateway>,
    ledger: Arc<dyn LedgerClient>,
    timeouts: CallTimeouts,
    /// Zero waives the payment step
    mint_fee: u64,
    anchor_trigger: Option<AnchorTrigger>,
}

impl IssuanceCoordinator {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        payment: Arc<dyn PaymentGateway>,
        ledger: Arc<dyn LedgerClient>,
    ) -> Self {
        Self {
            store,
            payment,
            ledger,
            timeouts: CallTimeouts::default(),
            mint_fee: 1,
            anchor_trigger: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: CallTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_mint_fee(mut self, mint_fee: u64) -> Self {
        self.mint_fee = mint_fee;
        self
    }

    /// Notify the anchoring worker on every transition into ISSUANCE_COMPLETE
    pub fn with_anchor_trigger(mut self, trigger: AnchorTrigger) -> Self {
        self.anchor_trigger = Some(trigger);
        self
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    /// Create a transaction in PENDING_PAYMENT.
    ///
    /// The credential payload is parsed and validated here, once. Retries use
    /// the stored bytes as they are.
    pub async fn create_transaction(
        &self,
        subject_id: &str,
        tx_type: TransactionType,
        credential_data: impl Into<Vec<u8>>,
    ) -> Result<TransactionId, IssuanceError> {
        let subject_id = subject_id.trim();
        if subject_id.is_empty() {
            return Err(IssuanceError::InvalidSubject);
        }
        if subject_id.len() > MAX_SUBJECT_ID_LEN {
            return Err(IssuanceError::Validation(format!(
                "subjectId is {} bytes, at most {} allowed",
                subject_id.len(),
                MAX_SUBJECT_ID_LEN
            )));
        }

        let data = CredentialData::parse(credential_data)?;
        if data.payload().transaction_type() != tx_type {
            return Err(IssuanceError::SchemaMismatch(tx_type.to_string()));
        }
        if let CredentialPayload::RevocationV1(revocation) = data.payload() {
            self.check_revocation_target(subject_id, revocation.original_transaction_id)
                .await?;
        }

        let tx = IssuanceTransaction::new(subject_id.to_string(), tx_type, data);
        self.store.create(&tx).await?;
        info!(
            transaction_id = %tx.id,
            subject_id = %tx.subject_id,
            tx_type = %tx.tx_type,
            schema = tx.credential_data.payload().schema(),
            "Transaction created"
        );
        Ok(tx.id)
    }

    async fn check_revocation_target(
        &self,
        subject_id: &str,
        original: TransactionId,
    ) -> Result<(), IssuanceError> {
        let target = self
            .store
            .get_by_id(original)
            .await?
            .ok_or_else(|| IssuanceError::InvalidRevocationTarget(format!("{} does not exist", original)))?;

        if target.tx_type != TransactionType::CredentialIssuance {
            return Err(IssuanceError::InvalidRevocationTarget(format!(
                "{} is a {}",
                original, target.tx_type
            )));
        }
        if target.status != TransactionStatus::IssuanceComplete {
            return Err(IssuanceError::InvalidRevocationTarget(format!(
                "{} is {}",
                original, target.status
            )));
        }
        if target.subject_id != subject_id {
            return Err(IssuanceError::InvalidRevocationTarget(format!(
                "{} belongs to another subject",
                original
            )));
        }
        Ok(())
    }

    /// PENDING_PAYMENT -> PENDING_ISSUANCE | PAYMENT_FAILED
    ///
    /// Returns the status after the call. An undecided payment returns
    /// PENDING_PAYMENT; calling again is safe.
    pub async fn confirm_payment(&self, id: TransactionId) -> Result<TransactionStatus, IssuanceError> {
        let tx = self.load(id).await?;
        match tx.status {
            TransactionStatus::PendingPayment => {}
            // Payment already confirmed; same outcome, nothing to do
            TransactionStatus::PendingIssuance
            | TransactionStatus::IssuanceComplete
            | TransactionStatus::IssuanceFailed => return Ok(tx.status),
            TransactionStatus::PaymentFailed => {
                return Err(IssuanceError::InvalidTransition {
                    operation: "confirm_payment",
                    from: tx.status,
                });
            }
        }

        let outcome = if self.mint_fee == 0 {
            debug!(transaction_id = %id, "Mint fee is zero, payment waived");
            CallOutcome::Success(PaymentConfirmation {
                payment_reference: WAIVED_PAYMENT_REFERENCE.to_string(),
            })
        } else {
            let key = IdempotencyKey::payment(id);
            guarded_call("payment.confirm", self.timeouts.payment, self.payment.confirm(&key)).await
        };

        match outcome {
            CallOutcome::Success(confirmation) => {
                info!(
                    transaction_id = %id,
                    payment_reference = %confirmation.payment_reference,
                    "Payment confirmed"
                );
                self.transition(
                    id,
                    TransactionStatus::PendingPayment,
                    TransactionStatus::PendingIssuance,
                    TransitionFields::payment(confirmation.payment_reference),
                )
                .await
            }
            CallOutcome::Permanent(reason) => {
                warn!(transaction_id = %id, gateway = self.payment.name(), reason = %reason, "Payment declined");
                self.transition(
                    id,
                    TransactionStatus::PendingPayment,
                    TransactionStatus::PaymentFailed,
                    TransitionFields::error(
                        ErrorDetail::new(FailureKind::Permanent, reason).with_context(self.payment.name()),
                    ),
                )
                .await
            }
            CallOutcome::Transient(reason) | CallOutcome::Unknown(reason) => {
                warn!(
                    transaction_id = %id,
                    gateway = self.payment.name(),
                    reason = %reason,
                    "Payment outcome not decided, staying in PENDING_PAYMENT"
                );
                Ok(TransactionStatus::PendingPayment)
            }
        }
    }

    /// PENDING_ISSUANCE -> ISSUANCE_COMPLETE | ISSUANCE_FAILED
    ///
    /// The mint key is derived from the transaction id, so a retry after a
    /// lost response returns the first token instead of minting another.
    pub async fn issue(&self, id: TransactionId) -> Result<TransactionStatus, IssuanceError> {
        let tx = self.load(id).await?;
        match tx.status {
            TransactionStatus::PendingIssuance => {}
            // The mint already has its final outcome; repeating it changes nothing
            TransactionStatus::IssuanceComplete | TransactionStatus::IssuanceFailed => {
                return Ok(tx.status);
            }
            from => {
                return Err(IssuanceError::InvalidTransition {
                    operation: "issue",
                    from,
                });
            }
        }

        let Some(attempt) = self
            .store
            .record_issue_attempt(id, TransactionStatus::PendingIssuance)
            .await?
        else {
            // Moved on between load and here
            return Ok(self.load(id).await?.status);
        };

        let key = IdempotencyKey::mint(id);
        let outcome = guarded_call(
            "ledger.mint",
            self.timeouts.ledger,
            self.ledger.mint(&key, &tx.credential_data),
        )
        .await;

        match outcome {
            CallOutcome::Success(receipt) => {
                let status = self
                    .transition(
                        id,
                        TransactionStatus::PendingIssuance,
                        TransactionStatus::IssuanceComplete,
                        TransitionFields::issuance(receipt.token_reference.clone()),
                    )
                    .await?;
                info!(
                    transaction_id = %id,
                    token = %receipt.token_reference,
                    attempts = attempt,
                    "Credential minted"
                );
                Ok(status)
            }
            CallOutcome::Permanent(reason) => {
                error!(
                    transaction_id = %id,
                    ledger = self.ledger.name(),
                    attempts = attempt,
                    reason = %reason,
                    "Ledger rejected mint"
                );
                self.transition(
                    id,
                    TransactionStatus::PendingIssuance,
                    TransactionStatus::IssuanceFailed,
                    TransitionFields::error(
                        ErrorDetail::new(FailureKind::Permanent, reason)
                            .with_context(format!("{} attempt {}", self.ledger.name(), attempt)),
                    ),
                )
                .await
            }
            CallOutcome::Transient(reason) | CallOutcome::Unknown(reason) => {
                warn!(
                    transaction_id = %id,
                    ledger = self.ledger.name(),
                    attempts = attempt,
                    reason = %reason,
                    "Mint outcome not decided, staying in PENDING_ISSUANCE"
                );
                Ok(TransactionStatus::PendingIssuance)
            }
        }
    }

    /// Run `confirm_payment` then `issue` as far as the outcomes allow
    pub async fn process(&self, id: TransactionId) -> Result<TransactionStatus, IssuanceError> {
        let status = self.confirm_payment(id).await?;
        if status == TransactionStatus::PendingIssuance {
            return self.issue(id).await;
        }
        Ok(status)
    }

    /// Run `process` on every id independently.
    ///
    /// One item's decline, mint failure or error never stops the others.
    pub async fn process_batch(&self, ids: &[TransactionId]) -> Result<BatchReport, IssuanceError> {
        if ids.len() > MAX_BATCH_SIZE {
            return Err(IssuanceError::Validation(format!(
                "batch of {} transactions exceeds the limit of {}",
                ids.len(),
                MAX_BATCH_SIZE
            )));
        }

        let total = ids.len();
        let mut report = BatchReport::default();
        let mut results = futures::stream::iter(ids.iter().copied())
            .map(|id| async move {
                BatchItem {
                    transaction_id: id,
                    result: self.process(id).await,
                }
            })
            .buffered(BATCH_CONCURRENCY);

        while let Some(item) = results.next().await {
            if item.is_successful() {
                report.successful += 1;
            } else if item.is_failed() {
                report.failed += 1;
            } else {
                report.pending += 1;
            }
            if let Err(e) = &item.result {
                warn!(transaction_id = %item.transaction_id, error = %e, "Batch item failed");
            }
            report.items.push(item);
            debug!(done = report.items.len(), total, "Batch progress");
        }

        info!(
            total,
            successful = report.successful,
            failed = report.failed,
            pending = report.pending,
            "Batch processed"
        );
        Ok(report)
    }

    pub async fn get_transaction_status(&self, id: TransactionId) -> Result<IssuanceTransaction, IssuanceError> {
        self.load(id).await
    }

    /// Ask the ledger whether the minted token still exists
    pub async fn verify_issuance(&self, id: TransactionId) -> Result<CallOutcome<TokenStatus>, IssuanceError> {
        let tx = self.load(id).await?;
        let reference = match (tx.status, tx.issuance_reference) {
            (TransactionStatus::IssuanceComplete, Some(reference)) => reference,
            (from, _) => {
                return Err(IssuanceError::InvalidTransition {
                    operation: "verify_issuance",
                    from,
                });
            }
        };
        Ok(guarded_call(
            "ledger.token_status",
            self.timeouts.ledger,
            self.ledger.token_status(&reference),
        )
        .await)
    }

    async fn load(&self, id: TransactionId) -> Result<IssuanceTransaction, IssuanceError> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| IssuanceError::TransactionNotFound(id.to_string()))
    }

    /// CAS `expected -> next`; on a lost race report whatever the winner wrote
    async fn transition(
        &self,
        id: TransactionId,
        expected: TransactionStatus,
        next: TransactionStatus,
        fields: TransitionFields,
    ) -> Result<TransactionStatus, IssuanceError> {
        debug_assert!(expected.can_transition_to(next));

        if self
            .store
            .conditional_update_status(id, expected, next, fields)
            .await?
        {
            debug!(transaction_id = %id, from = %expected, to = %next, "Transition applied");
            if next == TransactionStatus::IssuanceComplete
                && let Some(trigger) = &self.anchor_trigger
            {
                trigger.notify(id);
            }
            return Ok(next);
        }

        let current = self.load(id).await?;
        if current.status != next {
            warn!(
                transaction_id = %id,
                wanted = %next,
                actual = %current.status,
                "Lost transition race; keeping the recorded outcome"
            );
        }
        Ok(current.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuance::adapters::mock::{Behavior, MockLedger, MockPaymentGateway};
    use crate::issuance::anchoring::anchor_channel;
    use crate::issuance::credential::fixtures::{academic_json, revocation_json};
    use crate::issuance::store::MemoryTransactionStore;

    struct Harness {
        store: Arc<MemoryTransactionStore>,
        payment: Arc<MockPaymentGateway>,
        ledger: Arc<MockLedger>,
        coordinator: IssuanceCoordinator,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryTransactionStore::new());
        let payment = Arc::new(MockPaymentGateway::new());
        let ledger = Arc::new(MockLedger::new());
        let coordinator = IssuanceCoordinator::new(store.clone(), payment.clone(), ledger.clone());
        Harness {
            store,
            payment,
            ledger,
            coordinator,
        }
    }

    async fn create(h: &Harness) -> TransactionId {
        h.coordinator
            .create_transaction("univ-1", TransactionType::CredentialIssuance, academic_json("Juan Perez"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_validates_subject_and_schema() {
        let h = harness();
        assert!(matches!(
            h.coordinator
                .create_transaction("  ", TransactionType::CredentialIssuance, academic_json("A"))
                .await,
            Err(IssuanceError::InvalidSubject)
        ));
        assert!(matches!(
            h.coordinator
                .create_transaction("univ-1", TransactionType::CredentialRevocation, academic_json("A"))
                .await,
            Err(IssuanceError::SchemaMismatch(_))
        ));
        assert!(matches!(
            h.coordinator
                .create_transaction("univ-1", TransactionType::CredentialIssuance, b"{}".to_vec())
                .await,
            Err(IssuanceError::Validation(_))
        ));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_oversized_subject() {
        let h = harness();
        let at_limit = "u".repeat(MAX_SUBJECT_ID_LEN);
        h.coordinator
            .create_transaction(&at_limit, TransactionType::CredentialIssuance, academic_json("A"))
            .await
            .unwrap();

        let too_long = "u".repeat(MAX_SUBJECT_ID_LEN + 1);
        let err = h
            .coordinator
            .create_transaction(&too_long, TransactionType::CredentialIssuance, academic_json("A"))
            .await
            .unwrap_err();
        assert!(matches!(err, IssuanceError::Validation(_)));
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn test_confirm_payment_pending_then_confirmed() {
        let h = harness();
        let id = create(&h).await;

        h.payment.push(Behavior::Transient("gateway 503"));
        assert_eq!(
            h.coordinator.confirm_payment(id).await.unwrap(),
            TransactionStatus::PendingPayment
        );
        let tx = h.store.get_by_id(id).await.unwrap().unwrap();
        assert!(tx.payment_reference.is_none());
        assert!(tx.error_detail.is_none());

        assert_eq!(
            h.coordinator.confirm_payment(id).await.unwrap(),
            TransactionStatus::PendingIssuance
        );
        // Repeat is a no-op and does not call the gateway again
        assert_eq!(
            h.coordinator.confirm_payment(id).await.unwrap(),
            TransactionStatus::PendingIssuance
        );
        assert_eq!(h.payment.confirm_count(), 2);
    }

    #[tokio::test]
    async fn test_fee_waiver_skips_gateway() {
        let h = harness();
        let coordinator = IssuanceCoordinator::new(h.store.clone(), h.payment.clone(), h.ledger.clone())
            .with_mint_fee(0);
        let id = create(&h).await;

        assert_eq!(
            coordinator.confirm_payment(id).await.unwrap(),
            TransactionStatus::PendingIssuance
        );
        assert_eq!(h.payment.confirm_count(), 0);
        let tx = h.store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(tx.payment_reference.as_deref(), Some(WAIVED_PAYMENT_REFERENCE));
    }

    #[tokio::test]
    async fn test_issue_requires_payment() {
        let h = harness();
        let id = create(&h).await;
        let err = h.coordinator.issue(id).await.unwrap_err();
        assert!(matches!(
            err,
            IssuanceError::InvalidTransition {
                operation: "issue",
                from: TransactionStatus::PendingPayment
            }
        ));
        assert_eq!(h.ledger.mint_calls(), 0);
    }

    #[tokio::test]
    async fn test_permanent_mint_failure() {
        let h = harness();
        let id = create(&h).await;
        h.coordinator.confirm_payment(id).await.unwrap();

        h.ledger.push(Behavior::Permanent("INVALID_TOKEN_METADATA"));
        assert_eq!(
            h.coordinator.issue(id).await.unwrap(),
            TransactionStatus::IssuanceFailed
        );
        let tx = h.store.get_by_id(id).await.unwrap().unwrap();
        let detail = tx.error_detail.unwrap();
        assert_eq!(detail.kind, FailureKind::Permanent);
        assert_eq!(detail.message, "INVALID_TOKEN_METADATA");

        // Repeating reports the recorded outcome without minting again
        assert_eq!(
            h.coordinator.issue(id).await.unwrap(),
            TransactionStatus::IssuanceFailed
        );
        assert_eq!(h.ledger.mint_calls(), 1);
    }

    #[tokio::test]
    async fn test_process_batch_isolates_items() {
        let h = harness();
        let mut ids = Vec::new();
        for student in ["Ana", "Luis", "Eva"] {
            ids.push(
                h.coordinator
                    .create_transaction("univ-1", TransactionType::CredentialIssuance, academic_json(student))
                    .await
                    .unwrap(),
            );
        }
        let unknown = TransactionId::new();
        ids.push(unknown);

        // Items run concurrently, so give the first payment decision a decline
        // and make sure only one item can receive it
        h.payment.push(Behavior::Permanent("card declined"));
        let report = h.coordinator.process_batch(&ids).await.unwrap();

        assert_eq!(report.items.len(), 4);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.pending, 0);
        assert_eq!(h.ledger.mint_calls(), 2);

        // Per-item results stay in request order
        let order: Vec<TransactionId> = report.items.iter().map(|i| i.transaction_id).collect();
        assert_eq!(order, ids);
        assert!(matches!(
            report.items[3].result,
            Err(IssuanceError::TransactionNotFound(_))
        ));
        let declined: Vec<&BatchItem> = report
            .items
            .iter()
            .filter(|i| matches!(i.result, Ok(TransactionStatus::PaymentFailed)))
            .collect();
        assert_eq!(declined.len(), 1);
    }

    #[tokio::test]
    async fn test_process_batch_reports_pending_and_limit() {
        let h = harness();
        let id = create(&h).await;
        h.payment.push(Behavior::Transient("gateway 503"));

        let report = h.coordinator.process_batch(&[id]).await.unwrap();
        assert_eq!(report.pending, 1);
        assert_eq!(report.successful + report.failed, 0);

        let too_many = vec![id; MAX_BATCH_SIZE + 1];
        assert!(matches!(
            h.coordinator.process_batch(&too_many).await,
            Err(IssuanceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_issue_counts_attempts() {
        let h = harness();
        let id = create(&h).await;
        h.coordinator.confirm_payment(id).await.unwrap();

        h.ledger.push(Behavior::Transient("BUSY"));
        h.coordinator.issue(id).await.unwrap();
        h.coordinator.issue(id).await.unwrap();

        let tx = h.store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::IssuanceComplete);
        assert_eq!(tx.issue_attempts, 2);
        assert!(tx.last_attempt_at.is_some());
    }

    #[tokio::test]
    async fn test_completion_fires_trigger_once() {
        let h = harness();
        let (trigger, mut receiver) = anchor_channel(8);
        let coordinator = IssuanceCoordinator::new(h.store.clone(), h.payment.clone(), h.ledger.clone())
            .with_anchor_trigger(trigger);
        let id = create(&h).await;

        assert_eq!(
            coordinator.process(id).await.unwrap(),
            TransactionStatus::IssuanceComplete
        );
        // Idempotent repeat does not re-trigger
        coordinator.issue(id).await.unwrap();

        assert_eq!(receiver.try_recv(), Some(id));
        assert_eq!(receiver.try_recv(), None);
    }

    #[tokio::test]
    async fn test_revocation_target_rules() {
        let h = harness();
        let original = create(&h).await;

        // Not complete yet
        assert!(matches!(
            h.coordinator
                .create_transaction("univ-1", TransactionType::CredentialRevocation, revocation_json(original))
                .await,
            Err(IssuanceError::InvalidRevocationTarget(_))
        ));

        h.coordinator.process(original).await.unwrap();

        assert!(matches!(
            h.coordinator
                .create_transaction("univ-2", TransactionType::CredentialRevocation, revocation_json(original))
                .await,
            Err(IssuanceError::InvalidRevocationTarget(_))
        ));
        assert!(matches!(
            h.coordinator
                .create_transaction(
                    "univ-1",
                    TransactionType::CredentialRevocation,
                    revocation_json(TransactionId::new())
                )
                .await,
            Err(IssuanceError::InvalidRevocationTarget(_))
        ));

        let revocation = h
            .coordinator
            .create_transaction("univ-1", TransactionType::CredentialRevocation, revocation_json(original))
            .await
            .unwrap();
        let tx = h.coordinator.get_transaction_status(revocation).await.unwrap();
        assert_eq!(tx.credential_data.revokes(), Some(original));

        // The original record is untouched
        let original_tx = h.coordinator.get_transaction_status(original).await.unwrap();
        assert_eq!(original_tx.status, TransactionStatus::IssuanceComplete);
    }

    #[tokio::test]
    async fn test_verify_issuance() {
        let h = harness();
        let id = create(&h).await;
        assert!(h.coordinator.verify_issuance(id).await.is_err());

        h.coordinator.process(id).await.unwrap();
        assert_eq!(
            h.coordinator.verify_issuance(id).await.unwrap(),
            CallOutcome::Success(TokenStatus::Active)
        );

        let token = h
            .coordinator
            .get_transaction_status(id)
            .await
            .unwrap()
            .issuance_reference
            .unwrap();
        h.ledger.revoke(&token);
        assert_eq!(
            h.coordinator.verify_issuance(id).await.unwrap(),
            CallOutcome::Success(TokenStatus::Revoked)
        );
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let h = harness();
        assert!(matches!(
            h.coordinator.confirm_payment(TransactionId::new()).await,
            Err(IssuanceError::TransactionNotFound(_))
        ));
    }
}
