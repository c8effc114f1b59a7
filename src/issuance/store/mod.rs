//! Transaction Store
//!
//! Durable record of every issuance transaction and its anchor records; the
//! single source of truth for recovery. Every mutation is a conditional
//! (compare-and-set) update so concurrent coordinator and sweeper activity on
//! the same record cannot lose updates.

pub mod memory;
pub mod postgres;

pub use memory::MemoryTransactionStore;
pub use postgres::PgTransactionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StoreError;
use super::state::{AnchorStatus, TransactionStatus};
use super::types::{
    AnchorRecord, AnchorUpdate, ChainId, IssuanceTransaction, TransactionId, TransitionFields,
};

#[async_trait]
pub trait TransactionStore: Send + Sync {
    // === Issuance transactions ===

    /// Insert a new transaction. Fails with `Duplicate` if the id exists.
    async fn create(&self, tx: &IssuanceTransaction) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: TransactionId) -> Result<Option<IssuanceTransaction>, StoreError>;

    /// Atomic CAS: apply `new_status` and `fields` only if the current status is `expected`.
    ///
    /// Returns false if the status no longer matches (another worker moved it).
    /// `updated_at` is bumped on success and never moves backwards.
    async fn conditional_update_status(
        &self,
        id: TransactionId,
        expected: TransactionStatus,
        new_status: TransactionStatus,
        fields: TransitionFields,
    ) -> Result<bool, StoreError>;

    /// Count one ledger mint attempt if the status is still `expected`.
    ///
    /// Returns the new attempt count, or None if the status moved on.
    async fn record_issue_attempt(
        &self,
        id: TransactionId,
        expected: TransactionStatus,
    ) -> Result<Option<u32>, StoreError>;

    /// Transactions in `status` whose `updated_at` is older than `older_than`, oldest first
    async fn list_stale(
        &self,
        status: TransactionStatus,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IssuanceTransaction>, StoreError>;

    /// PENDING_ISSUANCE transactions older than `older_than` with fewer than `max_attempts` mint attempts,
    /// least recently attempted first
    async fn list_issue_candidates(
        &self,
        older_than: DateTime<Utc>,
        max_attempts: u32,
        limit: usize,
    ) -> Result<Vec<IssuanceTransaction>, StoreError>;

    /// PENDING_ISSUANCE transactions that used up `max_attempts`; left for an operator
    async fn list_issue_exhausted(
        &self,
        max_attempts: u32,
        limit: usize,
    ) -> Result<Vec<IssuanceTransaction>, StoreError>;

    /// ISSUANCE_COMPLETE transactions older than `older_than` missing a record for any of `chains`
    async fn list_missing_anchors(
        &self,
        chains: &[ChainId],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IssuanceTransaction>, StoreError>;

    // === Anchor records ===

    /// Insert unless a record for (transaction, chain) already exists.
    ///
    /// Returns true if this call created the record.
    async fn insert_anchor_if_absent(&self, record: &AnchorRecord) -> Result<bool, StoreError>;

    async fn get_anchor(
        &self,
        id: TransactionId,
        chain: &ChainId,
    ) -> Result<Option<AnchorRecord>, StoreError>;

    /// All anchor records of one transaction, ordered by chain
    async fn list_anchors(&self, id: TransactionId) -> Result<Vec<AnchorRecord>, StoreError>;

    /// Atomic CAS on (status, attempts)
    async fn conditional_update_anchor(
        &self,
        id: TransactionId,
        chain: &ChainId,
        expected_status: AnchorStatus,
        expected_attempts: u32,
        update: AnchorUpdate,
    ) -> Result<bool, StoreError>;

    /// Retryable FAILED records, plus PENDING records whose last activity is older than `stuck_before`.
    ///
    /// Records failed with a PERMANENT or EXHAUSTED error are never candidates.
    async fn list_anchor_candidates(
        &self,
        stuck_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AnchorRecord>, StoreError>;

    /// FAILED records that will not be retried again
    async fn list_anchors_for_review(&self, limit: usize) -> Result<Vec<AnchorRecord>, StoreError>;
}

/// `updated_at` for a transition: now, but never earlier than the previous value
pub(crate) fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous { now } else { previous + chrono::Duration::microseconds(1) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_timestamp_monotonic() {
        let future = Utc::now() + chrono::Duration::seconds(60);
        assert!(next_timestamp(future) > future);

        let past = Utc::now() - chrono::Duration::seconds(60);
        assert!(next_timestamp(past) > past);
    }
}
