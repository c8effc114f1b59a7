//! In-memory transaction store
//!
//! `DashMap`-backed; each CAS runs under the shard lock of its key, which makes
//! the check and the write one atomic step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{TransactionStore, next_timestamp};
use crate::issuance::error::StoreError;
use crate::issuance::state::{AnchorStatus, TransactionStatus};
use crate::issuance::types::{
    AnchorRecord, AnchorUpdate, ChainId, IssuanceTransaction, TransactionId, TransitionFields,
};

#[derive(Debug, Default)]
pub struct MemoryTransactionStore {
    transactions: DashMap<TransactionId, IssuanceTransaction>,
    anchors: DashMap<(TransactionId, ChainId), AnchorRecord>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Test hook: age only the last transition, leaving `last_attempt_at` as is
    #[cfg(test)]
    pub fn backdate_transition(&self, id: TransactionId, by: chrono::Duration) {
        if let Some(mut tx) = self.transactions.get_mut(&id) {
            tx.updated_at -= by;
        }
    }

    /// Test hook: age a record so it looks stale to the sweeper
    #[cfg(test)]
    pub fn backdate(&self, id: TransactionId, by: chrono::Duration) {
        if let Some(mut tx) = self.transactions.get_mut(&id) {
            tx.updated_at -= by;
            tx.last_attempt_at = tx.last_attempt_at.map(|t| t - by);
        }
        for mut entry in self.anchors.iter_mut() {
            if entry.key().0 == id {
                entry.created_at -= by;
                entry.last_attempt_at = entry.last_attempt_at.map(|t| t - by);
            }
        }
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn create(&self, tx: &IssuanceTransaction) -> Result<(), StoreError> {
        match self.transactions.entry(tx.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(tx.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(tx.clone());
                Ok(())
            }
        }
    }

    async fn get_by_id(&self, id: TransactionId) -> Result<Option<IssuanceTransaction>, StoreError> {
        Ok(self.transactions.get(&id).map(|r| r.clone()))
    }

    async fn conditional_update_status(
        &self,
        id: TransactionId,
        expected: TransactionStatus,
        new_status: TransactionStatus,
        fields: TransitionFields,
    ) -> Result<bool, StoreError> {
        let Some(mut tx) = self.transactions.get_mut(&id) else {
            return Ok(false);
        };
        if tx.status != expected {
            return Ok(false);
        }
        tx.status = new_status;
        if let Some(reference) = fields.payment_reference {
            tx.payment_reference = Some(reference);
        }
        if let Some(reference) = fields.issuance_reference {
            tx.issuance_reference = Some(reference);
        }
        if let Some(detail) = fields.error_detail {
            tx.error_detail = Some(detail);
        }
        tx.updated_at = next_timestamp(tx.updated_at);
        Ok(true)
    }

    async fn record_issue_attempt(
        &self,
        id: TransactionId,
        expected: TransactionStatus,
    ) -> Result<Option<u32>, StoreError> {
        let Some(mut tx) = self.transactions.get_mut(&id) else {
            return Ok(None);
        };
        if tx.status != expected {
            return Ok(None);
        }
        tx.issue_attempts += 1;
        tx.last_attempt_at = Some(Utc::now());
        Ok(Some(tx.issue_attempts))
    }

    async fn list_stale(
        &self,
        status: TransactionStatus,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IssuanceTransaction>, StoreError> {
        let mut stale: Vec<IssuanceTransaction> = self
            .transactions
            .iter()
            .filter(|tx| tx.status == status && tx.updated_at < older_than)
            .map(|tx| tx.clone())
            .collect();
        stale.sort_by_key(|tx| tx.updated_at);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn list_issue_candidates(
        &self,
        older_than: DateTime<Utc>,
        max_attempts: u32,
        limit: usize,
    ) -> Result<Vec<IssuanceTransaction>, StoreError> {
        let mut candidates: Vec<IssuanceTransaction> = self
            .transactions
            .iter()
            .filter(|tx| {
                tx.status == TransactionStatus::PendingIssuance
                    && tx.updated_at < older_than
                    && tx.issue_attempts < max_attempts
            })
            .map(|tx| tx.clone())
            .collect();
        candidates.sort_by_key(|tx| tx.last_attempt_at.unwrap_or(tx.updated_at));
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn list_issue_exhausted(
        &self,
        max_attempts: u32,
        limit: usize,
    ) -> Result<Vec<IssuanceTransaction>, StoreError> {
        let mut exhausted: Vec<IssuanceTransaction> = self
            .transactions
            .iter()
            .filter(|tx| {
                tx.status == TransactionStatus::PendingIssuance && tx.issue_attempts >= max_attempts
            })
            .map(|tx| tx.clone())
            .collect();
        exhausted.sort_by_key(|tx| tx.updated_at);
        exhausted.truncate(limit);
        Ok(exhausted)
    }

    async fn list_missing_anchors(
        &self,
        chains: &[ChainId],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IssuanceTransaction>, StoreError> {
        let mut missing: Vec<IssuanceTransaction> = self
            .transactions
            .iter()
            .filter(|tx| {
                tx.status == TransactionStatus::IssuanceComplete && tx.updated_at < older_than
            })
            .filter(|tx| {
                chains
                    .iter()
                    .any(|chain| !self.anchors.contains_key(&(tx.id, chain.clone())))
            })
            .map(|tx| tx.clone())
            .collect();
        missing.sort_by_key(|tx| tx.updated_at);
        missing.truncate(limit);
        Ok(missing)
    }

    async fn insert_anchor_if_absent(&self, record: &AnchorRecord) -> Result<bool, StoreError> {
        match self
            .anchors
            .entry((record.transaction_id, record.chain.clone()))
        {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn get_anchor(
        &self,
        id: TransactionId,
        chain: &ChainId,
    ) -> Result<Option<AnchorRecord>, StoreError> {
        Ok(self.anchors.get(&(id, chain.clone())).map(|r| r.clone()))
    }

    async fn list_anchors(&self, id: TransactionId) -> Result<Vec<AnchorRecord>, StoreError> {
        let mut records: Vec<AnchorRecord> = self
            .anchors
            .iter()
            .filter(|r| r.transaction_id == id)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| a.chain.cmp(&b.chain));
        Ok(records)
    }

    async fn conditional_update_anchor(
        &self,
        id: TransactionId,
        chain: &ChainId,
        expected_status: AnchorStatus,
        expected_attempts: u32,
        update: AnchorUpdate,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = self.anchors.get_mut(&(id, chain.clone())) else {
            return Ok(false);
        };
        if record.status != expected_status || record.attempts != expected_attempts {
            return Ok(false);
        }
        record.status = update.status;
        record.attempts = update.attempts;
        if update.chain_tx_reference.is_some() {
            record.chain_tx_reference = update.chain_tx_reference;
        }
        if update.last_attempt_at.is_some() {
            record.last_attempt_at = update.last_attempt_at;
        }
        record.last_error = update.last_error;
        Ok(true)
    }

    async fn list_anchor_candidates(
        &self,
        stuck_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AnchorRecord>, StoreError> {
        let mut candidates: Vec<AnchorRecord> = self
            .anchors
            .iter()
            .filter(|r| match r.status {
                AnchorStatus::Failed => !r.is_permanently_failed(),
                AnchorStatus::Pending => {
                    r.last_attempt_at.unwrap_or(r.created_at) < stuck_before
                }
                AnchorStatus::Anchored => false,
            })
            .map(|r| r.clone())
            .collect();
        candidates.sort_by_key(|r| r.last_attempt_at.unwrap_or(r.created_at));
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn list_anchors_for_review(&self, limit: usize) -> Result<Vec<AnchorRecord>, StoreError> {
        let mut records: Vec<AnchorRecord> = self
            .anchors
            .iter()
            .filter(|r| r.is_permanently_failed())
            .map(|r| r.clone())
            .collect();
        records.sort_by_key(|r| r.last_attempt_at.unwrap_or(r.created_at));
        records.truncate(limit);
        Ok(records)
    }
}
