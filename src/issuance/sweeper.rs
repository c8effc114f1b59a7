//! Reconciliation Sweeper
//!
//! Periodic scan for work the live path left unfinished:
//! - PENDING_ISSUANCE transactions past the retry deadline: `issue` again
//! - FAILED or stuck PENDING anchor records: re-submit
//! - ISSUANCE_COMPLETE transactions missing anchor records: anchor them
//!
//! Each eligible item gets at most one attempt per cycle. Items that used up
//! their attempts are never retried again; they are listed by
//! [`ReconciliationSweeper::needs_review`] for an operator.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::anchoring::AnchoringCoordinator;
use super::coordinator::IssuanceCoordinator;
use super::error::IssuanceError;
use super::state::{AnchorStatus, TransactionStatus};
use super::store::TransactionStore;
use super::types::{AnchorRecord, AnchorUpdate, ErrorDetail, FailureKind, IssuanceTransaction};

/// Candidates fetched per batch slot; most of a batch may still be backing off
const CANDIDATE_OVERFETCH: usize = 4;

/// Exponential backoff with a cap and proportional jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the delay added or removed at random, 0.0..=1.0
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max: Duration::from_secs(30 * 60),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay before attempt `attempts + 1`
    pub fn delay(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        self.base.saturating_mul(1u32 << exp).min(self.max)
    }

    pub fn jittered_delay(&self, attempts: u32) -> Duration {
        let delay = self.delay(attempts);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
        delay.mul_f64(factor)
    }

    /// Whether enough time passed since the last attempt
    pub fn is_due(&self, last_attempt_at: Option<DateTime<Utc>>, attempts: u32, now: DateTime<Utc>) -> bool {
        let Some(last) = last_attempt_at else {
            return true;
        };
        let elapsed = (now - last).to_std().unwrap_or_default();
        elapsed >= self.jittered_delay(attempts)
    }
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between cycles
    pub interval: Duration,
    /// How long a transaction sits in PENDING_ISSUANCE before the sweeper takes over
    pub issue_retry_after: Duration,
    /// How long an anchor record may stay PENDING before it counts as stuck
    pub anchor_retry_after: Duration,
    pub max_issue_attempts: u32,
    pub max_anchor_attempts: u32,
    /// Maximum items per category per cycle
    pub batch_size: usize,
    pub backoff: RetryPolicy,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            issue_retry_after: Duration::from_secs(60),
            anchor_retry_after: Duration::from_secs(120),
            max_issue_attempts: 5,
            max_anchor_attempts: 5,
            batch_size: 100,
            backoff: RetryPolicy::default(),
        }
    }
}

/// Counters for one sweep cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub issue_retried: usize,
    pub issue_completed: usize,
    pub issue_failed: usize,
    pub anchors_retried: usize,
    pub anchors_anchored: usize,
    pub anchors_exhausted: usize,
    pub anchoring_resumed: usize,
    /// Store or coordinator errors; the affected items are retried next cycle
    pub errors: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Records that will not make progress without an operator
#[derive(Debug, Clone, Default)]
pub struct ReviewList {
    /// PENDING_ISSUANCE with all mint attempts used
    pub transactions: Vec<IssuanceTransaction>,
    /// FAILED anchor records with a permanent or exhausted error
    pub anchors: Vec<AnchorRecord>,
}

pub struct ReconciliationSweeper {
    store: Arc<dyn TransactionStore>,
    issuance: Arc<IssuanceCoordinator>,
    anchoring: Arc<AnchoringCoordinator>,
    config: SweeperConfig,
}

impl ReconciliationSweeper {
    pub fn new(
        issuance: Arc<IssuanceCoordinator>,
        anchoring: Arc<AnchoringCoordinator>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            store: issuance.store().clone(),
            issuance,
            anchoring,
            config,
        }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Sweep forever at the configured interval
    pub async fn run(&self) -> ! {
        info!(
            interval_secs = self.config.interval.as_secs(),
            issue_retry_after_secs = self.config.issue_retry_after.as_secs(),
            max_issue_attempts = self.config.max_issue_attempts,
            max_anchor_attempts = self.config.max_anchor_attempts,
            "Starting reconciliation sweeper"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.sweep_once().await;
            if report.is_empty() {
                debug!("Sweep found nothing to do");
            } else if report.errors > 0 {
                warn!(?report, "Sweep cycle finished with errors");
            } else {
                info!(?report, "Sweep cycle finished");
            }
        }
    }

    /// One full cycle. The passes run independently; an error in one pass or
    /// on one record is counted in `errors` and does not stop the rest.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = Utc::now();

        if let Err(e) = self.sweep_issuance(now, &mut report).await {
            report.errors += 1;
            error!(error = %e, "Issuance pass failed");
        }
        if let Err(e) = self.sweep_anchors(now, &mut report).await {
            report.errors += 1;
            error!(error = %e, "Anchor pass failed");
        }
        if let Err(e) = self.sweep_missing_anchors(now, &mut report).await {
            report.errors += 1;
            error!(error = %e, "Missing-anchor pass failed");
        }

        report
    }

    fn fetch_limit(&self) -> usize {
        self.config.batch_size.saturating_mul(CANDIDATE_OVERFETCH)
    }

    async fn sweep_issuance(&self, now: DateTime<Utc>, report: &mut SweepReport) -> Result<(), IssuanceError> {
        let cutoff = before(now, self.config.issue_retry_after);
        let candidates = self
            .store
            .list_issue_candidates(cutoff, self.config.max_issue_attempts, self.fetch_limit())
            .await?;

        let due = candidates
            .into_iter()
            .filter(|tx| {
                self.config
                    .backoff
                    .is_due(tx.last_attempt_at, tx.issue_attempts, now)
            })
            .take(self.config.batch_size);

        for tx in due {
            // Re-check right before acting; the live path may have finished it
            match self.store.get_by_id(tx.id).await {
                Ok(Some(current)) if current.status == TransactionStatus::PendingIssuance => {}
                Ok(_) => continue,
                Err(e) => {
                    report.errors += 1;
                    error!(transaction_id = %tx.id, error = %e, "Issue re-check failed");
                    continue;
                }
            }

            debug!(transaction_id = %tx.id, attempts = tx.issue_attempts, "Retrying issue");
            report.issue_retried += 1;
            match self.issuance.issue(tx.id).await {
                Ok(TransactionStatus::IssuanceComplete) => report.issue_completed += 1,
                Ok(TransactionStatus::IssuanceFailed) => report.issue_failed += 1,
                Ok(_) => {
                    if tx.issue_attempts + 1 >= self.config.max_issue_attempts {
                        warn!(
                            transaction_id = %tx.id,
                            attempts = tx.issue_attempts + 1,
                            "Issue attempts exhausted; transaction needs operator review"
                        );
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    error!(transaction_id = %tx.id, error = %e, "Issue retry failed");
                }
            }
        }
        Ok(())
    }

    async fn sweep_anchors(&self, now: DateTime<Utc>, report: &mut SweepReport) -> Result<(), IssuanceError> {
        let stuck_before = before(now, self.config.anchor_retry_after);
        let candidates = self
            .store
            .list_anchor_candidates(stuck_before, self.fetch_limit())
            .await?;

        let mut acted = 0;
        for record in candidates {
            if acted == self.config.batch_size {
                break;
            }
            if record.attempts >= self.config.max_anchor_attempts {
                acted += 1;
                match self.mark_exhausted(&record).await {
                    Ok(true) => report.anchors_exhausted += 1,
                    Ok(false) => {}
                    Err(e) => {
                        report.errors += 1;
                        error!(
                            transaction_id = %record.transaction_id,
                            chain = %record.chain,
                            error = %e,
                            "Marking anchor exhausted failed"
                        );
                    }
                }
                continue;
            }
            if record.status == AnchorStatus::Failed
                && !self
                    .config
                    .backoff
                    .is_due(record.last_attempt_at, record.attempts, now)
            {
                continue;
            }
            acted += 1;

            report.anchors_retried += 1;
            match self.anchoring.retry_anchor(&record).await {
                Ok(updated) if updated.status == AnchorStatus::Anchored => report.anchors_anchored += 1,
                Ok(_) => {}
                Err(e) => {
                    report.errors += 1;
                    error!(
                        transaction_id = %record.transaction_id,
                        chain = %record.chain,
                        error = %e,
                        "Anchor retry failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// FAILED for good; the CAS keeps a concurrent retry from being overwritten
    async fn mark_exhausted(&self, record: &AnchorRecord) -> Result<bool, IssuanceError> {
        let previous = record
            .last_error
            .as_ref()
            .map(|e| format!("{}: {}", e.kind.as_str(), e.message))
            .unwrap_or_else(|| "no error recorded".to_string());

        let update = AnchorUpdate {
            status: AnchorStatus::Failed,
            attempts: record.attempts,
            chain_tx_reference: None,
            last_attempt_at: None,
            last_error: Some(
                ErrorDetail::new(
                    FailureKind::Exhausted,
                    format!("gave up after {} attempts", record.attempts),
                )
                .with_context(previous),
            ),
        };
        let marked = self
            .store
            .conditional_update_anchor(
                record.transaction_id,
                &record.chain,
                record.status,
                record.attempts,
                update,
            )
            .await?;
        if marked {
            warn!(
                transaction_id = %record.transaction_id,
                chain = %record.chain,
                attempts = record.attempts,
                "Anchor attempts exhausted; record needs operator review"
            );
        }
        Ok(marked)
    }

    async fn sweep_missing_anchors(
        &self,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), IssuanceError> {
        let chains = self.anchoring.chains();
        if chains.is_empty() {
            return Ok(());
        }
        let cutoff = before(now, self.config.anchor_retry_after);
        let missing = self
            .store
            .list_missing_anchors(&chains, cutoff, self.config.batch_size)
            .await?;

        for tx in missing {
            info!(transaction_id = %tx.id, "Resuming anchoring for completed transaction");
            report.anchoring_resumed += 1;
            if let Err(e) = self.anchoring.anchor_transaction(&tx).await {
                report.errors += 1;
                error!(transaction_id = %tx.id, error = %e, "Resumed anchoring failed");
            }
        }
        Ok(())
    }

    pub async fn needs_review(&self) -> Result<ReviewList, IssuanceError> {
        Ok(ReviewList {
            transactions: self
                .store
                .list_issue_exhausted(self.config.max_issue_attempts, self.config.batch_size)
                .await?,
            anchors: self.store.list_anchors_for_review(self.config.batch_size).await?,
        })
    }
}

/// `now - d`, saturating at the earliest representable time
fn before(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
