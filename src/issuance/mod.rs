//! Credential Issuance Pipeline
//!
//! Moves a credential issuance transaction through payment confirmation and
//! minting on the primary ledger, then anchors the certificate hash on every
//! configured secondary chain.
//!
//! # State Machine
//!
//! ```text
//! PENDING_PAYMENT → PENDING_ISSUANCE → ISSUANCE_COMPLETE ⇒ anchoring (per chain)
//!        ↓                 ↓                                PENDING → ANCHORED
//!  PAYMENT_FAILED    ISSUANCE_FAILED                                ↘ FAILED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **CAS Transitions**: every status change is `update ... where status = expected`
//! 2. **Explicit Fail Rule**: only a `Permanent` outcome fails a transaction; timeouts are `Unknown`
//! 3. **Idempotency**: payment, mint and anchor calls carry keys derived from the transaction id
//! 4. **Chain Isolation**: one chain's anchor record never touches another's or the transaction

pub mod adapters;
pub mod anchoring;
pub mod api;
pub mod coordinator;
pub mod credential;
pub mod error;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod types;


// Re-exports for convenience
pub use adapters::{AnchorClient, CallTimeouts, LedgerClient, PaymentGateway, TokenStatus};
pub use anchoring::{AnchorReceiver, AnchorTrigger, AnchoringCoordinator, anchor_channel};
pub use coordinator::{BatchItem, BatchReport, IssuanceCoordinator};
pub use credential::{AnchorMemo, CredentialData, CredentialPayload, certificate_hash};
pub use error::{IssuanceError, StoreError};
pub use state::{AnchorStatus, TransactionStatus};
pub use store::{MemoryTransactionStore, PgTransactionStore, TransactionStore};
pub use sweeper::{ReconciliationSweeper, RetryPolicy, ReviewList, SweepReport, SweeperConfig};
pub use types::{
    AnchorRecord, CallOutcome, ChainId, ErrorDetail, FailureKind, IdempotencyKey, IssuanceTransaction,
    TransactionId, TransactionType,
};
