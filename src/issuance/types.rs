//! Issuance Core Types
//!
//! Type definitions for the issuance FSM and the per-chain anchor records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::credential::CredentialData;
use super::state::{AnchorStatus, TransactionStatus};

/// Transaction ID - ULID-based unique identifier
///
/// Sortable by creation time, generated without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(ulid::Ulid);

impl TransactionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

impl Serialize for TransactionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransactionType {
    CredentialIssuance = 1,
    CredentialRevocation = 2,
}

impl TransactionType {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransactionType::CredentialIssuance),
            2 => Some(TransactionType::CredentialRevocation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::CredentialIssuance => "CREDENTIAL_ISSUANCE",
            TransactionType::CredentialRevocation => "CREDENTIAL_REVOCATION",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Secondary chain identifier ("XRP", "ALGORAND", ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub const XRP: &'static str = "XRP";
    pub const ALGORAND: &'static str = "ALGORAND";

    /// Chain identifiers are case-insensitive and normalized to upper case
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic key that makes a mutating external call safe to repeat.
///
/// Derived only from transaction identity (and chain for anchors), so every
/// retry of the same step presents the same key to the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn payment(id: TransactionId) -> Self {
        Self(format!("pay:{}", id))
    }

    pub fn mint(id: TransactionId) -> Self {
        Self(format!("mint:{}", id))
    }

    pub fn anchor(id: TransactionId, chain: &ChainId) -> Self {
        Self(format!("anchor:{}:{}", chain, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classified outcome of one external call.
///
/// Every capability interface returns this; callers must handle all kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome<T> {
    /// Operation completed successfully
    Success(T),
    /// External system rejected the operation definitively
    Permanent(String),
    /// Network or availability failure; the operation did not take effect
    Transient(String),
    /// Effect is indeterminate (timeout, lost response, unclassified error)
    Unknown(String),
}

impl<T> CallOutcome<T> {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    #[inline]
    pub fn is_permanent(&self) -> bool {
        matches!(self, CallOutcome::Permanent(_))
    }

    /// Transient or unknown: no state change, defer to reconciliation
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, CallOutcome::Transient(_) | CallOutcome::Unknown(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            CallOutcome::Success(_) => None,
            CallOutcome::Permanent(_) => Some(FailureKind::Permanent),
            CallOutcome::Transient(_) => Some(FailureKind::Transient),
            CallOutcome::Unknown(_) => Some(FailureKind::Unknown),
        }
    }
}

/// Failure classification recorded alongside an error message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    Validation,
    Permanent,
    Transient,
    Unknown,
    /// Retry budget used up; waiting for an operator
    Exhausted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "VALIDATION",
            FailureKind::Permanent => "PERMANENT",
            FailureKind::Transient => "TRANSIENT",
            FailureKind::Unknown => "UNKNOWN",
            FailureKind::Exhausted => "EXHAUSTED",
        }
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VALIDATION" => Ok(FailureKind::Validation),
            "PERMANENT" => Ok(FailureKind::Permanent),
            "TRANSIENT" => Ok(FailureKind::Transient),
            "UNKNOWN" => Ok(FailureKind::Unknown),
            "EXHAUSTED" => Ok(FailureKind::Exhausted),
            other => Err(format!("unknown failure kind: {}", other)),
        }
    }
}

/// Error message plus diagnostic context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ErrorDetail {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Issuance transaction record
#[derive(Debug, Clone)]
pub struct IssuanceTransaction {
    pub id: TransactionId,
    /// Owning institution/account
    pub subject_id: String,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    /// Immutable once set
    pub credential_data: CredentialData,
    /// Set once payment is confirmed
    pub payment_reference: Option<String>,
    /// Set once minted
    pub issuance_reference: Option<String>,
    /// Set only on a failure transition
    pub error_detail: Option<ErrorDetail>,
    /// Ledger mint attempts so far
    pub issue_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IssuanceTransaction {
    /// Create a new transaction in PENDING_PAYMENT
    pub fn new(subject_id: String, tx_type: TransactionType, credential_data: CredentialData) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::new(),
            subject_id,
            tx_type,
            status: TransactionStatus::PendingPayment,
            credential_data,
            payment_reference: None,
            issuance_reference: None,
            error_detail: None,
            issue_attempts: 0,
            last_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl fmt::Display for IssuanceTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction[{}] {} subject={} status={} attempts={}",
            self.id, self.tx_type, self.subject_id, self.status, self.issue_attempts
        )
    }
}

/// Fields written together with a status transition
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub payment_reference: Option<String>,
    pub issuance_reference: Option<String>,
    pub error_detail: Option<ErrorDetail>,
}

impl TransitionFields {
    pub fn payment(reference: impl Into<String>) -> Self {
        Self {
            payment_reference: Some(reference.into()),
            ..Default::default()
        }
    }

    pub fn issuance(reference: impl Into<String>) -> Self {
        Self {
            issuance_reference: Some(reference.into()),
            ..Default::default()
        }
    }

    pub fn error(detail: ErrorDetail) -> Self {
        Self {
            error_detail: Some(detail),
            ..Default::default()
        }
    }
}

/// One anchoring record per (transaction, chain)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorRecord {
    pub transaction_id: TransactionId,
    pub chain: ChainId,
    pub certificate_hash: String,
    pub status: AnchorStatus,
    pub chain_tx_reference: Option<String>,
    /// Submissions started so far; doubles as the record's CAS version
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorDetail>,
    pub created_at: DateTime<Utc>,
}

impl AnchorRecord {
    pub fn new(transaction_id: TransactionId, chain: ChainId, certificate_hash: String) -> Self {
        Self {
            transaction_id,
            chain,
            certificate_hash,
            status: AnchorStatus::Pending,
            chain_tx_reference: None,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// A permanent rejection is never retried, regardless of attempts left
    pub fn is_permanently_failed(&self) -> bool {
        self.status == AnchorStatus::Failed
            && self
                .last_error
                .as_ref()
                .is_some_and(|e| matches!(e.kind, FailureKind::Permanent | FailureKind::Exhausted))
    }
}

/// Conditional anchor update, applied only when status and attempts still match
#[derive(Debug, Clone)]
pub struct AnchorUpdate {
    pub status: AnchorStatus,
    pub attempts: u32,
    pub chain_tx_reference: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorDetail>,
}
