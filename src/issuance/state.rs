//! Issuance FSM State Definitions
//!
//! State IDs are stored as SMALLINT in PostgreSQL.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Issuance transaction states
///
/// Terminal states: PAYMENT_FAILED (-10), ISSUANCE_COMPLETE (30), ISSUANCE_FAILED (-20)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransactionStatus {
    /// Initial state - record created, waiting for payment confirmation
    PendingPayment = 0,

    /// Payment confirmed - waiting for the primary ledger mint
    PendingIssuance = 10,

    /// Terminal: credential minted on the primary ledger
    IssuanceComplete = 30,

    /// Terminal: payment declined by the gateway
    PaymentFailed = -10,

    /// Terminal: ledger rejected the mint definitively
    IssuanceFailed = -20,
}

impl TransactionStatus {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::IssuanceComplete
                | TransactionStatus::PaymentFailed
                | TransactionStatus::IssuanceFailed
        )
    }

    /// Position along the state graph. Transitions must strictly increase it.
    #[inline]
    pub fn rank(&self) -> u8 {
        match self {
            TransactionStatus::PendingPayment => 0,
            TransactionStatus::PendingIssuance | TransactionStatus::PaymentFailed => 1,
            TransactionStatus::IssuanceComplete | TransactionStatus::IssuanceFailed => 2,
        }
    }

    /// Whether `self -> next` is an edge of the state graph
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (
                TransactionStatus::PendingPayment,
                TransactionStatus::PendingIssuance | TransactionStatus::PaymentFailed
            ) | (
                TransactionStatus::PendingIssuance,
                TransactionStatus::IssuanceComplete | TransactionStatus::IssuanceFailed
            )
        )
    }

    /// Get the numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL state ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransactionStatus::PendingPayment),
            10 => Some(TransactionStatus::PendingIssuance),
            30 => Some(TransactionStatus::IssuanceComplete),
            -10 => Some(TransactionStatus::PaymentFailed),
            -20 => Some(TransactionStatus::IssuanceFailed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::PendingPayment => "PENDING_PAYMENT",
            TransactionStatus::PendingIssuance => "PENDING_ISSUANCE",
            TransactionStatus::IssuanceComplete => "ISSUANCE_COMPLETE",
            TransactionStatus::PaymentFailed => "PAYMENT_FAILED",
            TransactionStatus::IssuanceFailed => "ISSUANCE_FAILED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransactionStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransactionStatus::from_id(value).ok_or(())
    }
}

/// Per-chain anchoring states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum AnchorStatus {
    /// Submission claimed or in flight; outcome not yet known
    Pending = 0,
    /// Chain accepted the anchoring transaction
    Anchored = 10,
    /// Last submission failed; eligible for retry while attempts remain
    Failed = -10,
}

impl AnchorStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(AnchorStatus::Pending),
            10 => Some(AnchorStatus::Anchored),
            -10 => Some(AnchorStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorStatus::Pending => "PENDING",
            AnchorStatus::Anchored => "ANCHORED",
            AnchorStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AnchorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_PAYMENT" => Ok(TransactionStatus::PendingPayment),
            "PENDING_ISSUANCE" => Ok(TransactionStatus::PendingIssuance),
            "ISSUANCE_COMPLETE" => Ok(TransactionStatus::IssuanceComplete),
            "PAYMENT_FAILED" => Ok(TransactionStatus::PaymentFailed),
            "ISSUANCE_FAILED" => Ok(TransactionStatus::IssuanceFailed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}
