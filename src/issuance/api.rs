//! Issuance API Layer
//!
//! Request/response types and entry points for the routing layer. Transport
//! is not fixed here: handlers return a body plus an HTTP status suggestion.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::adapters::TokenStatus;
use super::anchoring::AnchoringCoordinator;
use super::coordinator::{BatchItem, BatchReport, IssuanceCoordinator};
use super::error::IssuanceError;
use super::types::{AnchorRecord, CallOutcome, ErrorDetail, IssuanceTransaction, TransactionId, TransactionType};

// ============================================================================
// API Request/Response Types
// ============================================================================

/// API request for creating a transaction
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    /// "CREDENTIAL_ISSUANCE" or "CREDENTIAL_REVOCATION"
    #[serde(rename = "type")]
    pub tx_type: String,
    /// Versioned credential document (must carry a `schema` tag). Kept as
    /// the caller's exact text; it is what gets stored and hashed.
    pub credential_data: Box<RawValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatusResponse {
    pub transaction_id: String,
    pub subject_id: String,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub status: String,
    /// True until a terminal status is reached
    pub pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuance_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
    pub issue_attempts: u32,
    /// Milliseconds since epoch
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<IssuanceTransaction> for TransactionStatusResponse {
    fn from(tx: IssuanceTransaction) -> Self {
        Self {
            transaction_id: tx.id.to_string(),
            subject_id: tx.subject_id,
            tx_type: tx.tx_type.to_string(),
            status: tx.status.to_string(),
            pending: !tx.status.is_terminal(),
            payment_reference: tx.payment_reference,
            issuance_reference: tx.issuance_reference,
            error_detail: tx.error_detail,
            issue_attempts: tx.issue_attempts,
            created_at: tx.created_at.timestamp_millis(),
            updated_at: tx.updated_at.timestamp_millis(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorStatusResponse {
    pub chain: String,
    pub status: String,
    pub certificate_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_tx_reference: Option<String>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorDetail>,
    /// FAILED and will not be retried
    pub needs_review: bool,
}

impl From<AnchorRecord> for AnchorStatusResponse {
    fn from(record: AnchorRecord) -> Self {
        Self {
            needs_review: record.is_permanently_failed(),
            chain: record.chain.to_string(),
            status: record.status.to_string(),
            certificate_hash: record.certificate_hash,
            chain_tx_reference: record.chain_tx_reference,
            attempts: record.attempts,
            last_attempt_at: record.last_attempt_at.map(|t| t.timestamp_millis()),
            last_error: record.last_error,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyIssuanceResponse {
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_status: Option<TokenStatus>,
    /// Ledger could not answer; ask again later
    pub pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBatchRequest {
    pub transaction_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResponse {
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl From<BatchItem> for BatchItemResponse {
    fn from(item: BatchItem) -> Self {
        let transaction_id = item.transaction_id.to_string();
        match item.result {
            Ok(status) => Self {
                transaction_id,
                status: Some(status.to_string()),
                code: None,
                msg: None,
            },
            Err(e) => {
                let (_, body) = map_error(&e);
                Self {
                    transaction_id,
                    status: None,
                    code: Some(body.code),
                    msg: body.msg,
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBatchResponse {
    pub items: Vec<BatchItemResponse>,
    pub successful: usize,
    pub failed: usize,
    pub pending: usize,
}

impl From<BatchReport> for ProcessBatchResponse {
    fn from(report: BatchReport) -> Self {
        Self {
            successful: report.successful,
            failed: report.failed,
            pending: report.pending,
            items: report.items.into_iter().map(Into::into).collect(),
        }
    }
}

/// API wrapper for standard response format
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            data: Some(data),
            msg: None,
        }
    }

    pub fn error(code: i32, msg: impl ToString) -> Self {
        Self {
            code,
            data: None,
            msg: Some(msg.to_string()),
        }
    }
}

/// HTTP status suggestion plus error body
pub type ApiError = (u16, ApiResponse<()>);

// ============================================================================
// Error Codes
// ============================================================================

pub mod error_codes {
    pub const INVALID_PARAMETER: i32 = -1001;
    pub const INVALID_CREDENTIAL: i32 = -1002;
    pub const SCHEMA_MISMATCH: i32 = -1003;
    pub const INVALID_SUBJECT: i32 = -1004;
    pub const INVALID_REVOCATION_TARGET: i32 = -2001;
    pub const INVALID_TRANSITION: i32 = -3001;
    pub const SERVICE_UNAVAILABLE: i32 = -5001;
    pub const TRANSACTION_NOT_FOUND: i32 = -6001;
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_tx_type(s: &str) -> Result<TransactionType, IssuanceError> {
    match s.trim().to_ascii_uppercase().as_str() {
        "CREDENTIAL_ISSUANCE" => Ok(TransactionType::CredentialIssuance),
        "CREDENTIAL_REVOCATION" => Ok(TransactionType::CredentialRevocation),
        _ => Err(IssuanceError::Validation(format!(
            "Invalid transaction type: {}. Use 'CREDENTIAL_ISSUANCE' or 'CREDENTIAL_REVOCATION'",
            s
        ))),
    }
}

fn parse_transaction_id(s: &str) -> Result<TransactionId, ApiError> {
    s.trim().parse().map_err(|_| {
        (
            400,
            ApiResponse::error(
                error_codes::INVALID_PARAMETER,
                format!("Invalid transaction id: {}", s),
            ),
        )
    })
}

fn map_error(e: &IssuanceError) -> ApiError {
    let code = match e {
        IssuanceError::Validation(_) => error_codes::INVALID_CREDENTIAL,
        IssuanceError::SchemaMismatch(_) => error_codes::SCHEMA_MISMATCH,
        IssuanceError::InvalidSubject => error_codes::INVALID_SUBJECT,
        IssuanceError::InvalidRevocationTarget(_) => error_codes::INVALID_REVOCATION_TARGET,
        IssuanceError::InvalidTransition { .. } => error_codes::INVALID_TRANSITION,
        IssuanceError::TransactionNotFound(_) => error_codes::TRANSACTION_NOT_FOUND,
        IssuanceError::Store(_) | IssuanceError::SystemError(_) => error_codes::SERVICE_UNAVAILABLE,
    };
    (e.http_status(), ApiResponse::error(code, e))
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_transaction(
    coordinator: &IssuanceCoordinator,
    subject_id: &str,
    req: CreateTransactionRequest,
) -> Result<TransactionStatusResponse, ApiError> {
    let tx_type = parse_tx_type(&req.tx_type)
        .map_err(|e| (400, ApiResponse::error(error_codes::INVALID_PARAMETER, e)))?;
    let raw = req.credential_data.get().as_bytes().to_vec();

    let id = coordinator
        .create_transaction(subject_id, tx_type, raw)
        .await
        .map_err(|e| map_error(&e))?;
    get_transaction_status(coordinator, &id.to_string()).await
}

pub async fn confirm_payment(
    coordinator: &IssuanceCoordinator,
    transaction_id: &str,
) -> Result<TransactionStatusResponse, ApiError> {
    let id = parse_transaction_id(transaction_id)?;
    coordinator.confirm_payment(id).await.map_err(|e| map_error(&e))?;
    get_transaction_status(coordinator, transaction_id).await
}

pub async fn issue(
    coordinator: &IssuanceCoordinator,
    transaction_id: &str,
) -> Result<TransactionStatusResponse, ApiError> {
    let id = parse_transaction_id(transaction_id)?;
    coordinator.issue(id).await.map_err(|e| map_error(&e))?;
    get_transaction_status(coordinator, transaction_id).await
}

pub async fn process(
    coordinator: &IssuanceCoordinator,
    transaction_id: &str,
) -> Result<TransactionStatusResponse, ApiError> {
    let id = parse_transaction_id(transaction_id)?;
    coordinator.process(id).await.map_err(|e| map_error(&e))?;
    get_transaction_status(coordinator, transaction_id).await
}

/// Malformed ids reject the whole request; everything else is reported per item
pub async fn process_batch(
    coordinator: &IssuanceCoordinator,
    req: ProcessBatchRequest,
) -> Result<ProcessBatchResponse, ApiError> {
    let ids = req
        .transaction_ids
        .iter()
        .map(|s| parse_transaction_id(s))
        .collect::<Result<Vec<_>, _>>()?;
    let report = coordinator
        .process_batch(&ids)
        .await
        .map_err(|e| map_error(&e))?;
    Ok(report.into())
}

pub async fn get_transaction_status(
    coordinator: &IssuanceCoordinator,
    transaction_id: &str,
) -> Result<TransactionStatusResponse, ApiError> {
    let id = parse_transaction_id(transaction_id)?;
    let tx = coordinator
        .get_transaction_status(id)
        .await
        .map_err(|e| map_error(&e))?;
    Ok(tx.into())
}

pub async fn get_anchor_statuses(
    anchoring: &AnchoringCoordinator,
    transaction_id: &str,
) -> Result<Vec<AnchorStatusResponse>, ApiError> {
    let id = parse_transaction_id(transaction_id)?;
    let records = anchoring
        .get_anchor_statuses(id)
        .await
        .map_err(|e| map_error(&e))?;
    Ok(records.into_iter().map(Into::into).collect())
}

pub async fn verify_issuance(
    coordinator: &IssuanceCoordinator,
    transaction_id: &str,
) -> Result<VerifyIssuanceResponse, ApiError> {
    let id = parse_transaction_id(transaction_id)?;
    let outcome = coordinator
        .verify_issuance(id)
        .await
        .map_err(|e| map_error(&e))?;

    let transaction_id = id.to_string();
    Ok(match outcome {
        CallOutcome::Success(status) => VerifyIssuanceResponse {
            transaction_id,
            token_status: Some(status),
            pending: false,
            msg: None,
        },
        CallOutcome::Permanent(msg) => VerifyIssuanceResponse {
            transaction_id,
            token_status: None,
            pending: false,
            msg: Some(msg),
        },
        CallOutcome::Transient(msg) | CallOutcome::Unknown(msg) => VerifyIssuanceResponse {
            transaction_id,
            token_status: None,
            pending: true,
            msg: Some(msg),
        },
    })
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuance::adapters::mock::{Behavior, MockLedger, MockPaymentGateway};
    use crate::issuance::credential::fixtures::academic_json;
    use crate::issuance::store::MemoryTransactionStore;
    use crate::issuance::types::FailureKind;
    use std::sync::Arc;

    fn coordinator() -> (IssuanceCoordinator, Arc<MockPaymentGateway>) {
        let payment = Arc::new(MockPaymentGateway::new());
        let coordinator = IssuanceCoordinator::new(
            Arc::new(MemoryTransactionStore::new()),
            payment.clone(),
            Arc::new(MockLedger::new()),
        );
        (coordinator, payment)
    }

    fn request(tx_type: &str) -> CreateTransactionRequest {
        CreateTransactionRequest {
            tx_type: tx_type.to_string(),
            credential_data: serde_json::from_slice(&academic_json("Juan Perez")).unwrap(),
        }
    }

    #[test]
    fn test_parse_tx_type() {
        assert_eq!(
            parse_tx_type("credential_issuance").unwrap(),
            TransactionType::CredentialIssuance
        );
        assert_eq!(
            parse_tx_type("CREDENTIAL_REVOCATION").unwrap(),
            TransactionType::CredentialRevocation
        );
        assert!(parse_tx_type("mint").is_err());
    }

    #[test]
    fn test_request_deserialize() {
        let req: CreateTransactionRequest = serde_json::from_str(
            r#"{"type":"CREDENTIAL_ISSUANCE","credentialData":{"schema":"revocation/v1"}}"#,
        )
        .unwrap();
        assert_eq!(req.tx_type, "CREDENTIAL_ISSUANCE");
        assert_eq!(req.credential_data.get(), r#"{"schema":"revocation/v1"}"#);
    }

    #[tokio::test]
    async fn test_credential_data_stored_verbatim() {
        let (coordinator, _) = coordinator();
        // Unsorted keys, spacing and a float that a Value round trip would rewrite
        let submitted = r#"{"schema":"academic-credential/v1", "tokenId":"0.0.4821","uniqueHash":"9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08","ipfsURI":"ipfs://x","studentName":"Juan Perez","degree":"BSc","kind":"DEGREE","gpa":3.50}"#;
        let body = format!(r#"{{"type":"CREDENTIAL_ISSUANCE","credentialData":{}}}"#, submitted);
        let req: CreateTransactionRequest = serde_json::from_str(&body).unwrap();

        let created = create_transaction(&coordinator, "univ-1", req).await.unwrap();
        let id: TransactionId = created.transaction_id.parse().unwrap();
        let tx = coordinator.get_transaction_status(id).await.unwrap();
        assert_eq!(tx.credential_data.raw(), submitted.as_bytes());
    }

    #[tokio::test]
    async fn test_create_and_process() {
        let (coordinator, _) = coordinator();
        let created = create_transaction(&coordinator, "univ-1", request("CREDENTIAL_ISSUANCE"))
            .await
            .unwrap();
        assert_eq!(created.status, "PENDING_PAYMENT");
        assert!(created.pending);

        let done = process(&coordinator, &created.transaction_id).await.unwrap();
        assert_eq!(done.status, "ISSUANCE_COMPLETE");
        assert!(!done.pending);
        assert!(done.issuance_reference.is_some());

        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["type"], "CREDENTIAL_ISSUANCE");
        assert!(json.get("errorDetail").is_none());
    }

    #[tokio::test]
    async fn test_declined_payment_reported_with_reason() {
        let (coordinator, payment) = coordinator();
        let created = create_transaction(&coordinator, "univ-1", request("CREDENTIAL_ISSUANCE"))
            .await
            .unwrap();

        payment.push(Behavior::Permanent("card declined"));
        let failed = confirm_payment(&coordinator, &created.transaction_id)
            .await
            .unwrap();
        assert_eq!(failed.status, "PAYMENT_FAILED");
        let detail = failed.error_detail.unwrap();
        assert_eq!(detail.kind, FailureKind::Permanent);
        assert_eq!(detail.message, "card declined");

        let (status, body) = issue(&coordinator, &created.transaction_id)
            .await
            .unwrap_err();
        assert_eq!(status, 409);
        assert_eq!(body.code, error_codes::INVALID_TRANSITION);
    }

    #[tokio::test]
    async fn test_process_batch_counts() {
        let (coordinator, payment) = coordinator();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let created = create_transaction(&coordinator, "univ-1", request("CREDENTIAL_ISSUANCE"))
                .await
                .unwrap();
            ids.push(created.transaction_id);
        }
        payment.push(Behavior::Permanent("card declined"));

        let resp = process_batch(&coordinator, ProcessBatchRequest { transaction_ids: ids.clone() })
            .await
            .unwrap();
        assert_eq!((resp.successful, resp.failed, resp.pending), (2, 1, 0));
        assert_eq!(
            resp.items.iter().map(|i| i.transaction_id.clone()).collect::<Vec<_>>(),
            ids
        );
        assert_eq!(
            resp.items
                .iter()
                .filter(|i| i.status.as_deref() == Some("PAYMENT_FAILED"))
                .count(),
            1
        );

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["successful"], 2);
        assert!(json["items"][0].get("code").is_none());

        let bad = ProcessBatchRequest {
            transaction_ids: vec![ids[0].clone(), "nope".to_string()],
        };
        let (status, body) = process_batch(&coordinator, bad).await.unwrap_err();
        assert_eq!(status, 400);
        assert_eq!(body.code, error_codes::INVALID_PARAMETER);
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let (coordinator, _) = coordinator();
        let (status, body) = get_transaction_status(&coordinator, "nope").await.unwrap_err();
        assert_eq!(status, 400);
        assert_eq!(body.code, error_codes::INVALID_PARAMETER);

        let (status, body) = get_transaction_status(&coordinator, &TransactionId::new().to_string())
            .await
            .unwrap_err();
        assert_eq!(status, 404);
        assert_eq!(body.code, error_codes::TRANSACTION_NOT_FOUND);

        let (status, body) = create_transaction(&coordinator, "univ-1", request("CREDENTIAL_REVOCATION"))
            .await
            .unwrap_err();
        assert_eq!(status, 400);
        assert_eq!(body.code, error_codes::SCHEMA_MISMATCH);
    }
}
