//! Credential payload schema
//!
//! `credentialData` arrives as raw JSON. It is parsed once, at creation, into a
//! closed set of versioned schemas; the raw bytes are kept verbatim because
//! they are the only input to the certificate hash and the mint payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::IssuanceError;
use super::types::{TransactionId, TransactionType};

/// Upper bound on a submitted payload
pub const MAX_CREDENTIAL_BYTES: usize = 64 * 1024;

/// Memo format tag shared with the anchoring chains
pub const ANCHOR_MEMO_FORMAT: &str = "ACAD@1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialKind {
    Degree,
    Diploma,
    Certificate,
}

/// `academic-credential/v1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicCredentialV1 {
    /// Primary-ledger token collection (`shard.realm.num`)
    pub token_id: String,
    /// SHA-256 of the certificate document, hex
    pub unique_hash: String,
    #[serde(rename = "ipfsURI")]
    pub ipfs_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_account_id: Option<String>,
    pub student_name: String,
    pub degree: String,
    pub kind: CredentialKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_name: Option<String>,
}

/// `revocation/v1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationV1 {
    pub original_transaction_id: TransactionId,
    pub reason: String,
}

/// Closed, versioned credential schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schema")]
pub enum CredentialPayload {
    #[serde(rename = "academic-credential/v1")]
    AcademicCredentialV1(AcademicCredentialV1),
    #[serde(rename = "revocation/v1")]
    RevocationV1(RevocationV1),
}

impl CredentialPayload {
    pub fn schema(&self) -> &'static str {
        match self {
            CredentialPayload::AcademicCredentialV1(_) => "academic-credential/v1",
            CredentialPayload::RevocationV1(_) => "revocation/v1",
        }
    }

    /// Transaction type this schema belongs to
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            CredentialPayload::AcademicCredentialV1(_) => TransactionType::CredentialIssuance,
            CredentialPayload::RevocationV1(_) => TransactionType::CredentialRevocation,
        }
    }

    fn validate(&self) -> Result<(), IssuanceError> {
        match self {
            CredentialPayload::AcademicCredentialV1(c) => {
                require_ledger_account("tokenId", &c.token_id)?;
                if let Some(recipient) = &c.recipient_account_id {
                    require_ledger_account("recipientAccountId", recipient)?;
                }
                if c.unique_hash.len() != 64 || !c.unique_hash.chars().all(|ch| ch.is_ascii_hexdigit())
                {
                    return Err(IssuanceError::Validation(
                        "uniqueHash must be a 64-character hex SHA-256 digest".into(),
                    ));
                }
                require_text("ipfsURI", &c.ipfs_uri)?;
                if c.ipfs_uri.chars().any(char::is_whitespace) {
                    return Err(IssuanceError::Validation(
                        "ipfsURI must not contain whitespace".into(),
                    ));
                }
                require_text("studentName", &c.student_name)?;
                require_text("degree", &c.degree)?;
                Ok(())
            }
            CredentialPayload::RevocationV1(r) => require_text("reason", &r.reason),
        }
    }
}

fn require_text(field: &str, value: &str) -> Result<(), IssuanceError> {
    if value.trim().is_empty() {
        return Err(IssuanceError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Hedera-style `shard.realm.num`
fn require_ledger_account(field: &str, value: &str) -> Result<(), IssuanceError> {
    let parts: Vec<&str> = value.split('.').collect();
    let well_formed = parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if !well_formed {
        return Err(IssuanceError::Validation(format!(
            "{} must have the form shard.realm.num, got '{}'",
            field, value
        )));
    }
    Ok(())
}

/// Validated payload plus the raw bytes it was parsed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialData {
    raw: Vec<u8>,
    payload: CredentialPayload,
}

impl CredentialData {
    /// Parse and validate a submitted payload
    pub fn parse(raw: impl Into<Vec<u8>>) -> Result<Self, IssuanceError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IssuanceError::Validation("credentialData is empty".into()));
        }
        if raw.len() > MAX_CREDENTIAL_BYTES {
            return Err(IssuanceError::Validation(format!(
                "credentialData exceeds {} bytes",
                MAX_CREDENTIAL_BYTES
            )));
        }
        let payload: CredentialPayload = serde_json::from_slice(&raw)
            .map_err(|e| IssuanceError::Validation(format!("credentialData: {}", e)))?;
        payload.validate()?;
        Ok(Self { raw, payload })
    }

    /// Rebuild from stored bytes.
    ///
    /// Stored payloads were validated at creation and are not re-validated;
    /// only the schema is decoded again.
    pub fn from_stored(raw: Vec<u8>) -> Result<Self, serde_json::Error> {
        let payload = serde_json::from_slice(&raw)?;
        Ok(Self { raw, payload })
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn payload(&self) -> &CredentialPayload {
        &self.payload
    }

    /// Original transaction referenced by a revocation
    pub fn revokes(&self) -> Option<TransactionId> {
        match &self.payload {
            CredentialPayload::RevocationV1(r) => Some(r.original_transaction_id),
            CredentialPayload::AcademicCredentialV1(_) => None,
        }
    }
}

/// Hex SHA-256 over the verbatim payload bytes and the primary-ledger reference
pub fn certificate_hash(data: &CredentialData, issuance_reference: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.raw());
    hasher.update([0u8]);
    hasher.update(issuance_reference.as_bytes());
    hex::encode(hasher.finalize())
}

/// Memo attached to every anchoring transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorMemo {
    pub certificate_hash: String,
    pub issuance_reference: String,
    pub transaction_id: TransactionId,
    pub timestamp: DateTime<Utc>,
    pub format: String,
}

impl AnchorMemo {
    pub fn new(
        certificate_hash: String,
        issuance_reference: String,
        transaction_id: TransactionId,
    ) -> Self {
        Self {
            certificate_hash,
            issuance_reference,
            transaction_id,
            timestamp: Utc::now(),
            format: ANCHOR_MEMO_FORMAT.to_string(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Plain struct of strings; serialization cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}
