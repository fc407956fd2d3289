use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{AssuranceLevel, PrescriptionFormat, SigningMethod};

/// Server-assigned prescription record id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable prescription entity, keyed by (patient, consultation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionRecord {
    pub id: Option<RecordId>,
    pub patient_id: String,
    pub consultation_id: String,
    pub doctor_id: Option<String>,
    pub format: PrescriptionFormat,
    pub issued_on: NaiveDate,
    pub valid_until: Option<NaiveDate>,
    pub observations: Option<String>,
    pub signed: bool,
    pub hash_alg: Option<String>,
    pub pre_hash: Option<String>,
    pub post_hash: Option<String>,
}

/// Fields of a record that mirror the draft, sent as a partial update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDetails {
    pub doctor_id: Option<String>,
    pub format: PrescriptionFormat,
    pub issued_on: NaiveDate,
    pub valid_until: Option<NaiveDate>,
    pub observations: Option<String>,
}

/// One persisted medication line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionItemRecord {
    pub position: u32,
    pub medication: String,
    pub dosage: Option<String>,
    pub quantity: Option<String>,
    pub instructions: Option<String>,
}

/// Partial update of the signed state of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureStatus {
    pub signed: bool,
    pub hash_alg: Option<String>,
    pub pre_hash: Option<String>,
    pub post_hash: Option<String>,
}

impl SignatureStatus {
    pub fn unsigned() -> Self {
        Self {
            signed: false,
            hash_alg: None,
            pre_hash: None,
            post_hash: None,
        }
    }
}

/// Append-only audit entry for one signing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub record_id: Option<RecordId>,
    pub hash_alg: String,
    pub pre_hash: String,
    pub post_hash: String,
    pub reason: String,
    pub filename: String,
    pub valid: bool,
    pub method: SigningMethod,
    pub assurance: AssuranceLevel,
    pub signer_name: String,
    pub certificate_subject: Option<String>,
    pub created_at: DateTime<Utc>,
}
