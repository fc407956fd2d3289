//! External collaborators of the signing pipeline.
//!
//! Each collaborator is a trait so the coordinator can run against the real
//! HTTP services or the in-memory doubles in `memory`.

pub mod agent;
pub mod api;
pub mod http;
pub mod memory;
pub mod notify;
pub mod remote;

pub use agent::HttpDeviceAgent;
pub use api::HttpRecordApi;
pub use memory::*;
pub use notify::HttpNotificationGateway;
pub use remote::HttpCertificateSigner;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SignatureFormat;
use crate::dispatch::{EmailMessage, InternalNotification, SmsMessage};
use crate::models::{
    AuditEntry, CertificateInfo, PrescriptionItemRecord, PrescriptionRecord, RecordDetails,
    RecordId, SignatureStatus,
};
use crate::secret::{CertificateFile, SecretString};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Service unreachable at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Service returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// A signing token or smartcard visible to the device agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub subject: Option<String>,
}

pub struct HashSignRequest<'a> {
    pub hash: &'a str,
    pub format: SignatureFormat,
    pub pin: Option<&'a SecretString>,
    pub token_id: Option<&'a str>,
}

/// Detached signature plus signer certificate, as returned by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSignature {
    /// Base64 detached signature.
    pub signature: String,
    /// PEM or base64 DER certificate.
    pub certificate: String,
    #[serde(default)]
    pub certificate_info: Option<CertificateInfo>,
}

pub struct FinalizeRequest<'a> {
    pub record_id: Option<&'a RecordId>,
    pub pdf: &'a [u8],
    pub signature: &'a str,
    pub certificate: &'a str,
    pub certificate_subject: Option<&'a str>,
    pub pre_hash: &'a str,
}

/// A signed PDF produced by a backend. `filename` overrides the generated
/// name when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPdf {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
}

/// Local smartcard/token agent on the loopback interface.
pub trait DeviceAgent: Send + Sync {
    fn detect_tokens(&self) -> Result<Vec<TokenInfo>, BackendError>;

    fn sign_hash(&self, request: &HashSignRequest<'_>) -> Result<AgentSignature, BackendError>;

    /// Embed signature and certificate into a PAdES-compliant PDF.
    fn finalize(&self, request: &FinalizeRequest<'_>) -> Result<SignedPdf, BackendError>;
}

/// Remote PKCS#12 signing service.
pub trait CertificateSigner: Send + Sync {
    fn sign_pdf(
        &self,
        pdf: &[u8],
        filename: &str,
        certificate: &CertificateFile,
        password: &SecretString,
    ) -> Result<SignedPdf, BackendError>;
}

/// Backend record API.
pub trait RecordApi: Send + Sync {
    fn find_record(
        &self,
        patient_id: &str,
        consultation_id: &str,
    ) -> Result<Option<PrescriptionRecord>, BackendError>;

    fn create_record(&self, record: &PrescriptionRecord) -> Result<RecordId, BackendError>;

    /// Overwrite the draft-mirroring fields. Signature state is untouched.
    fn update_record(&self, id: &RecordId, details: &RecordDetails) -> Result<(), BackendError>;

    fn replace_items(
        &self,
        id: &RecordId,
        items: &[PrescriptionItemRecord],
    ) -> Result<(), BackendError>;

    fn fetch_record(&self, id: &RecordId) -> Result<PrescriptionRecord, BackendError>;

    fn update_signature(&self, id: &RecordId, status: &SignatureStatus) -> Result<(), BackendError>;

    fn append_audit(&self, entry: &AuditEntry) -> Result<(), BackendError>;

    /// Certificate of the signing user, `None` when none is on file.
    fn fetch_certificate_info(&self) -> Result<Option<CertificateInfo>, BackendError>;
}

/// Notification delivery service.
pub trait NotificationGateway: Send + Sync {
    fn send_internal(&self, message: &InternalNotification) -> Result<(), BackendError>;

    fn send_email(&self, message: &EmailMessage) -> Result<(), BackendError>;

    fn send_sms(&self, message: &SmsMessage) -> Result<(), BackendError>;
}
