use std::fmt;

use thiserror::Error;

use crate::backends::BackendError;
use crate::db::DatabaseError;
use crate::dispatch::DeliveryError;
use crate::render::RenderError;

/// Errors surfaced by the signing and delivery pipeline.
///
/// Validation and certificate pre-check errors are raised before any
/// network call. None of these leave a session marked signed.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Missing mandatory fields: {}", .0.join(", "))]
    Validation(Vec<&'static str>),

    #[error("Clinical linkage mismatch: {}", .0.join("; "))]
    Linkage(Vec<String>),

    #[error("No signing token detected. Check that the device agent is running and the token is connected")]
    AgentUnavailable,

    #[error("Signing response rejected: {0} carries a test signature marker")]
    MockSignatureRejected(&'static str),

    #[error("Invalid certificate file: {0}")]
    CertificateFormat(String),

    #[error("Invalid certificate password: {0}")]
    CertificatePassword(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("A signing attempt is already in progress")]
    SigningInProgress,

    #[error("Document is not signed and no certificate is configured")]
    NotSigned,

    #[error("Device agent error: {0}")]
    Agent(BackendError),

    #[error("Remote signing error: {0}")]
    RemoteSigning(BackendError),

    #[error("Render error: {0}")]
    Render(RenderError),
}

impl From<RenderError> for PipelineError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::MissingFields(missing) => PipelineError::Validation(missing),
            other => PipelineError::Render(other),
        }
    }
}

impl From<DatabaseError> for PipelineError {
    fn from(e: DatabaseError) -> Self {
        PipelineError::Persistence(e.to_string())
    }
}

/// A degraded step that did not undo a completed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionWarning {
    /// Linkage mismatch tolerated under the `warn` policy.
    Linkage(Vec<String>),
    /// No backing record; signing proceeded without server-side linkage.
    RecordUnavailable(String),
    /// Audit write failed. `queued` tells whether it sits in the local outbox.
    AuditDeferred { queued: bool, reason: String },
    /// The record's signed flag and hashes were not updated.
    StatusNotSaved(String),
    CertificateInfoUnavailable(String),
}

impl fmt::Display for SessionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linkage(errors) => write!(f, "Linkage warning: {}", errors.join("; ")),
            Self::RecordUnavailable(reason) => {
                write!(f, "Signed locally; prescription record unavailable ({reason})")
            }
            Self::AuditDeferred { queued: true, reason } => {
                write!(f, "Audit entry queued for retry ({reason})")
            }
            Self::AuditDeferred { queued: false, reason } => {
                write!(f, "Audit entry not recorded ({reason})")
            }
            Self::StatusNotSaved(reason) => write!(f, "Signed state not saved ({reason})"),
            Self::CertificateInfoUnavailable(reason) => {
                write!(f, "Certificate details unavailable ({reason})")
            }
        }
    }
}
