//! Audit Logger: append-only audit entries for signing attempts.
//!
//! A failed remote write never undoes a signature. When a local outbox is
//! configured the entry is queued there and replayed by `retry_pending`.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::backends::RecordApi;
use crate::config::{self, AUDIT_REASON, HASH_ALGORITHM};
use crate::db::{self, DatabaseError};
use crate::error::SessionWarning;
use crate::hash;
use crate::models::{AuditEntry, RecordId, SignatureRecord};

/// Result of a single `append`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditOutcome {
    Recorded,
    /// Remote write failed; the entry waits in the local outbox.
    Queued { outbox_id: String, reason: String },
    /// Remote write failed and the entry could not be queued either.
    Lost { reason: String },
}

impl AuditOutcome {
    pub fn warning(&self) -> Option<SessionWarning> {
        match self {
            Self::Recorded => None,
            Self::Queued { reason, .. } => Some(SessionWarning::AuditDeferred {
                queued: true,
                reason: reason.clone(),
            }),
            Self::Lost { reason } => Some(SessionWarning::AuditDeferred {
                queued: false,
                reason: reason.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub delivered: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactVerification {
    Intact,
    Tampered,
    /// The entry was written with a digest this build does not compute.
    AlgorithmMismatch,
}

/// Build the entry for a completed signature.
pub fn build_entry(record_id: Option<&RecordId>, signature: &SignatureRecord) -> AuditEntry {
    AuditEntry {
        record_id: record_id.cloned(),
        hash_alg: HASH_ALGORITHM.to_string(),
        pre_hash: signature.pre_hash().to_string(),
        post_hash: signature.post_hash().to_string(),
        reason: AUDIT_REASON.to_string(),
        filename: signature.filename().to_string(),
        valid: true,
        method: signature.method(),
        assurance: signature.assurance(),
        signer_name: signature.signer_name().to_string(),
        certificate_subject: signature.certificate().map(|c| c.subject.clone()),
        created_at: Utc::now(),
    }
}

/// Recompute the artifact digest and compare it with the audited post-hash.
pub fn verify_artifact(bytes: &[u8], entry: &AuditEntry) -> ArtifactVerification {
    if !entry.hash_alg.eq_ignore_ascii_case(HASH_ALGORITHM) {
        return ArtifactVerification::AlgorithmMismatch;
    }
    let actual = hash::digest(bytes);
    let expected = entry.post_hash.to_ascii_lowercase();
    if bool::from(actual.as_bytes().ct_eq(expected.as_bytes())) {
        ArtifactVerification::Intact
    } else {
        ArtifactVerification::Tampered
    }
}

pub struct AuditLogger {
    api: Arc<dyn RecordApi>,
    outbox: Option<Connection>,
}

impl AuditLogger {
    /// Logger without a local outbox; failed writes are only reported.
    pub fn new(api: Arc<dyn RecordApi>) -> Self {
        Self { api, outbox: None }
    }

    pub fn with_outbox(api: Arc<dyn RecordApi>, outbox: Connection) -> Self {
        Self {
            api,
            outbox: Some(outbox),
        }
    }

    /// Logger backed by the outbox in the application data directory.
    pub fn open_default(api: Arc<dyn RecordApi>) -> Result<Self, DatabaseError> {
        let path = config::audit_outbox_path().ok_or_else(|| {
            DatabaseError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no home directory for the audit outbox",
            ))
        })?;
        Ok(Self::with_outbox(api, db::open_database(&path)?))
    }

    pub fn has_outbox(&self) -> bool {
        self.outbox.is_some()
    }

    pub fn append(&self, entry: &AuditEntry) -> AuditOutcome {
        let err = match self.api.append_audit(entry) {
            Ok(()) => {
                tracing::info!(
                    record_id = entry.record_id.as_ref().map(RecordId::as_str),
                    method = entry.method.as_str(),
                    post_hash = hash::short(&entry.post_hash),
                    "Audit entry recorded"
                );
                return AuditOutcome::Recorded;
            }
            Err(e) => e.to_string(),
        };

        let Some(conn) = &self.outbox else {
            tracing::error!(error = %err, "Audit entry lost, no outbox configured");
            return AuditOutcome::Lost { reason: err };
        };

        match db::enqueue_audit(conn, entry, &err) {
            Ok(outbox_id) => {
                tracing::warn!(outbox_id = %outbox_id, error = %err, "Audit entry queued for retry");
                AuditOutcome::Queued {
                    outbox_id,
                    reason: err,
                }
            }
            Err(db_err) => {
                tracing::error!(error = %err, outbox_error = %db_err, "Audit entry lost");
                AuditOutcome::Lost {
                    reason: format!("{err}; outbox: {db_err}"),
                }
            }
        }
    }

    /// Replay queued entries oldest first. Stops at the first failure so
    /// entries keep their order.
    pub fn retry_pending(&self) -> Result<RetryReport, DatabaseError> {
        let Some(conn) = &self.outbox else {
            return Ok(RetryReport::default());
        };

        let pending = db::pending_audits(conn)?;
        let total = pending.len();
        let mut delivered = 0;

        for queued in pending {
            match self.api.append_audit(&queued.entry) {
                Ok(()) => {
                    db::remove_audit(conn, &queued.id)?;
                    delivered += 1;
                }
                Err(e) => {
                    db::record_audit_failure(conn, &queued.id, &e.to_string())?;
                    tracing::warn!(outbox_id = %queued.id, attempts = queued.attempts + 1, "Audit replay failed");
                    break;
                }
            }
        }

        let report = RetryReport {
            delivered,
            remaining: total - delivered,
        };
        tracing::info!(delivered = report.delivered, remaining = report.remaining, "Audit outbox replay");
        Ok(report)
    }

    pub fn pending_count(&self) -> Result<usize, DatabaseError> {
        match &self.outbox {
            Some(conn) => db::count_pending_audits(conn),
            None => Ok(0),
        }
    }
}
