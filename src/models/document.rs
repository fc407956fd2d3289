use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{AssuranceLevel, SigningMethod};
use crate::hash;

/// Immutable byte snapshot of a rendered draft.
///
/// Superseded, never mutated: every edit produces a new value. Bytes are
/// shared behind an `Arc` so cached copies are cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDocument {
    bytes: Arc<[u8]>,
    filename: String,
    hash: String,
    /// Layout version of the renderer that produced the bytes.
    renderer_version: u32,
    generated_at: DateTime<Utc>,
}

impl GeneratedDocument {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>, renderer_version: u32) -> Self {
        let hash = hash::digest(&bytes);
        Self {
            bytes: bytes.into(),
            filename: filename.into(),
            hash,
            renderer_version,
            generated_at: Utc::now(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Pre-signing content hash.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn renderer_version(&self) -> u32 {
        self.renderer_version
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }
}

/// Signing certificate metadata shown to the user and kept in the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: Option<String>,
    pub serial: Option<String>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
}

/// Result of a successful signing transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    method: SigningMethod,
    signed_bytes: Arc<[u8]>,
    filename: String,
    certificate: Option<CertificateInfo>,
    signer_name: String,
    signed_at: DateTime<Utc>,
    pre_hash: String,
    post_hash: String,
}

impl SignatureRecord {
    /// Build from the signed artifact. The post-hash is computed here so it
    /// always matches `signed_bytes`.
    pub fn new(
        method: SigningMethod,
        source: &GeneratedDocument,
        signed_bytes: Vec<u8>,
        filename: Option<String>,
        certificate: Option<CertificateInfo>,
        signer_name: impl Into<String>,
    ) -> Self {
        let post_hash = hash::digest(&signed_bytes);
        Self {
            method,
            signed_bytes: signed_bytes.into(),
            filename: filename
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| source.filename().to_string()),
            certificate,
            signer_name: signer_name.into(),
            signed_at: Utc::now(),
            pre_hash: source.hash().to_string(),
            post_hash,
        }
    }

    pub fn method(&self) -> SigningMethod {
        self.method
    }

    pub fn assurance(&self) -> AssuranceLevel {
        self.method.assurance()
    }

    pub fn signed_bytes(&self) -> &[u8] {
        &self.signed_bytes
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn certificate(&self) -> Option<&CertificateInfo> {
        self.certificate.as_ref()
    }

    pub fn signer_name(&self) -> &str {
        &self.signer_name
    }

    pub fn signed_at(&self) -> DateTime<Utc> {
        self.signed_at
    }

    pub fn pre_hash(&self) -> &str {
        &self.pre_hash
    }

    pub fn post_hash(&self) -> &str {
        &self.post_hash
    }

    /// A signature is valid only for the exact snapshot it was made from.
    pub fn is_valid_for(&self, document: &GeneratedDocument) -> bool {
        self.pre_hash == document.hash()
    }
}
