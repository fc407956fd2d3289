//! Session-scoped secrets: token PINs, certificate passwords and PKCS#12 payloads.
//!
//! Key properties:
//! - Secrets exist only in memory, never serialized
//! - Zeroed via `ZeroizeOnDrop` when the holder goes out of scope
//! - `Debug` output is redacted

use std::fmt;
use std::path::Path;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A PIN or password, zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the plaintext. Callers must not copy it into long-lived storage.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

/// An uploaded PKCS#12 container. The bytes hold a private key, so they
/// are zeroed on drop like any other secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CertificateFile {
    filename: String,
    bytes: Vec<u8>,
}

impl CertificateFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Lowercased extension, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}

impl fmt::Debug for CertificateFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateFile")
            .field("filename", &self.filename)
            .field("size", &self.bytes.len())
            .finish()
    }
}
