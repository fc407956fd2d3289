use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "MedSign";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Digest used for pre/post hashes. Recorded verbatim in audit entries.
pub const HASH_ALGORITHM: &str = "SHA-256";

/// Reason written on every prescription audit entry.
pub const AUDIT_REASON: &str = "Prescription";

/// PKCS#12 upload limits, checked before any network call.
pub const MAX_CERTIFICATE_BYTES: u64 = 10 * 1024 * 1024;
pub const MIN_CERTIFICATE_PASSWORD_LEN: usize = 4;
pub const CERTIFICATE_EXTENSIONS: &[&str] = &["pfx", "p12"];

/// Hard ceiling for a single SMS body.
pub const SMS_MAX_CHARS: usize = 160;

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "medsign_lib=info,warn"
}

/// Get the application data directory (~/MedSign/).
/// `None` when the platform exposes no home directory.
pub fn app_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(APP_NAME))
}

/// Location of the local audit outbox database.
pub fn audit_outbox_path() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join("audit_outbox.db"))
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// What happens when the clinical linkage check finds a mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkagePolicy {
    /// Mismatches block signing and dispatch.
    Enforce,
    /// Mismatches are surfaced as warnings only.
    Warn,
}

/// Detached signature container requested from the device agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureFormat {
    CadesDetached,
    Pkcs7Detached,
}

impl SignatureFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CadesDetached => "cades_detached",
            Self::Pkcs7Detached => "pkcs7_detached",
        }
    }
}

/// Static template content printed on every generated document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub clinic_name: String,
    pub clinic_address: Option<String>,
    pub footer: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            clinic_name: "MedSign Clinic".to_string(),
            clinic_address: None,
            footer: "Document generated electronically.".to_string(),
        }
    }
}

/// Runtime configuration for the signing pipeline.
///
/// Every field has a default so a partial JSON file or a handful of
/// environment variables is enough to run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Loopback URL of the smartcard/token device agent.
    pub agent_url: String,
    /// Backend record API.
    pub api_url: String,
    /// Remote PKCS#12 signing service.
    pub remote_signer_url: String,
    /// Notification delivery service.
    pub notification_url: String,
    /// Base for download links embedded in notifications.
    pub artifact_base_url: String,
    pub http_timeout_secs: u64,
    /// Substrings that mark a signing response as a test artifact.
    pub mock_sentinels: Vec<String>,
    pub linkage_policy: LinkagePolicy,
    pub signature_format: SignatureFormat,
    pub template: TemplateConfig,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            agent_url: "http://127.0.0.1:9443".to_string(),
            api_url: "http://127.0.0.1:8000/api".to_string(),
            remote_signer_url: "http://127.0.0.1:8000/api/sign".to_string(),
            notification_url: "http://127.0.0.1:8000/api/notifications".to_string(),
            artifact_base_url: "http://127.0.0.1:8000/prescriptions".to_string(),
            http_timeout_secs: 30,
            mock_sentinels: vec![
                "mock_".to_string(),
                "mock-".to_string(),
                "mocksignature".to_string(),
                "mockcertificate".to_string(),
            ],
            linkage_policy: LinkagePolicy::Enforce,
            signature_format: SignatureFormat::CadesDetached,
            template: TemplateConfig::default(),
        }
    }
}

impl SigningConfig {
    /// Read a JSON config file. Missing keys fall back to defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Defaults overlaid with `MEDSIGN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (env in production,
    /// a map in tests).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MEDSIGN_AGENT_URL") {
            self.agent_url = v;
        }
        if let Some(v) = lookup("MEDSIGN_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = lookup("MEDSIGN_REMOTE_SIGNER_URL") {
            self.remote_signer_url = v;
        }
        if let Some(v) = lookup("MEDSIGN_NOTIFICATION_URL") {
            self.notification_url = v;
        }
        if let Some(v) = lookup("MEDSIGN_ARTIFACT_BASE_URL") {
            self.artifact_base_url = v;
        }
        if let Some(v) = lookup("MEDSIGN_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "MEDSIGN_HTTP_TIMEOUT_SECS".to_string(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("MEDSIGN_LINKAGE_POLICY") {
            self.linkage_policy = match v.as_str() {
                "enforce" => LinkagePolicy::Enforce,
                "warn" => LinkagePolicy::Warn,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "MEDSIGN_LINKAGE_POLICY".to_string(),
                        value: v,
                    })
                }
            };
        }
        if let Some(v) = lookup("MEDSIGN_CLINIC_NAME") {
            self.template.clinic_name = v;
        }
        Ok(self)
    }
}
