use crate::config::{CERTIFICATE_EXTENSIONS, MAX_CERTIFICATE_BYTES, MIN_CERTIFICATE_PASSWORD_LEN};
use crate::error::PipelineError;
use crate::models::SigningMethod;
use crate::secret::{CertificateFile, SecretString};

/// One signing attempt. Secrets are owned here and zeroed when the
/// strategy is dropped at the end of the attempt.
#[derive(Debug)]
pub enum SigningStrategy {
    Token {
        pin: Option<SecretString>,
        token_id: Option<String>,
    },
    CertificateFile {
        certificate: CertificateFile,
        password: SecretString,
    },
    Manual,
}

impl SigningStrategy {
    pub fn method(&self) -> SigningMethod {
        match self {
            Self::Token { .. } => SigningMethod::Token,
            Self::CertificateFile { .. } => SigningMethod::CertificateFile,
            Self::Manual => SigningMethod::Manual,
        }
    }
}

/// PKCS#12 pre-checks. Runs before any network call.
pub fn validate_certificate(
    certificate: &CertificateFile,
    password: &SecretString,
) -> Result<(), PipelineError> {
    let extension = certificate.extension().unwrap_or_default();
    if !CERTIFICATE_EXTENSIONS.contains(&extension.as_str()) {
        return Err(PipelineError::CertificateFormat(format!(
            "expected a .pfx or .p12 file, got {}",
            certificate.filename()
        )));
    }
    if certificate.size() == 0 {
        return Err(PipelineError::CertificateFormat("file is empty".into()));
    }
    if certificate.size() > MAX_CERTIFICATE_BYTES {
        return Err(PipelineError::CertificateFormat(format!(
            "file exceeds {} MB",
            MAX_CERTIFICATE_BYTES / (1024 * 1024)
        )));
    }
    if password.is_blank() {
        return Err(PipelineError::CertificatePassword("password is required".into()));
    }
    if password.char_len() < MIN_CERTIFICATE_PASSWORD_LEN {
        return Err(PipelineError::CertificatePassword(format!(
            "password must have at least {MIN_CERTIFICATE_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Markers of test signing artifacts. Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct MockSentinels {
    patterns: Vec<String>,
}

impl MockSentinels {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, payload: &str) -> bool {
        let payload = payload.to_lowercase();
        self.patterns.iter().any(|p| payload.contains(p.as_str()))
    }

    /// Reject `payload` as `field` when it carries a marker.
    pub fn check(&self, field: &'static str, payload: &str) -> Result<(), PipelineError> {
        if self.matches(payload) {
            tracing::error!(field, "Test signature marker in signing response");
            return Err(PipelineError::MockSignatureRejected(field));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SigningConfig;

    fn password(s: &str) -> SecretString {
        SecretString::new(s)
    }

    #[test]
    fn accepts_pfx_and_p12() {
        let pfx = CertificateFile::new("Dr_Ana.PFX", vec![0x30; 2048]);
        let p12 = CertificateFile::new("cert.p12", vec![0x30; 2048]);
        assert!(validate_certificate(&pfx, &password("s3cret")).is_ok());
        assert!(validate_certificate(&p12, &password("1234")).is_ok());
    }

    #[test]
    fn rejects_wrong_extension() {
        let txt = CertificateFile::new("cert.txt", vec![0x30; 2048]);
        assert!(matches!(
            validate_certificate(&txt, &password("s3cret")),
            Err(PipelineError::CertificateFormat(_))
        ));
    }

    #[test]
    fn rejects_oversized_file() {
        let big = CertificateFile::new("cert.pfx", vec![0; 11 * 1024 * 1024]);
        assert!(matches!(
            validate_certificate(&big, &password("s3cret")),
            Err(PipelineError::CertificateFormat(_))
        ));
    }

    #[test]
    fn rejects_short_or_blank_password() {
        let pfx = CertificateFile::new("cert.pfx", vec![0x30; 2048]);
        assert!(matches!(
            validate_certificate(&pfx, &password("abc")),
            Err(PipelineError::CertificatePassword(_))
        ));
        assert!(matches!(
            validate_certificate(&pfx, &password("    ")),
            Err(PipelineError::CertificatePassword(_))
        ));
    }

    #[test]
    fn sentinels_match_case_insensitively() {
        let sentinels = MockSentinels::new(&SigningConfig::default().mock_sentinels);
        assert!(sentinels.matches("MOCK_SIGNATURE_123"));
        assert!(sentinels.matches("-----BEGIN CERTIFICATE----- MockCertificate"));
        assert!(!sentinels.matches("MIAGCSqGSIb3DQEHAqCAMIACAQEx"));
        assert!(matches!(
            sentinels.check("signature", "mock-sig"),
            Err(PipelineError::MockSignatureRejected("signature"))
        ));
    }

    #[test]
    fn blank_patterns_are_ignored() {
        let sentinels = MockSentinels::new(&["  ".to_string()]);
        assert!(!sentinels.matches("anything"));
    }

    #[test]
    fn strategy_reports_method() {
        assert_eq!(SigningStrategy::Manual.method(), SigningMethod::Manual);
        let token = SigningStrategy::Token {
            pin: None,
            token_id: None,
        };
        assert_eq!(token.method(), SigningMethod::Token);
    }
}
