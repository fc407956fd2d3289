//! Scoped holder for the secrets of one signing attempt.

use crate::error::PipelineError;
use crate::models::SigningMethod;
use crate::secret::{CertificateFile, SecretString};

use super::detection::{DetectionPass, TokenDetectionRegistry};
use super::strategy::SigningStrategy;

/// Collects the PIN, password or certificate while the dialog is open.
///
/// Secrets are zeroed on `clear`, on `cancel`, when handed to a strategy
/// (the strategy then owns and zeroes them) and on drop.
pub struct SigningDialog {
    method: SigningMethod,
    pass: Option<DetectionPass>,
    token_id: Option<String>,
    pin: Option<SecretString>,
    certificate: Option<CertificateFile>,
    password: Option<SecretString>,
}

impl SigningDialog {
    /// Open a dialog. Token dialogs start a new detection pass.
    pub fn open(method: SigningMethod, registry: &TokenDetectionRegistry) -> Self {
        let pass = (method == SigningMethod::Token).then(|| registry.start_pass());
        Self {
            method,
            pass,
            token_id: None,
            pin: None,
            certificate: None,
            password: None,
        }
    }

    pub fn method(&self) -> SigningMethod {
        self.method
    }

    pub fn detection_pass(&self) -> Option<DetectionPass> {
        self.pass
    }

    pub fn select_token(&mut self, token_id: impl Into<String>) {
        self.token_id = Some(token_id.into());
    }

    pub fn set_pin(&mut self, pin: SecretString) {
        self.pin = Some(pin);
    }

    pub fn set_certificate(&mut self, certificate: CertificateFile) {
        self.certificate = Some(certificate);
    }

    pub fn set_password(&mut self, password: SecretString) {
        self.password = Some(password);
    }

    pub fn has_secrets(&self) -> bool {
        self.pin.is_some() || self.certificate.is_some() || self.password.is_some()
    }

    /// Drop every secret. `ZeroizeOnDrop` wipes the buffers.
    pub fn clear(&mut self) {
        self.pin = None;
        self.certificate = None;
        self.password = None;
    }

    /// Abort the attempt. Nothing reaches the session.
    pub fn cancel(mut self) {
        self.clear();
        tracing::debug!(method = self.method.as_str(), "Signing dialog cancelled");
    }

    /// Hand the collected input over to a signing strategy.
    pub fn into_strategy(mut self) -> Result<SigningStrategy, PipelineError> {
        match self.method {
            SigningMethod::Manual => Ok(SigningStrategy::Manual),
            SigningMethod::Token => Ok(SigningStrategy::Token {
                pin: self.pin.take(),
                token_id: self.token_id.take(),
            }),
            SigningMethod::CertificateFile => {
                let certificate = self.certificate.take().ok_or_else(|| {
                    PipelineError::CertificateFormat("no certificate selected".into())
                })?;
                let password = self.password.take().ok_or_else(|| {
                    PipelineError::CertificatePassword("password is required".into())
                })?;
                Ok(SigningStrategy::CertificateFile {
                    certificate,
                    password,
                })
            }
        }
    }
}

impl Drop for SigningDialog {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_dialog_starts_detection_pass() {
        let registry = TokenDetectionRegistry::new();
        let first = SigningDialog::open(SigningMethod::Token, &registry);
        let second = SigningDialog::open(SigningMethod::Token, &registry);
        assert!(!registry.is_current(first.detection_pass().unwrap()));
        assert!(registry.is_current(second.detection_pass().unwrap()));

        let manual = SigningDialog::open(SigningMethod::Manual, &registry);
        assert!(manual.detection_pass().is_none());
    }

    #[test]
    fn clear_drops_secrets() {
        let registry = TokenDetectionRegistry::new();
        let mut dialog = SigningDialog::open(SigningMethod::Token, &registry);
        dialog.set_pin(SecretString::new("1234"));
        assert!(dialog.has_secrets());
        dialog.clear();
        assert!(!dialog.has_secrets());
    }

    #[test]
    fn certificate_dialog_requires_both_inputs() {
        let registry = TokenDetectionRegistry::new();
        let mut dialog = SigningDialog::open(SigningMethod::CertificateFile, &registry);
        dialog.set_certificate(CertificateFile::new("cert.pfx", vec![1; 16]));
        assert!(matches!(
            dialog.into_strategy(),
            Err(PipelineError::CertificatePassword(_))
        ));

        let mut dialog = SigningDialog::open(SigningMethod::CertificateFile, &registry);
        dialog.set_certificate(CertificateFile::new("cert.pfx", vec![1; 16]));
        dialog.set_password(SecretString::new("s3cret"));
        let strategy = dialog.into_strategy().unwrap();
        assert_eq!(strategy.method(), SigningMethod::CertificateFile);
    }

    #[test]
    fn token_strategy_carries_pin_and_selection() {
        let registry = TokenDetectionRegistry::new();
        let mut dialog = SigningDialog::open(SigningMethod::Token, &registry);
        dialog.select_token("slot-1");
        dialog.set_pin(SecretString::new("9876"));
        match dialog.into_strategy().unwrap() {
            SigningStrategy::Token { pin, token_id } => {
                assert_eq!(pin.unwrap().expose(), "9876");
                assert_eq!(token_id.as_deref(), Some("slot-1"));
            }
            other => panic!("unexpected strategy {other:?}"),
        }
    }
}
