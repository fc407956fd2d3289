use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::Utc;
use rusqlite::Connection;

use super::detection::TokenDetectionRegistry;
use super::dialog::SigningDialog;
use super::state::SigningState;
use super::strategy::{validate_certificate, MockSentinels, SigningStrategy};
use crate::audit::{self, AuditLogger};
use crate::backends::{
    BackendError, CertificateSigner, DeviceAgent, FinalizeRequest, HashSignRequest,
    HttpCertificateSigner, HttpDeviceAgent, HttpNotificationGateway, HttpRecordApi,
    NotificationGateway, RecordApi, TokenInfo,
};
use crate::config::SigningConfig;
use crate::dispatch::{DeliveryError, DispatchRequest, Dispatcher};
use crate::error::{PipelineError, SessionWarning};
use crate::hash;
use crate::integrity::{self, LinkageReport};
use crate::models::{
    CertificateInfo, Channel, ContactInfo, DispatchSummary, GeneratedDocument, LinkageContext,
    PrescriptionDraft, RecordId, SignatureRecord, SigningMethod,
};
use crate::records::RecordPersister;
use crate::render::{apply_stamp, DocumentRenderer, RenderError, Stamp};
use crate::secret::{CertificateFile, SecretString};

/// External collaborators of a session.
#[derive(Clone)]
pub struct Backends {
    pub agent: Arc<dyn DeviceAgent>,
    pub signer: Arc<dyn CertificateSigner>,
    pub records: Arc<dyn RecordApi>,
    pub notifications: Arc<dyn NotificationGateway>,
}

impl Backends {
    /// HTTP clients for every service named in `config`.
    pub fn http(config: &SigningConfig) -> Result<Self, BackendError> {
        let timeout = config.http_timeout_secs;
        Ok(Self {
            agent: Arc::new(HttpDeviceAgent::new(&config.agent_url, timeout)?),
            signer: Arc::new(HttpCertificateSigner::new(&config.remote_signer_url, timeout)?),
            records: Arc::new(HttpRecordApi::new(&config.api_url, timeout)?),
            notifications: Arc::new(HttpNotificationGateway::new(
                &config.notification_url,
                timeout,
            )?),
        })
    }
}

/// Certificate kept for auto-signing before dispatch. Zeroed on drop.
struct ConfiguredCertificate {
    certificate: CertificateFile,
    password: SecretString,
}

/// One editing session over a single prescription draft.
///
/// Owns the draft, the cached rendering and the current signature. Every
/// mutation goes through `edit`, which invalidates the signature before
/// returning.
pub struct PrescriptionSession {
    config: SigningConfig,
    draft: PrescriptionDraft,
    linkage: LinkageContext,
    renderer: DocumentRenderer,
    state: SigningState,
    document: Option<GeneratedDocument>,
    signature: Option<SignatureRecord>,
    persister: RecordPersister,
    audit: AuditLogger,
    backends: Backends,
    dispatcher: Dispatcher,
    detections: Arc<TokenDetectionRegistry>,
    sentinels: MockSentinels,
    configured_certificate: Option<ConfiguredCertificate>,
    warnings: Vec<SessionWarning>,
    background: Vec<JoinHandle<()>>,
}

impl PrescriptionSession {
    pub fn new(
        config: SigningConfig,
        draft: PrescriptionDraft,
        linkage: LinkageContext,
        backends: Backends,
    ) -> Self {
        let renderer = DocumentRenderer::new(config.template.clone());
        let dispatcher = Dispatcher::new(
            Arc::clone(&backends.notifications),
            config.artifact_base_url.clone(),
            config.template.clinic_name.clone(),
        );
        let sentinels = MockSentinels::new(&config.mock_sentinels);

        Self {
            persister: RecordPersister::new(Arc::clone(&backends.records)),
            audit: AuditLogger::new(Arc::clone(&backends.records)),
            config,
            draft,
            linkage,
            renderer,
            state: SigningState::Unsigned,
            document: None,
            signature: None,
            backends,
            dispatcher,
            detections: Arc::new(TokenDetectionRegistry::new()),
            sentinels,
            configured_certificate: None,
            warnings: Vec::new(),
            background: Vec::new(),
        }
    }

    /// Queue failed audit writes in `outbox` instead of dropping them.
    pub fn with_audit_outbox(mut self, outbox: Connection) -> Self {
        self.audit = AuditLogger::with_outbox(Arc::clone(&self.backends.records), outbox);
        self
    }

    pub fn state(&self) -> SigningState {
        self.state
    }

    pub fn draft(&self) -> &PrescriptionDraft {
        &self.draft
    }

    pub fn linkage(&self) -> &LinkageContext {
        &self.linkage
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn record_id(&self) -> Option<&RecordId> {
        self.persister.record_id()
    }

    /// True only with a signature made from the current snapshot.
    pub fn is_signed(&self) -> bool {
        self.state == SigningState::Signed && self.signature().is_some()
    }

    /// The current signature, if it still matches the current snapshot.
    pub fn signature(&self) -> Option<&SignatureRecord> {
        let document = self.document.as_ref()?;
        self.signature.as_ref().filter(|s| s.is_valid_for(document))
    }

    pub fn warnings(&self) -> &[SessionWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<SessionWarning> {
        std::mem::take(&mut self.warnings)
    }

    // ─── Editing ───────────────────────────────────────────────

    /// Mutate the draft. Any prior signature is dropped before this returns;
    /// the backend record is marked unsigned in the background.
    pub fn edit<F>(&mut self, mutate: F)
    where
        F: FnOnce(&mut PrescriptionDraft),
    {
        mutate(&mut self.draft);

        let was_signed = self.signature.take().is_some();
        self.document = None;
        self.state = SigningState::Unsigned;

        if was_signed {
            tracing::info!(
                record_id = self.record_id().map(RecordId::as_str),
                "Draft edited after signing, signature invalidated"
            );
            if let Some(handle) = self.persister.mark_unsigned_in_background() {
                self.background.push(handle);
            }
        }
    }

    /// Wait for background invalidations to finish.
    pub fn flush_background(&mut self) {
        for handle in self.background.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("Background record update panicked");
            }
        }
    }

    // ─── Generation and linkage ────────────────────────────────

    /// Render the draft, or return the cached snapshot.
    pub fn generate(&mut self) -> Result<&GeneratedDocument, PipelineError> {
        if self.state == SigningState::Signing {
            return Err(PipelineError::SigningInProgress);
        }
        if self.document.is_none() {
            let document = self.renderer.render(&self.draft)?;
            self.document = Some(document);
            if self.state == SigningState::Unsigned {
                self.state = SigningState::Generated;
            }
        }
        self.document
            .as_ref()
            .ok_or(PipelineError::Render(RenderError::NoPages))
    }

    pub fn check_linkage(&self) -> LinkageReport {
        integrity::validate(&self.linkage, &self.draft.observed_linkage())
    }

    fn gate_linkage(&mut self) -> Result<(), PipelineError> {
        let report = self.check_linkage();
        if report.blocks(self.config.linkage_policy) {
            return Err(PipelineError::Linkage(report.errors()));
        }
        if !report.ok() {
            self.warnings.push(SessionWarning::Linkage(report.errors()));
        }
        Ok(())
    }

    // ─── Signing ───────────────────────────────────────────────

    /// Open a signing dialog. Token dialogs start a fresh detection pass.
    pub fn open_dialog(&self, method: SigningMethod) -> SigningDialog {
        SigningDialog::open(method, &self.detections)
    }

    /// Tokens for the dialog's detection pass. `Ok(None)` when a newer
    /// dialog has superseded this one.
    pub fn detect_tokens(
        &self,
        dialog: &SigningDialog,
    ) -> Result<Option<Vec<TokenInfo>>, PipelineError> {
        let Some(pass) = dialog.detection_pass() else {
            return Ok(None);
        };
        self.detections
            .detect(pass, self.backends.agent.as_ref())
            .map_err(agent_error)
    }

    /// Sign the current snapshot with `strategy`.
    ///
    /// On failure the session returns to `Generated`. On success the record,
    /// audit entry and signed flag are written; failures there become
    /// warnings and never undo the signature.
    pub fn sign(&mut self, strategy: SigningStrategy) -> Result<&SignatureRecord, PipelineError> {
        if self.state == SigningState::Signing {
            return Err(PipelineError::SigningInProgress);
        }
        if let SigningStrategy::CertificateFile {
            certificate,
            password,
        } = &strategy
        {
            validate_certificate(certificate, password)?;
        }
        let missing = self.draft.missing_fields();
        if !missing.is_empty() {
            return Err(PipelineError::Validation(missing));
        }
        self.gate_linkage()?;

        let document = self.generate()?.clone();
        if self.is_signed() {
            tracing::debug!("Snapshot already signed, keeping signature");
            return self
                .signature
                .as_ref()
                .ok_or(PipelineError::NotSigned);
        }

        let method = strategy.method();
        self.state = SigningState::Signing;
        tracing::info!(
            method = method.as_str(),
            pre_hash = hash::short(document.hash()),
            "Signing started"
        );

        match self.run_strategy(&document, strategy) {
            Ok(signature) => {
                tracing::info!(
                    method = method.as_str(),
                    post_hash = hash::short(signature.post_hash()),
                    "Signing completed"
                );
                self.complete_signing(&signature);
                self.state = SigningState::Signed;
                Ok(&*self.signature.insert(signature))
            }
            Err(e) => {
                self.state = SigningState::Generated;
                tracing::warn!(method = method.as_str(), error = %e, "Signing failed");
                Err(e)
            }
        }
    }

    fn signer_name(&self) -> String {
        self.draft
            .doctor
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("Unidentified prescriber")
            .to_string()
    }

    fn run_strategy(
        &mut self,
        document: &GeneratedDocument,
        strategy: SigningStrategy,
    ) -> Result<SignatureRecord, PipelineError> {
        let signature = match strategy {
            SigningStrategy::Token { pin, token_id } => {
                self.sign_with_token(document, pin.as_ref(), token_id.as_deref())?
            }
            SigningStrategy::CertificateFile {
                certificate,
                password,
            } => self.sign_with_certificate(document, &certificate, &password)?,
            SigningStrategy::Manual => {
                let stamp = Stamp::manual(self.signer_name(), Utc::now());
                let stamped = apply_stamp(document.bytes(), &stamp)?;
                SignatureRecord::new(
                    SigningMethod::Manual,
                    document,
                    stamped,
                    None,
                    None,
                    self.signer_name(),
                )
            }
        };

        if signature.post_hash() == signature.pre_hash() {
            return Err(PipelineError::Persistence(
                "signed artifact is identical to the unsigned document".into(),
            ));
        }
        Ok(signature)
    }

    fn sign_with_token(
        &mut self,
        document: &GeneratedDocument,
        pin: Option<&SecretString>,
        token_id: Option<&str>,
    ) -> Result<SignatureRecord, PipelineError> {
        let agent = Arc::clone(&self.backends.agent);

        let tokens = agent.detect_tokens().map_err(agent_error)?;
        let token = match token_id {
            Some(id) => tokens.iter().find(|t| t.id == id),
            None => tokens.first(),
        }
        .ok_or(PipelineError::AgentUnavailable)?;

        // Finalization links the artifact to the record when one exists.
        let record_id = self.persister.ensure_record(&self.draft, &self.linkage).ok();

        let response = agent
            .sign_hash(&HashSignRequest {
                hash: document.hash(),
                format: self.config.signature_format,
                pin,
                token_id: Some(&token.id),
            })
            .map_err(PipelineError::Agent)?;
        self.sentinels.check("signature", &response.signature)?;
        self.sentinels.check("certificate", &response.certificate)?;

        let certificate = response.certificate_info.clone().or_else(|| {
            token.subject.clone().map(|subject| CertificateInfo {
                subject,
                ..Default::default()
            })
        });
        if let Some(info) = &certificate {
            self.sentinels.check("certificate", &info.subject)?;
        }

        let finalized = agent
            .finalize(&FinalizeRequest {
                record_id: record_id.as_ref(),
                pdf: document.bytes(),
                signature: &response.signature,
                certificate: &response.certificate,
                certificate_subject: certificate.as_ref().map(|c| c.subject.as_str()),
                pre_hash: document.hash(),
            })
            .map_err(PipelineError::Agent)?;

        Ok(SignatureRecord::new(
            SigningMethod::Token,
            document,
            finalized.bytes,
            finalized.filename,
            certificate,
            self.signer_name(),
        ))
    }

    fn sign_with_certificate(
        &mut self,
        document: &GeneratedDocument,
        certificate: &CertificateFile,
        password: &SecretString,
    ) -> Result<SignatureRecord, PipelineError> {
        let stamp = Stamp::certificate(self.signer_name(), None, Utc::now());
        let stamped = apply_stamp(document.bytes(), &stamp)?;

        let signed = self
            .backends
            .signer
            .sign_pdf(&stamped, document.filename(), certificate, password)
            .map_err(PipelineError::RemoteSigning)?;
        if let Some(name) = &signed.filename {
            self.sentinels.check("signed document", name)?;
        }

        let info = match self.backends.records.fetch_certificate_info() {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(error = %e, "Certificate metadata unavailable");
                self.warnings
                    .push(SessionWarning::CertificateInfoUnavailable(e.to_string()));
                None
            }
        };
        if let Some(info) = &info {
            self.sentinels.check("certificate", &info.subject)?;
        }

        Ok(SignatureRecord::new(
            SigningMethod::CertificateFile,
            document,
            signed.bytes,
            signed.filename,
            info,
            self.signer_name(),
        ))
    }

    /// Record, audit and status writes that follow a successful signature.
    fn complete_signing(&mut self, signature: &SignatureRecord) {
        // A pending "mark unsigned" must land before the new signed flag.
        self.flush_background();

        let record_id = match self.persister.ensure_record(&self.draft, &self.linkage) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "Signed without a prescription record");
                self.warnings
                    .push(SessionWarning::RecordUnavailable(e.to_string()));
                None
            }
        };

        let entry = audit::build_entry(record_id.as_ref(), signature);
        if let Some(warning) = self.audit.append(&entry).warning() {
            self.warnings.push(warning);
        }

        if record_id.is_some() {
            if let Err(e) = self.persister.mark_signed(signature) {
                tracing::warn!(error = %e, "Signed flag not saved");
                self.warnings.push(SessionWarning::StatusNotSaved(e.to_string()));
            }
        }
    }

    // ─── Dispatch ──────────────────────────────────────────────

    /// Keep a certificate for auto-signing before dispatch.
    pub fn configure_certificate(
        &mut self,
        certificate: CertificateFile,
        password: SecretString,
    ) -> Result<(), PipelineError> {
        validate_certificate(&certificate, &password)?;
        self.configured_certificate = Some(ConfiguredCertificate {
            certificate,
            password,
        });
        Ok(())
    }

    pub fn clear_certificate(&mut self) {
        self.configured_certificate = None;
    }

    /// Deliver the signed document. An unsigned session is signed once with
    /// the configured certificate first; without one, dispatch is refused.
    pub fn dispatch(
        &mut self,
        channels: &BTreeSet<Channel>,
        contact: &ContactInfo,
    ) -> Result<DispatchSummary, PipelineError> {
        if channels.is_empty() {
            return Err(DeliveryError::NoChannel.into());
        }
        self.gate_linkage()?;

        if !self.is_signed() {
            let Some(configured) = &self.configured_certificate else {
                return Err(PipelineError::NotSigned);
            };
            let strategy = SigningStrategy::CertificateFile {
                certificate: configured.certificate.clone(),
                password: configured.password.clone(),
            };
            tracing::info!("Auto-signing before dispatch");
            self.sign(strategy)?;
        }

        let signature = self.signature().ok_or(PipelineError::NotSigned)?;
        Ok(self.dispatcher.dispatch(&DispatchRequest {
            signature,
            record_id: self.persister.record_id(),
            doctor_name: self.draft.doctor.name.as_deref(),
            channels,
            contact,
        }))
    }
}

impl Drop for PrescriptionSession {
    fn drop(&mut self) {
        self.flush_background();
    }
}

/// Unreachable agents count as "no device detected".
fn agent_error(e: BackendError) -> PipelineError {
    match e {
        BackendError::Connection(_) | BackendError::Timeout(_) => PipelineError::AgentUnavailable,
        other => PipelineError::Agent(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{
        AgentSignature, InMemoryRecordApi, RecordingNotificationGateway, ScriptedCertificateSigner,
        ScriptedDeviceAgent,
    };
    use crate::config::LinkagePolicy;
    use crate::db::open_memory_database;
    use crate::models::{AssuranceLevel, DeliveryOutcome, MedicationItem};
    use crate::render::{page_strings, CERTIFICATE_STAMP_TITLE, MANUAL_STAMP_TITLE};
    use chrono::NaiveDate;

    struct Fixture {
        api: Arc<InMemoryRecordApi>,
        agent: Arc<ScriptedDeviceAgent>,
        signer: Arc<ScriptedCertificateSigner>,
        gateway: Arc<RecordingNotificationGateway>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with(ScriptedDeviceAgent::new(), ScriptedCertificateSigner::new(), InMemoryRecordApi::new())
        }

        fn with(
            agent: ScriptedDeviceAgent,
            signer: ScriptedCertificateSigner,
            api: InMemoryRecordApi,
        ) -> Self {
            Self {
                api: Arc::new(api),
                agent: Arc::new(agent),
                signer: Arc::new(signer),
                gateway: Arc::new(RecordingNotificationGateway::new()),
            }
        }

        fn backends(&self) -> Backends {
            Backends {
                agent: self.agent.clone(),
                signer: self.signer.clone(),
                records: self.api.clone(),
                notifications: self.gateway.clone(),
            }
        }

        fn session(&self) -> PrescriptionSession {
            self.session_with(SigningConfig::default(), draft())
        }

        fn session_with(&self, config: SigningConfig, draft: PrescriptionDraft) -> PrescriptionSession {
            PrescriptionSession::new(config, draft, linkage(), self.backends())
        }

        fn network_calls(&self) -> usize {
            self.api.call_count()
                + self.signer.call_count()
                + self.agent.detect_calls()
                + self.agent.sign_calls()
                + self.gateway.call_count()
        }
    }

    fn draft() -> PrescriptionDraft {
        let mut draft = PrescriptionDraft::new(NaiveDate::from_ymd_opt(2026, 5, 4).unwrap());
        draft.patient.id = Some("pat-1".into());
        draft.patient.name = Some("Maria Silva".into());
        draft.doctor.id = Some("doc-1".into());
        draft.doctor.name = Some("Ana Costa".into());
        draft.consultation_id = Some("con-1".into());
        draft.items.push(MedicationItem {
            dosage: Some("500mg".into()),
            instructions: Some("1 cápsula de 8/8h por 7 dias".into()),
            ..MedicationItem::new("Amoxicilina")
        });
        draft
    }

    fn linkage() -> LinkageContext {
        LinkageContext::new("doc-1", "pat-1", "con-1")
    }

    fn pfx() -> CertificateFile {
        CertificateFile::new("ana_costa.pfx", vec![0x30; 4096])
    }

    fn contact() -> ContactInfo {
        ContactInfo {
            patient_user_id: Some("user-9".into()),
            patient_name: Some("Maria Silva".into()),
            email: Some("maria@example.com".into()),
            phone: Some("(11) 98765-4321".into()),
        }
    }

    #[test]
    fn manual_signing_scenario() {
        let fx = Fixture::new();
        let mut session = fx.session();

        let signature = session.sign(SigningStrategy::Manual).unwrap();
        assert_eq!(signature.method(), SigningMethod::Manual);
        assert_ne!(signature.pre_hash(), signature.post_hash());
        let strings = page_strings(signature.signed_bytes()).unwrap().concat();
        assert!(strings.iter().any(|s| s == MANUAL_STAMP_TITLE));
        assert!(!strings.iter().any(|s| s == CERTIFICATE_STAMP_TITLE));

        assert!(session.is_signed());
        assert_eq!(session.state(), SigningState::Signed);

        let audits = fx.api.audits();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].reason, "Prescription");
        assert!(audits[0].valid);
        assert_eq!(audits[0].method, SigningMethod::Manual);
        assert_eq!(audits[0].assurance, AssuranceLevel::VisualOnly);
        assert_eq!(audits[0].record_id.as_ref(), session.record_id());

        let record = &fx.api.records()[0];
        assert!(record.signed);
        assert_eq!(record.hash_alg.as_deref(), Some("SHA-256"));
        assert!(session.warnings().is_empty());
    }

    #[test]
    fn zero_tokens_fail_and_stay_generated() {
        let fx = Fixture::with(
            ScriptedDeviceAgent::new().with_tokens(vec![]),
            ScriptedCertificateSigner::new(),
            InMemoryRecordApi::new(),
        );
        let mut session = fx.session();

        let result = session.sign(SigningStrategy::Token {
            pin: Some(SecretString::new("1234")),
            token_id: None,
        });
        assert!(matches!(result, Err(PipelineError::AgentUnavailable)));
        assert_eq!(session.state(), SigningState::Generated);
        assert!(!session.is_signed());
        assert_eq!(fx.agent.sign_calls(), 0);
    }

    #[test]
    fn token_signing_hashes_snapshot_and_finalizes() {
        let fx = Fixture::with(
            ScriptedDeviceAgent::new().with_finalized_name("prescription_con-1_signed.pdf"),
            ScriptedCertificateSigner::new(),
            InMemoryRecordApi::new(),
        );
        let mut session = fx.session();
        let pre_hash = session.generate().unwrap().hash().to_string();

        let signature = session
            .sign(SigningStrategy::Token {
                pin: Some(SecretString::new("1234")),
                token_id: Some("slot-0".into()),
            })
            .unwrap();
        assert_eq!(signature.pre_hash(), pre_hash);
        assert_ne!(signature.post_hash(), pre_hash);
        assert_eq!(signature.filename(), "prescription_con-1_signed.pdf");
        assert_eq!(signature.assurance(), AssuranceLevel::Qualified);
        assert_eq!(signature.certificate().unwrap().subject, "CN=Ana Costa:12345678900");

        assert_eq!(fx.agent.signed_hashes(), vec![pre_hash]);
        assert_eq!(fx.agent.finalize_calls(), 1);
        let record = &fx.api.records()[0];
        assert_eq!(record.post_hash.as_deref(), session.signature().map(|s| s.post_hash()));
    }

    #[test]
    fn unknown_token_selection_is_unavailable() {
        let fx = Fixture::new();
        let mut session = fx.session();
        let result = session.sign(SigningStrategy::Token {
            pin: None,
            token_id: Some("slot-7".into()),
        });
        assert!(matches!(result, Err(PipelineError::AgentUnavailable)));
    }

    #[test]
    fn mock_signature_is_rejected() {
        let fx = Fixture::with(
            ScriptedDeviceAgent::new().with_signature(AgentSignature {
                signature: "MOCK_SIGNATURE_BASE64".into(),
                certificate: "MIIDdzCCAl+gAwIBAgIE".into(),
                certificate_info: None,
            }),
            ScriptedCertificateSigner::new(),
            InMemoryRecordApi::new(),
        );
        let mut session = fx.session();

        let result = session.sign(SigningStrategy::Token {
            pin: None,
            token_id: None,
        });
        assert!(matches!(result, Err(PipelineError::MockSignatureRejected("signature"))));
        assert_eq!(fx.agent.finalize_calls(), 0);
        assert_eq!(session.state(), SigningState::Generated);
        assert!(fx.api.audits().is_empty());
    }

    #[test]
    fn mock_certificate_is_rejected() {
        let fx = Fixture::with(
            ScriptedDeviceAgent::new().with_signature(AgentSignature {
                signature: "MIAGCSqGSIb3DQEHAqCAMIACAQEx".into(),
                certificate: "mockCertificate".into(),
                certificate_info: None,
            }),
            ScriptedCertificateSigner::new(),
            InMemoryRecordApi::new(),
        );
        let mut session = fx.session();
        let result = session.sign(SigningStrategy::Token {
            pin: None,
            token_id: None,
        });
        assert!(matches!(result, Err(PipelineError::MockSignatureRejected("certificate"))));
    }

    #[test]
    fn mock_certificate_metadata_rejects_file_signing() {
        let fx = Fixture::with(
            ScriptedDeviceAgent::new(),
            ScriptedCertificateSigner::new(),
            InMemoryRecordApi::new().with_certificate(CertificateInfo {
                subject: "CN=MockCertificate".into(),
                ..Default::default()
            }),
        );
        let mut session = fx.session();
        let result = session.sign(SigningStrategy::CertificateFile {
            certificate: pfx(),
            password: SecretString::new("s3cret"),
        });
        assert!(matches!(result, Err(PipelineError::MockSignatureRejected("certificate"))));
        assert!(!session.is_signed());
    }

    #[test]
    fn certificate_prechecks_make_no_network_calls() {
        let fx = Fixture::new();
        let mut session = fx.session();

        let cases = [
            (CertificateFile::new("cert.txt", vec![0x30; 4096]), "s3cret"),
            (CertificateFile::new("cert.pfx", vec![0x30; 11 * 1024 * 1024]), "s3cret"),
            (pfx(), "abc"),
        ];
        for (certificate, password) in cases {
            let result = session.sign(SigningStrategy::CertificateFile {
                certificate,
                password: SecretString::new(password),
            });
            assert!(matches!(
                result,
                Err(PipelineError::CertificateFormat(_) | PipelineError::CertificatePassword(_))
            ));
        }
        assert_eq!(fx.network_calls(), 0);
        assert_eq!(session.state(), SigningState::Unsigned);
    }

    #[test]
    fn certificate_file_signing_fetches_metadata() {
        let fx = Fixture::with(
            ScriptedDeviceAgent::new(),
            ScriptedCertificateSigner::new(),
            InMemoryRecordApi::new().with_certificate(CertificateInfo {
                subject: "CN=Ana Costa:12345678900".into(),
                issuer: Some("AC Certisign".into()),
                ..Default::default()
            }),
        );
        let mut session = fx.session();

        let signature = session
            .sign(SigningStrategy::CertificateFile {
                certificate: pfx(),
                password: SecretString::new("s3cret"),
            })
            .unwrap();
        assert_eq!(signature.method(), SigningMethod::CertificateFile);
        assert_eq!(signature.assurance(), AssuranceLevel::Advanced);
        assert_ne!(signature.pre_hash(), signature.post_hash());
        assert_eq!(signature.certificate().unwrap().issuer.as_deref(), Some("AC Certisign"));
        assert_eq!(fx.signer.call_count(), 1);
        assert_eq!(
            fx.api.audits()[0].certificate_subject.as_deref(),
            Some("CN=Ana Costa:12345678900")
        );
    }

    #[test]
    fn remote_signing_failure_keeps_generated() {
        let fx = Fixture::with(
            ScriptedDeviceAgent::new(),
            ScriptedCertificateSigner::new().failing(BackendError::Status {
                status: 401,
                body: "bad password".into(),
            }),
            InMemoryRecordApi::new(),
        );
        let mut session = fx.session();
        let result = session.sign(SigningStrategy::CertificateFile {
            certificate: pfx(),
            password: SecretString::new("wrong-pass"),
        });
        assert!(matches!(result, Err(PipelineError::RemoteSigning(_))));
        assert_eq!(session.state(), SigningState::Generated);
        assert!(fx.api.audits().is_empty());
    }

    #[test]
    fn edit_invalidates_signature_synchronously() {
        let fx = Fixture::new();
        let mut session = fx.session();
        session.sign(SigningStrategy::Manual).unwrap();
        assert!(session.is_signed());

        session.edit(|d| d.observations = Some("Tomar após as refeições".into()));
        assert!(!session.is_signed());
        assert!(session.signature().is_none());
        assert_eq!(session.state(), SigningState::Unsigned);

        session.flush_background();
        let (_, last) = fx.api.signature_updates().pop().unwrap();
        assert!(!last.signed);
        assert!(!fx.api.records()[0].signed);
    }

    #[test]
    fn edit_before_signing_does_not_touch_backend() {
        let fx = Fixture::new();
        let mut session = fx.session();
        session.generate().unwrap();
        session.edit(|d| d.valid_until = NaiveDate::from_ymd_opt(2026, 6, 4));
        session.flush_background();
        assert_eq!(session.state(), SigningState::Unsigned);
        assert_eq!(fx.api.call_count(), 0);
    }

    #[test]
    fn resigning_reuses_record() {
        let fx = Fixture::new();
        let mut session = fx.session();
        session.sign(SigningStrategy::Manual).unwrap();
        let first = session.record_id().cloned();

        session.edit(|d| {
            d.items.push(MedicationItem::new("Dipirona"));
            d.observations = Some("Retornar em 7 dias".into());
        });
        let post_hash = session
            .sign(SigningStrategy::Manual)
            .unwrap()
            .post_hash()
            .to_string();

        assert_eq!(session.record_id().cloned(), first);
        assert_eq!(fx.api.create_count(), 1);
        assert_eq!(fx.api.audits().len(), 2);

        let id = first.unwrap();
        let names: Vec<String> = fx.api.items(&id).into_iter().map(|i| i.medication).collect();
        assert_eq!(names, vec!["Amoxicilina", "Dipirona"]);
        let record = &fx.api.records()[0];
        assert_eq!(record.observations.as_deref(), Some("Retornar em 7 dias"));
        assert!(record.signed);
        assert_eq!(record.post_hash.as_deref(), Some(post_hash.as_str()));
    }

    #[test]
    fn signing_twice_keeps_existing_signature() {
        let fx = Fixture::new();
        let mut session = fx.session();
        let first = session.sign(SigningStrategy::Manual).unwrap().post_hash().to_string();
        let second = session.sign(SigningStrategy::Manual).unwrap().post_hash().to_string();
        assert_eq!(first, second);
        assert_eq!(fx.api.audits().len(), 1);
    }

    #[test]
    fn audit_failure_is_queued_not_fatal() {
        let api = InMemoryRecordApi::new();
        api.set_fail_audit(true);
        let fx = Fixture::with(ScriptedDeviceAgent::new(), ScriptedCertificateSigner::new(), api);
        let mut session = fx.session().with_audit_outbox(open_memory_database().unwrap());

        session.sign(SigningStrategy::Manual).unwrap();
        assert!(session.is_signed());
        assert!(session
            .warnings()
            .iter()
            .any(|w| matches!(w, SessionWarning::AuditDeferred { queued: true, .. })));
        assert_eq!(session.audit().pending_count().unwrap(), 1);

        fx.api.set_fail_audit(false);
        assert_eq!(session.audit().retry_pending().unwrap().delivered, 1);
    }

    #[test]
    fn offline_backend_degrades_gracefully() {
        let api = InMemoryRecordApi::new();
        api.set_offline(true);
        let fx = Fixture::with(ScriptedDeviceAgent::new(), ScriptedCertificateSigner::new(), api);
        let mut session = fx.session();

        session.sign(SigningStrategy::Manual).unwrap();
        assert!(session.is_signed());
        assert!(session.record_id().is_none());
        let warnings = session.take_warnings();
        assert!(matches!(warnings[0], SessionWarning::RecordUnavailable(_)));
        assert!(matches!(warnings[1], SessionWarning::AuditDeferred { queued: false, .. }));
        assert!(session.warnings().is_empty());
    }

    #[test]
    fn linkage_mismatch_blocks_by_default() {
        let fx = Fixture::new();
        let mut d = draft();
        d.doctor.id = Some("doc-2".into());
        let mut session = fx.session_with(SigningConfig::default(), d.clone());

        let result = session.sign(SigningStrategy::Manual);
        assert!(matches!(result, Err(PipelineError::Linkage(ref e)) if e.len() == 1));
        assert_eq!(fx.network_calls(), 0);

        let config = SigningConfig {
            linkage_policy: LinkagePolicy::Warn,
            ..SigningConfig::default()
        };
        let mut lenient = fx.session_with(config, d);
        lenient.sign(SigningStrategy::Manual).unwrap();
        assert!(matches!(lenient.warnings()[0], SessionWarning::Linkage(_)));
    }

    #[test]
    fn missing_fields_block_signing_but_not_preview() {
        let fx = Fixture::new();
        let mut d = draft();
        d.patient.name = None;
        let mut session = fx.session_with(SigningConfig::default(), d);

        assert!(session.generate().is_ok());
        let result = session.sign(SigningStrategy::Manual);
        assert!(matches!(result, Err(PipelineError::Validation(ref f)) if f == &vec!["patient name"]));
    }

    #[test]
    fn generation_is_cached() {
        let fx = Fixture::new();
        let mut session = fx.session();
        let first = session.generate().unwrap().clone();
        let second = session.generate().unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(session.state(), SigningState::Generated);
    }

    #[test]
    fn signing_in_progress_rejects_reentry() {
        let fx = Fixture::new();
        let mut session = fx.session();
        session.state = SigningState::Signing;
        assert!(matches!(
            session.sign(SigningStrategy::Manual),
            Err(PipelineError::SigningInProgress)
        ));
        assert!(matches!(session.generate(), Err(PipelineError::SigningInProgress)));
    }

    #[test]
    fn superseded_dialog_gets_no_tokens() {
        let fx = Fixture::new();
        let session = fx.session();
        let stale = session.open_dialog(SigningMethod::Token);
        let fresh = session.open_dialog(SigningMethod::Token);

        assert!(session.detect_tokens(&stale).unwrap().is_none());
        assert_eq!(session.detect_tokens(&fresh).unwrap().unwrap().len(), 1);
        stale.cancel();
        assert_eq!(session.state(), SigningState::Unsigned);
    }

    #[test]
    fn dialog_flows_into_signing() {
        let fx = Fixture::new();
        let mut session = fx.session();
        let mut dialog = session.open_dialog(SigningMethod::Token);
        dialog.set_pin(SecretString::new("1234"));
        let strategy = dialog.into_strategy().unwrap();
        assert!(session.sign(strategy).is_ok());
    }

    #[test]
    fn dispatch_requires_signature_or_certificate() {
        let fx = Fixture::new();
        let mut session = fx.session();
        let channels = BTreeSet::from([Channel::Email]);
        assert!(matches!(
            session.dispatch(&channels, &contact()),
            Err(PipelineError::NotSigned)
        ));
        assert_eq!(fx.gateway.call_count(), 0);
    }

    #[test]
    fn dispatch_auto_signs_with_configured_certificate() {
        let fx = Fixture::new();
        let mut session = fx.session();
        session
            .configure_certificate(pfx(), SecretString::new("s3cret"))
            .unwrap();

        let channels = BTreeSet::from([Channel::Internal, Channel::Email, Channel::Sms]);
        let summary = session.dispatch(&channels, &contact()).unwrap();
        assert!(summary.all_delivered());
        assert!(session.is_signed());
        assert_eq!(fx.signer.call_count(), 1);

        let id = session.record_id().unwrap().to_string();
        assert!(fx.gateway.sms()[0].body.contains(&id));
    }

    #[test]
    fn failed_auto_sign_aborts_dispatch() {
        let fx = Fixture::with(
            ScriptedDeviceAgent::new(),
            ScriptedCertificateSigner::new().failing(BackendError::Timeout(30)),
            InMemoryRecordApi::new(),
        );
        let mut session = fx.session();
        session
            .configure_certificate(pfx(), SecretString::new("s3cret"))
            .unwrap();

        let channels = BTreeSet::from([Channel::Email]);
        assert!(matches!(
            session.dispatch(&channels, &contact()),
            Err(PipelineError::RemoteSigning(_))
        ));
        assert_eq!(fx.gateway.call_count(), 0);
        assert_eq!(fx.signer.call_count(), 1);
    }

    #[test]
    fn configure_rejects_invalid_certificate() {
        let fx = Fixture::new();
        let mut session = fx.session();
        assert!(session
            .configure_certificate(CertificateFile::new("cert.txt", vec![1; 10]), SecretString::new("s3cret"))
            .is_err());
    }

    #[test]
    fn dispatch_with_invalid_phone_sends_nothing() {
        let fx = Fixture::new();
        let mut session = fx.session();
        session.sign(SigningStrategy::Manual).unwrap();
        let calls_before = fx.gateway.call_count();

        let channels = BTreeSet::from([Channel::Sms]);
        let contact = ContactInfo {
            phone: Some("123".into()),
            ..contact()
        };
        let summary = session.dispatch(&channels, &contact).unwrap();
        assert_eq!(summary.attempts[0].outcome, DeliveryOutcome::Rejected);
        assert_eq!(fx.gateway.call_count(), calls_before);
    }

    #[test]
    fn empty_channel_set_is_refused() {
        let fx = Fixture::new();
        let mut session = fx.session();
        assert!(matches!(
            session.dispatch(&BTreeSet::new(), &contact()),
            Err(PipelineError::Delivery(DeliveryError::NoChannel))
        ));
    }
}
