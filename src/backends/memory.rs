//! In-memory backends for tests and offline runs.
//!
//! Every double counts its calls so tests can assert that a rejected
//! request never reached the network.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{
    AgentSignature, BackendError, CertificateSigner, DeviceAgent, FinalizeRequest,
    HashSignRequest, NotificationGateway, RecordApi, SignedPdf, TokenInfo,
};
use crate::dispatch::{EmailMessage, InternalNotification, SmsMessage};
use crate::models::{
    AuditEntry, CertificateInfo, Channel, PrescriptionItemRecord, PrescriptionRecord,
    RecordDetails, RecordId, SignatureStatus,
};
use crate::secret::{CertificateFile, SecretString};

fn guard<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, BackendError> {
    mutex
        .lock()
        .map_err(|_| BackendError::HttpClient("in-memory backend lock poisoned".into()))
}

fn offline() -> BackendError {
    BackendError::Connection("in-memory".into())
}

// ═══════════════════════════════════════════════════════════
// Record API
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
struct RecordStore {
    records: BTreeMap<RecordId, PrescriptionRecord>,
    items: BTreeMap<RecordId, Vec<PrescriptionItemRecord>>,
    audits: Vec<AuditEntry>,
    signature_updates: Vec<(RecordId, SignatureStatus)>,
    certificate: Option<CertificateInfo>,
    next_id: u32,
}

#[derive(Default)]
pub struct InMemoryRecordApi {
    store: Mutex<RecordStore>,
    offline: AtomicBool,
    fail_audit: AtomicBool,
    calls: AtomicUsize,
    creates: AtomicUsize,
    detail_updates: AtomicUsize,
    item_replacements: AtomicUsize,
}

impl InMemoryRecordApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_certificate(self, info: CertificateInfo) -> Self {
        if let Ok(mut store) = self.store.lock() {
            store.certificate = Some(info);
        }
        self
    }

    /// Make every call fail as if the service were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make only `append_audit` fail.
    pub fn set_fail_audit(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<PrescriptionRecord> {
        self.store
            .lock()
            .map(|s| s.records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn items(&self, id: &RecordId) -> Vec<PrescriptionItemRecord> {
        self.store
            .lock()
            .map(|s| s.items.get(id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn audits(&self) -> Vec<AuditEntry> {
        self.store
            .lock()
            .map(|s| s.audits.clone())
            .unwrap_or_default()
    }

    pub fn signature_updates(&self) -> Vec<(RecordId, SignatureStatus)> {
        self.store
            .lock()
            .map(|s| s.signature_updates.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn detail_update_count(&self) -> usize {
        self.detail_updates.load(Ordering::SeqCst)
    }

    pub fn item_replacement_count(&self) -> usize {
        self.item_replacements.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline());
        }
        Ok(())
    }
}

impl RecordApi for InMemoryRecordApi {
    fn find_record(
        &self,
        patient_id: &str,
        consultation_id: &str,
    ) -> Result<Option<PrescriptionRecord>, BackendError> {
        self.enter()?;
        let store = guard(&self.store)?;
        Ok(store
            .records
            .values()
            .find(|r| r.patient_id == patient_id && r.consultation_id == consultation_id)
            .cloned())
    }

    fn create_record(&self, record: &PrescriptionRecord) -> Result<RecordId, BackendError> {
        self.enter()?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut store = guard(&self.store)?;
        store.next_id += 1;
        let id = RecordId(format!("rx-{}", store.next_id));
        let mut stored = record.clone();
        stored.id = Some(id.clone());
        store.records.insert(id.clone(), stored);
        Ok(id)
    }

    fn update_record(&self, id: &RecordId, details: &RecordDetails) -> Result<(), BackendError> {
        self.enter()?;
        let mut store = guard(&self.store)?;
        let record = store
            .records
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        record.doctor_id = details.doctor_id.clone();
        record.format = details.format;
        record.issued_on = details.issued_on;
        record.valid_until = details.valid_until;
        record.observations = details.observations.clone();
        self.detail_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn replace_items(
        &self,
        id: &RecordId,
        items: &[PrescriptionItemRecord],
    ) -> Result<(), BackendError> {
        self.enter()?;
        let mut store = guard(&self.store)?;
        if !store.records.contains_key(id) {
            return Err(BackendError::NotFound(id.to_string()));
        }
        store.items.insert(id.clone(), items.to_vec());
        self.item_replacements.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn fetch_record(&self, id: &RecordId) -> Result<PrescriptionRecord, BackendError> {
        self.enter()?;
        let store = guard(&self.store)?;
        store
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    fn update_signature(&self, id: &RecordId, status: &SignatureStatus) -> Result<(), BackendError> {
        self.enter()?;
        let mut store = guard(&self.store)?;
        let record = store
            .records
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        record.signed = status.signed;
        record.hash_alg = status.hash_alg.clone();
        record.pre_hash = status.pre_hash.clone();
        record.post_hash = status.post_hash.clone();
        store.signature_updates.push((id.clone(), status.clone()));
        Ok(())
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<(), BackendError> {
        self.enter()?;
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 503,
                body: "audit store unavailable".into(),
            });
        }
        guard(&self.store)?.audits.push(entry.clone());
        Ok(())
    }

    fn fetch_certificate_info(&self) -> Result<Option<CertificateInfo>, BackendError> {
        self.enter()?;
        Ok(guard(&self.store)?.certificate.clone())
    }
}

// ═══════════════════════════════════════════════════════════
// Device agent
// ═══════════════════════════════════════════════════════════

/// Device agent with a fixed token list and a fixed signature.
pub struct ScriptedDeviceAgent {
    tokens: Vec<TokenInfo>,
    signature: AgentSignature,
    sign_error: Option<BackendError>,
    finalized_name: Option<String>,
    signed_hashes: Mutex<Vec<String>>,
    detect_calls: AtomicUsize,
    sign_calls: AtomicUsize,
    finalize_calls: AtomicUsize,
}

impl Default for ScriptedDeviceAgent {
    fn default() -> Self {
        Self {
            tokens: vec![TokenInfo {
                id: "slot-0".into(),
                label: "SafeSign Token".into(),
                subject: Some("CN=Ana Costa:12345678900".into()),
            }],
            signature: AgentSignature {
                signature: "MIAGCSqGSIb3DQEHAqCAMIACAQExDzANBglghkgBZQMEAgEFADCABgkq".into(),
                certificate: "MIIDdzCCAl+gAwIBAgIEbSsL3zANBgkqhkiG9w0BAQsFADBsMRAwDgYD".into(),
                certificate_info: Some(CertificateInfo {
                    subject: "CN=Ana Costa:12345678900".into(),
                    issuer: Some("AC SOLUTI Multipla v5".into()),
                    ..Default::default()
                }),
            },
            sign_error: None,
            finalized_name: None,
            signed_hashes: Mutex::new(Vec::new()),
            detect_calls: AtomicUsize::new(0),
            sign_calls: AtomicUsize::new(0),
            finalize_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedDeviceAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(mut self, tokens: Vec<TokenInfo>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_signature(mut self, signature: AgentSignature) -> Self {
        self.signature = signature;
        self
    }

    pub fn failing_sign(mut self, error: BackendError) -> Self {
        self.sign_error = Some(error);
        self
    }

    pub fn with_finalized_name(mut self, name: &str) -> Self {
        self.finalized_name = Some(name.to_string());
        self
    }

    /// Hashes the agent was asked to sign, in order.
    pub fn signed_hashes(&self) -> Vec<String> {
        self.signed_hashes
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    pub fn finalize_calls(&self) -> usize {
        self.finalize_calls.load(Ordering::SeqCst)
    }
}

impl DeviceAgent for ScriptedDeviceAgent {
    fn detect_tokens(&self) -> Result<Vec<TokenInfo>, BackendError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tokens.clone())
    }

    fn sign_hash(&self, request: &HashSignRequest<'_>) -> Result<AgentSignature, BackendError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.sign_error {
            return Err(err.clone());
        }
        guard(&self.signed_hashes)?.push(request.hash.to_string());
        Ok(self.signature.clone())
    }

    fn finalize(&self, request: &FinalizeRequest<'_>) -> Result<SignedPdf, BackendError> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        let mut bytes = request.pdf.to_vec();
        bytes.extend_from_slice(b"\n%agent-signature ");
        bytes.extend_from_slice(request.signature.as_bytes());
        bytes.push(b'\n');
        Ok(SignedPdf {
            bytes,
            filename: self.finalized_name.clone(),
        })
    }
}

// ═══════════════════════════════════════════════════════════
// Remote certificate signer
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
pub struct ScriptedCertificateSigner {
    response: Option<Vec<u8>>,
    error: Option<BackendError>,
    calls: AtomicUsize,
}

impl ScriptedCertificateSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return these bytes instead of the input PDF plus a marker.
    pub fn with_response(mut self, bytes: Vec<u8>) -> Self {
        self.response = Some(bytes);
        self
    }

    pub fn failing(mut self, error: BackendError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CertificateSigner for ScriptedCertificateSigner {
    fn sign_pdf(
        &self,
        pdf: &[u8],
        _filename: &str,
        certificate: &CertificateFile,
        _password: &SecretString,
    ) -> Result<SignedPdf, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let bytes = match &self.response {
            Some(bytes) => bytes.clone(),
            None => {
                let mut bytes = pdf.to_vec();
                bytes.extend_from_slice(b"\n%pades ");
                bytes.extend_from_slice(certificate.filename().as_bytes());
                bytes.push(b'\n');
                bytes
            }
        };
        Ok(SignedPdf {
            bytes,
            filename: None,
        })
    }
}

// ═══════════════════════════════════════════════════════════
// Notifications
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
struct Outbox {
    internal: Vec<InternalNotification>,
    email: Vec<EmailMessage>,
    sms: Vec<SmsMessage>,
}

#[derive(Default)]
pub struct RecordingNotificationGateway {
    sent: Mutex<Outbox>,
    failing: Mutex<BTreeSet<Channel>>,
    calls: AtomicUsize,
}

impl RecordingNotificationGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_channel(&self, channel: Channel) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(channel);
        }
    }

    pub fn internal(&self) -> Vec<InternalNotification> {
        self.sent
            .lock()
            .map(|s| s.internal.clone())
            .unwrap_or_default()
    }

    pub fn emails(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .map(|s| s.email.clone())
            .unwrap_or_default()
    }

    pub fn sms(&self) -> Vec<SmsMessage> {
        self.sent.lock().map(|s| s.sms.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self, channel: Channel) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if guard(&self.failing)?.contains(&channel) {
            return Err(BackendError::Status {
                status: 502,
                body: format!("{channel} provider unavailable"),
            });
        }
        Ok(())
    }
}

impl NotificationGateway for RecordingNotificationGateway {
    fn send_internal(&self, message: &InternalNotification) -> Result<(), BackendError> {
        self.enter(Channel::Internal)?;
        guard(&self.sent)?.internal.push(message.clone());
        Ok(())
    }

    fn send_email(&self, message: &EmailMessage) -> Result<(), BackendError> {
        self.enter(Channel::Email)?;
        guard(&self.sent)?.email.push(message.clone());
        Ok(())
    }

    fn send_sms(&self, message: &SmsMessage) -> Result<(), BackendError> {
        self.enter(Channel::Sms)?;
        guard(&self.sent)?.sms.push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignatureFormat;
    use crate::models::PrescriptionFormat;
    use chrono::NaiveDate;

    fn record(patient: &str, consultation: &str) -> PrescriptionRecord {
        PrescriptionRecord {
            id: None,
            patient_id: patient.into(),
            consultation_id: consultation.into(),
            doctor_id: None,
            format: PrescriptionFormat::Simple,
            issued_on: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            valid_until: None,
            observations: None,
            signed: false,
            hash_alg: None,
            pre_hash: None,
            post_hash: None,
        }
    }

    #[test]
    fn record_api_creates_and_finds() {
        let api = InMemoryRecordApi::new();
        let id = api.create_record(&record("p1", "c1")).unwrap();
        let found = api.find_record("p1", "c1").unwrap().unwrap();
        assert_eq!(found.id, Some(id));
        assert!(api.find_record("p1", "c2").unwrap().is_none());
        assert_eq!(api.create_count(), 1);
    }

    #[test]
    fn record_api_offline_fails_every_call() {
        let api = InMemoryRecordApi::new();
        api.set_offline(true);
        assert!(api.find_record("p1", "c1").is_err());
        assert!(api.fetch_certificate_info().is_err());
        assert_eq!(api.call_count(), 2);
    }

    #[test]
    fn detail_update_keeps_signature_state() {
        let api = InMemoryRecordApi::new();
        let id = api.create_record(&record("p1", "c1")).unwrap();
        let status = SignatureStatus {
            signed: true,
            hash_alg: Some("SHA-256".into()),
            pre_hash: Some("aa".into()),
            post_hash: Some("bb".into()),
        };
        api.update_signature(&id, &status).unwrap();

        let details = RecordDetails {
            doctor_id: Some("doc-1".into()),
            format: PrescriptionFormat::SpecialControl,
            issued_on: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            valid_until: None,
            observations: Some("Uso contínuo".into()),
        };
        api.update_record(&id, &details).unwrap();

        let stored = &api.records()[0];
        assert_eq!(stored.format, PrescriptionFormat::SpecialControl);
        assert_eq!(stored.observations.as_deref(), Some("Uso contínuo"));
        assert!(stored.signed);
        assert_eq!(stored.post_hash.as_deref(), Some("bb"));
        assert_eq!(api.detail_update_count(), 1);
        assert!(matches!(
            api.update_record(&RecordId("nope".into()), &details),
            Err(BackendError::NotFound(_))
        ));
    }

    #[test]
    fn signature_update_requires_existing_record() {
        let api = InMemoryRecordApi::new();
        let missing = RecordId("nope".into());
        assert!(matches!(
            api.update_signature(&missing, &SignatureStatus::unsigned()),
            Err(BackendError::NotFound(_))
        ));
    }

    #[test]
    fn agent_records_signed_hashes() {
        let agent = ScriptedDeviceAgent::new();
        let request = HashSignRequest {
            hash: "abc",
            format: SignatureFormat::CadesDetached,
            pin: None,
            token_id: None,
        };
        agent.sign_hash(&request).unwrap();
        assert_eq!(agent.signed_hashes(), vec!["abc".to_string()]);
        assert_eq!(agent.sign_calls(), 1);
    }

    #[test]
    fn gateway_fails_selected_channel_only() {
        let gateway = RecordingNotificationGateway::new();
        gateway.fail_channel(Channel::Email);
        let sms = SmsMessage {
            to: "+5511987654321".into(),
            body: "hi".into(),
        };
        assert!(gateway.send_sms(&sms).is_ok());
        let email = EmailMessage {
            to: "a@b.co".into(),
            subject: "s".into(),
            body: "b".into(),
            attachment_name: "rx.pdf".into(),
            attachment_base64: None,
            download_url: None,
        };
        assert!(gateway.send_email(&email).is_err());
        assert_eq!(gateway.sms().len(), 1);
        assert_eq!(gateway.call_count(), 2);
    }
}
