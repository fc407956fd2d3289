use serde::{Deserialize, Serialize};

use super::http::JsonTransport;
use super::{BackendError, RecordApi};
use crate::models::{
    AuditEntry, CertificateInfo, PrescriptionItemRecord, PrescriptionRecord, RecordDetails,
    RecordId, SignatureStatus,
};

/// Client for the backend prescription record API.
pub struct HttpRecordApi {
    transport: JsonTransport,
}

impl HttpRecordApi {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, BackendError> {
        Ok(Self {
            transport: JsonTransport::new(base_url, timeout_secs)?,
        })
    }
}

#[derive(Deserialize)]
struct CreatedResponse {
    id: RecordId,
}

#[derive(Serialize)]
struct ItemsBody<'a> {
    items: &'a [PrescriptionItemRecord],
}

impl RecordApi for HttpRecordApi {
    fn find_record(
        &self,
        patient_id: &str,
        consultation_id: &str,
    ) -> Result<Option<PrescriptionRecord>, BackendError> {
        let found: Vec<PrescriptionRecord> = self.transport.get_json_with(
            "prescriptions",
            &[("patient_id", patient_id), ("consultation_id", consultation_id)],
        )?;
        Ok(found.into_iter().find(|r| r.id.is_some()))
    }

    fn create_record(&self, record: &PrescriptionRecord) -> Result<RecordId, BackendError> {
        let created: CreatedResponse = self.transport.post_json("prescriptions", record)?;
        Ok(created.id)
    }

    fn update_record(&self, id: &RecordId, details: &RecordDetails) -> Result<(), BackendError> {
        self.transport.patch_unit(&format!("prescriptions/{id}"), details)
    }

    fn replace_items(
        &self,
        id: &RecordId,
        items: &[PrescriptionItemRecord],
    ) -> Result<(), BackendError> {
        self.transport
            .put_unit(&format!("prescriptions/{id}/items"), &ItemsBody { items })
    }

    fn fetch_record(&self, id: &RecordId) -> Result<PrescriptionRecord, BackendError> {
        self.transport.get_json(&format!("prescriptions/{id}"))
    }

    fn update_signature(&self, id: &RecordId, status: &SignatureStatus) -> Result<(), BackendError> {
        self.transport.patch_unit(&format!("prescriptions/{id}"), status)
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<(), BackendError> {
        self.transport.post_unit("audit-logs", entry)
    }

    fn fetch_certificate_info(&self) -> Result<Option<CertificateInfo>, BackendError> {
        match self.transport.get_json("certificates/current") {
            Ok(info) => Ok(Some(info)),
            Err(BackendError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
