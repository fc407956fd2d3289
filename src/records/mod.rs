//! Record Persister: idempotent create-or-reuse of the backend
//! prescription record and its line items.

pub mod legacy;

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::backends::RecordApi;
use crate::config::HASH_ALGORITHM;
use crate::error::PipelineError;
use crate::models::{
    LinkageContext, PrescriptionDraft, PrescriptionItemRecord, PrescriptionRecord, RecordDetails,
    RecordId, SignatureRecord, SignatureStatus,
};
use crate::render::medication_lines;

/// Line items derived from structured items or legacy free text.
pub fn derive_items(draft: &PrescriptionDraft) -> Vec<PrescriptionItemRecord> {
    medication_lines(draft)
        .into_iter()
        .enumerate()
        .map(|(i, item)| PrescriptionItemRecord {
            position: i as u32 + 1,
            medication: item.name,
            dosage: item.dosage,
            quantity: item.quantity,
            instructions: item.instructions,
        })
        .collect()
}

/// Draft-mirroring record fields. Legacy general instructions become the
/// observation when the draft has none.
pub fn details_from_draft(draft: &PrescriptionDraft, doctor_id: Option<&str>) -> RecordDetails {
    let observations = draft
        .observations
        .clone()
        .or_else(|| draft.legacy.as_ref().and_then(legacy::legacy_instructions));

    RecordDetails {
        doctor_id: doctor_id.map(str::to_string),
        format: draft.format,
        issued_on: draft.issued_on,
        valid_until: draft.valid_until,
        observations,
    }
}

/// Record payload mirroring the draft, not yet signed.
pub fn record_from_draft(
    draft: &PrescriptionDraft,
    patient_id: &str,
    consultation_id: &str,
    doctor_id: Option<&str>,
) -> PrescriptionRecord {
    let details = details_from_draft(draft, doctor_id);
    PrescriptionRecord {
        id: None,
        patient_id: patient_id.to_string(),
        consultation_id: consultation_id.to_string(),
        doctor_id: details.doctor_id,
        format: details.format,
        issued_on: details.issued_on,
        valid_until: details.valid_until,
        observations: details.observations,
        signed: false,
        hash_alg: None,
        pre_hash: None,
        post_hash: None,
    }
}

pub struct RecordPersister {
    api: Arc<dyn RecordApi>,
    record_id: Option<RecordId>,
    /// Last details and items the backend acknowledged for `record_id`.
    synced_details: Option<RecordDetails>,
    synced_items: Option<Vec<PrescriptionItemRecord>>,
}

impl RecordPersister {
    pub fn new(api: Arc<dyn RecordApi>) -> Self {
        Self {
            api,
            record_id: None,
            synced_details: None,
            synced_items: None,
        }
    }

    /// Record id known to this session, if any.
    pub fn record_id(&self) -> Option<&RecordId> {
        self.record_id.as_ref()
    }

    /// Return the session's record id, reusing an existing backend record
    /// for the same (patient, consultation) or creating one. The record's
    /// fields and line items are brought in line with `draft` on every call;
    /// a failed update is logged and the id is still returned.
    pub fn ensure_record(
        &mut self,
        draft: &PrescriptionDraft,
        linkage: &LinkageContext,
    ) -> Result<RecordId, PipelineError> {
        let observed = draft.observed_linkage();
        let doctor_id = linkage.doctor_id.as_deref().or(observed.doctor_id.as_deref());

        let id = match self.record_id.clone() {
            Some(id) => id,
            None => {
                let id = self.resolve_record(draft, linkage, doctor_id)?;
                self.record_id = Some(id.clone());
                id
            }
        };

        self.sync_details(&id, details_from_draft(draft, doctor_id));
        self.sync_items(&id, derive_items(draft));
        Ok(id)
    }

    fn resolve_record(
        &mut self,
        draft: &PrescriptionDraft,
        linkage: &LinkageContext,
        doctor_id: Option<&str>,
    ) -> Result<RecordId, PipelineError> {
        let observed = draft.observed_linkage();
        let patient_id = linkage.patient_id.as_deref().or(observed.patient_id.as_deref());
        let consultation_id = linkage
            .consultation_id
            .as_deref()
            .or(observed.consultation_id.as_deref());
        let (Some(patient_id), Some(consultation_id)) = (patient_id, consultation_id) else {
            return Err(PipelineError::Persistence(
                "patient or consultation not resolved".into(),
            ));
        };

        let existing = self
            .api
            .find_record(patient_id, consultation_id)
            .map_err(|e| PipelineError::Persistence(e.to_string()))?
            .and_then(|r| r.id);

        if let Some(id) = existing {
            tracing::info!(record_id = %id, consultation_id, "Reusing prescription record");
            return Ok(id);
        }

        let record = record_from_draft(draft, patient_id, consultation_id, doctor_id);
        let id = self
            .api
            .create_record(&record)
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;
        self.synced_details = Some(details_from_draft(draft, doctor_id));
        tracing::info!(record_id = %id, consultation_id, "Prescription record created");
        Ok(id)
    }

    fn sync_details(&mut self, id: &RecordId, details: RecordDetails) {
        if self.synced_details.as_ref() == Some(&details) {
            return;
        }
        match self.api.update_record(id, &details) {
            Ok(()) => self.synced_details = Some(details),
            Err(e) => {
                self.synced_details = None;
                tracing::warn!(record_id = %id, error = %e, "Record fields not updated");
            }
        }
    }

    fn sync_items(&mut self, id: &RecordId, items: Vec<PrescriptionItemRecord>) {
        if self.synced_items.as_ref() == Some(&items) {
            return;
        }
        match self.api.replace_items(id, &items) {
            Ok(()) => self.synced_items = Some(items),
            Err(e) => {
                self.synced_items = None;
                tracing::warn!(record_id = %id, error = %e, "Line items not persisted");
            }
        }
    }

    pub fn mark_signed(&self, signature: &SignatureRecord) -> Result<(), PipelineError> {
        let Some(id) = &self.record_id else {
            return Err(PipelineError::Persistence("no prescription record".into()));
        };
        let status = SignatureStatus {
            signed: true,
            hash_alg: Some(HASH_ALGORITHM.to_string()),
            pre_hash: Some(signature.pre_hash().to_string()),
            post_hash: Some(signature.post_hash().to_string()),
        };
        self.api
            .update_signature(id, &status)
            .map_err(|e| PipelineError::Persistence(e.to_string()))
    }

    /// Best-effort server-side invalidation, off the caller's thread.
    /// `None` when the session has no record.
    pub fn mark_unsigned_in_background(&self) -> Option<JoinHandle<()>> {
        let id = self.record_id.clone()?;
        let api = Arc::clone(&self.api);
        Some(std::thread::spawn(move || {
            match api.update_signature(&id, &SignatureStatus::unsigned()) {
                Ok(()) => tracing::debug!(record_id = %id, "Record marked unsigned"),
                Err(e) => {
                    tracing::warn!(record_id = %id, error = %e, "Failed to mark record unsigned")
                }
            }
        }))
    }
}
