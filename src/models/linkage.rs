use serde::{Deserialize, Serialize};

/// The doctor/patient/consultation triple a document must agree with.
///
/// `None` means "not yet resolved" (still loading), not "absent".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkageContext {
    pub doctor_id: Option<String>,
    pub patient_id: Option<String>,
    pub consultation_id: Option<String>,
}

impl LinkageContext {
    pub fn new(
        doctor_id: impl Into<String>,
        patient_id: impl Into<String>,
        consultation_id: impl Into<String>,
    ) -> Self {
        Self {
            doctor_id: Some(doctor_id.into()),
            patient_id: Some(patient_id.into()),
            consultation_id: Some(consultation_id.into()),
        }
    }

    /// Record key: both patient and consultation must be resolved.
    pub fn record_key(&self) -> Option<(&str, &str)> {
        Some((self.patient_id.as_deref()?, self.consultation_id.as_deref()?))
    }
}
