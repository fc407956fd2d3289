use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::enums::PrescriptionFormat;
use super::linkage::LinkageContext;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub id: Option<String>,
    pub name: Option<String>,
    /// National identity number (CPF or equivalent).
    pub document_number: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorInfo {
    pub id: Option<String>,
    pub name: Option<String>,
    /// Professional council registration (CRM).
    pub license_number: Option<String>,
    pub license_state: Option<String>,
    pub specialty: Option<String>,
}

impl DoctorInfo {
    /// "CRM 12345/SP" style registration line, when known.
    pub fn registration_line(&self) -> Option<String> {
        let number = self.license_number.as_deref()?;
        Some(match self.license_state.as_deref() {
            Some(state) => format!("CRM {number}/{state}"),
            None => format!("CRM {number}"),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationItem {
    pub name: String,
    pub dosage: Option<String>,
    pub quantity: Option<String>,
    pub route: Option<String>,
    pub instructions: Option<String>,
}

impl MedicationItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Free-text fields from drafts written before structured items existed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyText {
    /// One medication per line.
    pub medications: String,
    pub instructions: String,
}

/// The editable prescription, owned by a single editing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionDraft {
    pub patient: PatientInfo,
    pub doctor: DoctorInfo,
    pub consultation_id: Option<String>,
    pub items: Vec<MedicationItem>,
    pub legacy: Option<LegacyText>,
    pub issued_on: NaiveDate,
    pub valid_until: Option<NaiveDate>,
    pub observations: Option<String>,
    pub format: PrescriptionFormat,
}

impl PrescriptionDraft {
    pub fn new(issued_on: NaiveDate) -> Self {
        Self {
            patient: PatientInfo::default(),
            doctor: DoctorInfo::default(),
            consultation_id: None,
            items: Vec::new(),
            legacy: None,
            issued_on,
            valid_until: None,
            observations: None,
            format: PrescriptionFormat::Simple,
        }
    }

    pub fn patient_name(&self) -> Option<&str> {
        self.patient
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }

    /// True when at least one structured item or legacy medication line exists.
    pub fn has_medication(&self) -> bool {
        self.items.iter().any(|i| !i.name.trim().is_empty())
            || self
                .legacy
                .as_ref()
                .is_some_and(|l| !l.medications.trim().is_empty())
    }

    /// Mandatory fields that are still empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.patient_name().is_none() {
            missing.push("patient name");
        }
        if !self.has_medication() {
            missing.push("medication");
        }
        missing
    }

    /// Identifiers the document will actually carry.
    pub fn observed_linkage(&self) -> LinkageContext {
        LinkageContext {
            doctor_id: self.doctor.id.clone(),
            patient_id: self.patient.id.clone(),
            consultation_id: self.consultation_id.clone(),
        }
    }
}
