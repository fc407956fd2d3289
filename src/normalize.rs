//! Canonical mapping from heterogeneous backend JSON to the pipeline's
//! typed models.
//!
//! Backend payloads name the same field several ways (`id`/`_id`,
//! `name`/`full_name`/`nome`, nested `user.name`, numeric ids). Everything
//! is resolved here so the coordinator only sees normalized drafts.
//! Absent or blank values become `None`, never empty strings.

use chrono::NaiveDate;
use serde_json::Value;

use crate::models::{
    ContactInfo, DoctorInfo, LegacyText, LinkageContext, MedicationItem, PatientInfo,
    PrescriptionDraft, PrescriptionFormat,
};

const ID: &[&str] = &["id", "_id", "user_id"];
const NAME: &[&str] = &["name", "full_name", "nome", "user.name", "user.full_name"];
const LICENSE: &[&str] = &["crm", "license_number", "registration"];
const LICENSE_STATE: &[&str] = &["crm_state", "uf", "license_state"];
const PHONE: &[&str] = &["phone", "telefone", "cellphone", "user.phone"];
const EMAIL: &[&str] = &["email", "user.email"];

/// Follow a dotted path such as `user.name`.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

/// First alias that resolves to a non-blank string or a number.
pub fn string_field(value: &Value, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|alias| match lookup(value, alias)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn date_field(value: &Value, aliases: &[&str]) -> Option<NaiveDate> {
    let raw = string_field(value, aliases)?;
    let date_part = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&raw, "%d/%m/%Y"))
        .ok()
}

pub fn normalize_doctor(value: &Value) -> DoctorInfo {
    DoctorInfo {
        id: string_field(value, ID),
        name: string_field(value, NAME),
        license_number: string_field(value, LICENSE),
        license_state: string_field(value, LICENSE_STATE).map(|s| s.to_uppercase()),
        specialty: string_field(value, &["specialty", "especialidade"]),
    }
}

pub fn normalize_patient(value: &Value) -> PatientInfo {
    PatientInfo {
        id: string_field(value, ID),
        name: string_field(value, NAME),
        document_number: string_field(value, &["cpf", "document_number", "document"]),
        birth_date: date_field(value, &["birth_date", "data_nascimento", "date_of_birth"]),
        address: string_field(value, &["address", "endereco"]),
    }
}

/// Contact details for dispatch. The in-app account is the patient's user,
/// which some payloads nest under `user`.
pub fn normalize_contact(patient: &Value) -> ContactInfo {
    ContactInfo {
        patient_user_id: string_field(patient, &["user_id", "user.id", "user._id"]),
        patient_name: string_field(patient, NAME),
        email: string_field(patient, EMAIL),
        phone: string_field(patient, PHONE),
    }
}

/// Expected linkage: the signed-in doctor, the loaded patient and the
/// loaded consultation.
pub fn normalize_linkage(doctor: &Value, patient: &Value, consultation: &Value) -> LinkageContext {
    LinkageContext {
        doctor_id: string_field(doctor, ID),
        patient_id: string_field(patient, ID),
        consultation_id: string_field(consultation, &["id", "_id"]),
    }
}

fn normalize_item(value: &Value) -> Option<MedicationItem> {
    if let Value::String(line) = value {
        return crate::records::legacy::parse_line(line);
    }
    let name = string_field(value, &["name", "medication", "nome", "medicamento"])?;
    Some(MedicationItem {
        name,
        dosage: string_field(value, &["dosage", "dosagem", "dose"]),
        quantity: string_field(value, &["quantity", "quantidade"]),
        route: string_field(value, &["route", "via"]),
        instructions: string_field(value, &["instructions", "posologia", "orientacoes"]),
    })
}

pub fn normalize_items(prescription: &Value) -> Vec<MedicationItem> {
    ["items", "medications", "medicamentos"]
        .iter()
        .find_map(|key| prescription.get(key)?.as_array())
        .map(|items| items.iter().filter_map(normalize_item).collect())
        .unwrap_or_default()
}

fn normalize_legacy(prescription: &Value) -> Option<LegacyText> {
    let medications = string_field(prescription, &["medications_text", "medicamentos_texto"])?;
    Some(LegacyText {
        medications,
        instructions: string_field(prescription, &["instructions", "orientacoes"]).unwrap_or_default(),
    })
}

fn normalize_format(prescription: &Value) -> PrescriptionFormat {
    match string_field(prescription, &["format", "type", "tipo"]).as_deref() {
        Some("special_control" | "controle_especial" | "special") => PrescriptionFormat::SpecialControl,
        _ => PrescriptionFormat::Simple,
    }
}

/// Build a draft. Ids the document will carry come from the consultation's
/// own references when present, so the linkage check can catch a
/// consultation that belongs to someone else.
pub fn normalize_draft(
    doctor: &Value,
    patient: &Value,
    consultation: &Value,
    prescription: &Value,
    issued_on: NaiveDate,
) -> PrescriptionDraft {
    let mut draft = PrescriptionDraft::new(issued_on);
    draft.doctor = normalize_doctor(doctor);
    draft.patient = normalize_patient(patient);

    if let Some(id) = string_field(consultation, &["doctor_id", "doctor.id", "doctor._id"]) {
        draft.doctor.id = Some(id);
    }
    if let Some(id) = string_field(consultation, &["patient_id", "patient.id", "patient._id"]) {
        draft.patient.id = Some(id);
    }
    draft.consultation_id = string_field(consultation, &["id", "_id"]);

    draft.items = normalize_items(prescription);
    draft.legacy = normalize_legacy(prescription);
    draft.valid_until = date_field(prescription, &["valid_until", "validade"]);
    draft.observations = string_field(prescription, &["observations", "observacoes"]);
    draft.format = normalize_format(prescription);
    draft
}
