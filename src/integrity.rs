//! Integrity Validator: cross-checks the doctor/patient/consultation ids a
//! document carries against the session's expected linkage.
//!
//! Unknown values on either side are "not yet resolved" and never produce an
//! error, so async loading does not raise false alarms.

use serde::Serialize;

use crate::config::LinkagePolicy;
use crate::models::LinkageContext;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkageMismatch {
    pub field: &'static str,
    pub expected: String,
    pub observed: String,
}

impl LinkageMismatch {
    pub fn describe(&self) -> String {
        format!(
            "{} mismatch: expected {}, document references {}",
            self.field, self.expected, self.observed
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkageReport {
    pub mismatches: Vec<LinkageMismatch>,
}

impl LinkageReport {
    pub fn ok(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn errors(&self) -> Vec<String> {
        self.mismatches.iter().map(LinkageMismatch::describe).collect()
    }

    /// Whether the report should stop signing or dispatch under `policy`.
    pub fn blocks(&self, policy: LinkagePolicy) -> bool {
        !self.ok() && policy == LinkagePolicy::Enforce
    }
}

/// Compare expected and observed identifiers field by field.
pub fn validate(expected: &LinkageContext, observed: &LinkageContext) -> LinkageReport {
    let fields = [
        ("doctor", &expected.doctor_id, &observed.doctor_id),
        ("patient", &expected.patient_id, &observed.patient_id),
        ("consultation", &expected.consultation_id, &observed.consultation_id),
    ];

    let mismatches = fields
        .into_iter()
        .filter_map(|(field, expected, observed)| match (expected, observed) {
            (Some(e), Some(o)) if e.trim() != o.trim() => Some(LinkageMismatch {
                field,
                expected: e.clone(),
                observed: o.clone(),
            }),
            _ => None,
        })
        .collect::<Vec<_>>();

    if !mismatches.is_empty() {
        tracing::warn!(
            fields = ?mismatches.iter().map(|m| m.field).collect::<Vec<_>>(),
            "Linkage mismatch detected"
        );
    }

    LinkageReport { mismatches }
}
