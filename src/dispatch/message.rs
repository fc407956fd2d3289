//! Outbound message payloads and their composition.

use serde::{Deserialize, Serialize};

use crate::config::SMS_MAX_CHARS;
use crate::models::{AssuranceLevel, RecordId, SignatureRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalNotification {
    pub recipient_user_id: String,
    pub title: String,
    pub body: String,
    pub record_id: Option<RecordId>,
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
    /// Signed PDF, base64.
    pub attachment_base64: Option<String>,
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsMessage {
    /// E.164.
    pub to: String,
    pub body: String,
}

/// Where the signed artifact can be fetched from.
pub fn download_reference(base_url: &str, record_id: Option<&RecordId>, filename: &str) -> String {
    match record_id {
        Some(id) => format!("{}/{}/{}", base_url.trim_end_matches('/'), id, filename),
        None => filename.to_string(),
    }
}

/// "Dr. Ana Costa", without doubling an existing title.
pub fn doctor_display_name(name: Option<&str>) -> String {
    let name = name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or("your doctor");
    let lower = name.to_lowercase();
    if lower.starts_with("dr.") || lower.starts_with("dra.") || name == "your doctor" {
        name.to_string()
    } else {
        format!("Dr. {name}")
    }
}

/// Truncate on a character boundary, marking the cut with "...".
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

fn assurance_label(level: AssuranceLevel) -> &'static str {
    match level {
        AssuranceLevel::Qualified => "digital certificate (token)",
        AssuranceLevel::Advanced => "digital certificate (file)",
        AssuranceLevel::VisualOnly => "manual stamp, no digital certificate",
    }
}

/// Shortest prose worth keeping in front of an SMS link.
const SMS_MIN_PROSE_CHARS: usize = 12;

/// Shared inputs for every channel's message.
pub struct MessageContext<'a> {
    pub signature: &'a SignatureRecord,
    pub record_id: Option<&'a RecordId>,
    pub doctor_name: Option<&'a str>,
    pub patient_name: Option<&'a str>,
    pub clinic_name: &'a str,
    pub download_url: String,
}

impl MessageContext<'_> {
    pub fn internal(&self, recipient_user_id: &str) -> InternalNotification {
        InternalNotification {
            recipient_user_id: recipient_user_id.to_string(),
            title: "New prescription available".to_string(),
            body: format!(
                "{} issued a prescription for you. Document: {}",
                doctor_display_name(self.doctor_name),
                self.signature.filename()
            ),
            record_id: self.record_id.cloned(),
            download_url: self.download_url.clone(),
        }
    }

    pub fn email(&self, to: String, attachment_base64: Option<String>) -> EmailMessage {
        let doctor = doctor_display_name(self.doctor_name);
        let greeting = match self.patient_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => format!("Hello {name},"),
            None => "Hello,".to_string(),
        };
        let body = [
            greeting,
            String::new(),
            format!("{doctor} sent you a prescription from {}.", self.clinic_name),
            format!("Signature: {}.", assurance_label(self.signature.assurance())),
            format!("Signed on {}.", self.signature.signed_at().format("%d/%m/%Y %H:%M UTC")),
            format!("Download: {}", self.download_url),
        ]
        .join("\n");

        EmailMessage {
            to,
            subject: format!("Your prescription from {doctor}"),
            body,
            attachment_name: self.signature.filename().to_string(),
            attachment_base64,
            download_url: Some(self.download_url.clone()),
        }
    }

    /// The download link is never cut. Only the prose in front of it is
    /// shortened, and it is dropped when the link leaves too little room.
    pub fn sms(&self, to: String) -> SmsMessage {
        let link = format!("Download: {}", self.download_url);
        let prose = format!(
            "{}: {} sent your prescription.",
            self.clinic_name,
            doctor_display_name(self.doctor_name)
        );

        let room = SMS_MAX_CHARS.saturating_sub(link.chars().count() + 1);
        let body = if room >= SMS_MIN_PROSE_CHARS {
            format!("{} {link}", truncate_chars(&prose, room))
        } else if link.chars().count() <= SMS_MAX_CHARS {
            link
        } else {
            self.download_url.clone()
        };
        SmsMessage { to, body }
    }
}
