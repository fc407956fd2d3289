//! Multichannel Dispatcher: delivers a signed prescription over the
//! internal inbox, email and SMS.
//!
//! Every selected channel is validated before any delivery starts, and each
//! channel is attempted independently of the others.

pub mod contact;
pub mod message;

pub use contact::{normalize_phone, validate_email};
pub use message::{
    download_reference, EmailMessage, InternalNotification, MessageContext, SmsMessage,
};

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use crate::backends::{http::encode_bytes, BackendError, NotificationGateway};
use crate::models::{
    Channel, ContactInfo, DeliveryAttempt, DispatchSummary, RecordId, SignatureRecord,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("no channel selected")]
    NoChannel,

    #[error("patient has no app account")]
    MissingRecipient,

    #[error("missing email")]
    MissingEmail,

    #[error("invalid email")]
    InvalidEmail,

    #[error("missing phone")]
    MissingPhone,

    #[error("invalid phone")]
    InvalidPhone,

    #[error("delivery failed: {0}")]
    Gateway(#[from] BackendError),
}

/// What a dispatch sends and to whom.
pub struct DispatchRequest<'a> {
    pub signature: &'a SignatureRecord,
    pub record_id: Option<&'a RecordId>,
    pub doctor_name: Option<&'a str>,
    pub channels: &'a BTreeSet<Channel>,
    pub contact: &'a ContactInfo,
}

enum Prepared {
    Internal(InternalNotification),
    Email(EmailMessage),
    Sms(SmsMessage),
}

pub struct Dispatcher {
    gateway: Arc<dyn NotificationGateway>,
    artifact_base_url: String,
    clinic_name: String,
}

impl Dispatcher {
    pub fn new(
        gateway: Arc<dyn NotificationGateway>,
        artifact_base_url: impl Into<String>,
        clinic_name: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            artifact_base_url: artifact_base_url.into(),
            clinic_name: clinic_name.into(),
        }
    }

    pub fn dispatch(&self, request: &DispatchRequest<'_>) -> DispatchSummary {
        let context = MessageContext {
            signature: request.signature,
            record_id: request.record_id,
            doctor_name: request.doctor_name,
            patient_name: request.contact.patient_name.as_deref(),
            clinic_name: &self.clinic_name,
            download_url: download_reference(
                &self.artifact_base_url,
                request.record_id,
                request.signature.filename(),
            ),
        };

        // Validate everything first so a bad contact never costs a network call.
        let prepared: Vec<(Channel, Result<Prepared, DeliveryError>)> = request
            .channels
            .iter()
            .map(|&channel| (channel, self.prepare(channel, &context, request)))
            .collect();

        let attempts = prepared
            .into_iter()
            .map(|(channel, prepared)| {
                let attempt = match prepared {
                    Err(err) => DeliveryAttempt::rejected(channel, err.to_string()),
                    Ok(message) => match self.send(&message) {
                        Ok(()) => DeliveryAttempt::delivered(channel),
                        Err(err) => DeliveryAttempt::failed(channel, err.to_string()),
                    },
                };
                tracing::info!(
                    channel = channel.as_str(),
                    outcome = attempt.outcome.as_str(),
                    record_id = request.record_id.map(RecordId::as_str),
                    "Dispatch attempt"
                );
                attempt
            })
            .collect();

        DispatchSummary { attempts }
    }

    fn prepare(
        &self,
        channel: Channel,
        context: &MessageContext<'_>,
        request: &DispatchRequest<'_>,
    ) -> Result<Prepared, DeliveryError> {
        let contact = request.contact;
        match channel {
            Channel::Internal => {
                let user = contact
                    .patient_user_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .ok_or(DeliveryError::MissingRecipient)?;
                Ok(Prepared::Internal(context.internal(user)))
            }
            Channel::Email => {
                let to = validate_email(contact.email.as_deref())?;
                let attachment = encode_bytes(request.signature.signed_bytes());
                Ok(Prepared::Email(context.email(to, Some(attachment))))
            }
            Channel::Sms => {
                let to = normalize_phone(contact.phone.as_deref())?;
                Ok(Prepared::Sms(context.sms(to)))
            }
        }
    }

    fn send(&self, message: &Prepared) -> Result<(), DeliveryError> {
        match message {
            Prepared::Internal(m) => self.gateway.send_internal(m)?,
            Prepared::Email(m) => self.gateway.send_email(m)?,
            Prepared::Sms(m) => self.gateway.send_sms(m)?,
        }
        Ok(())
    }
}
