use super::http::JsonTransport;
use super::{BackendError, NotificationGateway};
use crate::dispatch::{EmailMessage, InternalNotification, SmsMessage};

/// Client for the notification delivery service.
pub struct HttpNotificationGateway {
    transport: JsonTransport,
}

impl HttpNotificationGateway {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, BackendError> {
        Ok(Self {
            transport: JsonTransport::new(base_url, timeout_secs)?,
        })
    }
}

impl NotificationGateway for HttpNotificationGateway {
    fn send_internal(&self, message: &InternalNotification) -> Result<(), BackendError> {
        self.transport.post_unit("internal", message)
    }

    fn send_email(&self, message: &EmailMessage) -> Result<(), BackendError> {
        self.transport.post_unit("email", message)
    }

    fn send_sms(&self, message: &SmsMessage) -> Result<(), BackendError> {
        self.transport.post_unit("sms", message)
    }
}
