use serde::{Deserialize, Serialize};

use super::enums::{Channel, DeliveryOutcome};

/// Patient contact details used by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    /// In-app account of the patient, for internal notifications.
    pub patient_user_id: Option<String>,
    pub patient_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Per-channel result. Never persisted beyond the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub channel: Channel,
    pub outcome: DeliveryOutcome,
    pub error: Option<String>,
}

impl DeliveryAttempt {
    pub fn delivered(channel: Channel) -> Self {
        Self {
            channel,
            outcome: DeliveryOutcome::Delivered,
            error: None,
        }
    }

    pub fn rejected(channel: Channel, reason: impl Into<String>) -> Self {
        Self {
            channel,
            outcome: DeliveryOutcome::Rejected,
            error: Some(reason.into()),
        }
    }

    pub fn failed(channel: Channel, reason: impl Into<String>) -> Self {
        Self {
            channel,
            outcome: DeliveryOutcome::Failed,
            error: Some(reason.into()),
        }
    }
}

/// Aggregated outcome of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub attempts: Vec<DeliveryAttempt>,
}

impl DispatchSummary {
    pub fn delivered(&self) -> Vec<Channel> {
        self.attempts
            .iter()
            .filter(|a| a.outcome == DeliveryOutcome::Delivered)
            .map(|a| a.channel)
            .collect()
    }

    pub fn failures(&self) -> Vec<&DeliveryAttempt> {
        self.attempts
            .iter()
            .filter(|a| a.outcome != DeliveryOutcome::Delivered)
            .collect()
    }

    pub fn all_delivered(&self) -> bool {
        !self.attempts.is_empty() && self.failures().is_empty()
    }

    /// One-line, user-facing summary.
    pub fn message(&self) -> String {
        let sent: Vec<&str> = self.delivered().iter().map(|c| c.as_str()).collect();
        let failed: Vec<String> = self
            .failures()
            .iter()
            .map(|a| match &a.error {
                Some(e) => format!("{} ({e})", a.channel),
                None => a.channel.to_string(),
            })
            .collect();

        match (sent.is_empty(), failed.is_empty()) {
            (_, true) if !sent.is_empty() => format!("Sent via {}.", sent.join(", ")),
            (true, false) => format!("Not sent. Failed: {}.", failed.join("; ")),
            (false, false) => format!(
                "Sent via {}. Failed: {}.",
                sent.join(", "),
                failed.join("; ")
            ),
            _ => "No channel selected.".to_string(),
        }
    }
}
