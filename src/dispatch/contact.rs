//! Contact validation for outbound channels.

use std::sync::LazyLock;

use regex::Regex;

use super::DeliveryError;

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]{2,}$").unwrap());

/// Country prefix applied to national numbers.
const DEFAULT_COUNTRY_CODE: &str = "55";

/// Normalize a phone number to E.164.
///
/// National numbers (10 or 11 digits: area code plus subscriber) get the
/// default country prefix; 12 or 13 digit numbers must already carry it.
pub fn normalize_phone(raw: Option<&str>) -> Result<String, DeliveryError> {
    let raw = raw.map(str::trim).filter(|p| !p.is_empty());
    let Some(raw) = raw else {
        return Err(DeliveryError::MissingPhone);
    };

    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        10 | 11 => Ok(format!("+{DEFAULT_COUNTRY_CODE}{digits}")),
        12 | 13 if digits.starts_with(DEFAULT_COUNTRY_CODE) => Ok(format!("+{digits}")),
        _ => Err(DeliveryError::InvalidPhone),
    }
}

pub fn validate_email(raw: Option<&str>) -> Result<String, DeliveryError> {
    let email = raw
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or(DeliveryError::MissingEmail)?;
    if EMAIL.is_match(email) {
        Ok(email.to_string())
    } else {
        Err(DeliveryError::InvalidEmail)
    }
}
