use serde::Serialize;

/// Lifecycle of one editing session's document.
///
/// `Unsigned -> Generated -> Signing -> Signed`; any edit returns to
/// `Unsigned`, a failed attempt returns to `Generated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningState {
    Unsigned,
    Generated,
    Signing,
    Signed,
}

impl SigningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsigned => "unsigned",
            Self::Generated => "generated",
            Self::Signing => "signing",
            Self::Signed => "signed",
        }
    }
}
