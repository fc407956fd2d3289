//! Signing Coordinator: the prescription state machine and its three
//! signing strategies.

pub mod detection;
pub mod dialog;
pub mod session;
pub mod state;
pub mod strategy;

pub use detection::{DetectionPass, TokenDetectionRegistry};
pub use dialog::SigningDialog;
pub use session::{Backends, PrescriptionSession};
pub use state::SigningState;
pub use strategy::{validate_certificate, MockSentinels, SigningStrategy};
