pub mod document;
pub mod pdf;
pub mod stamp;

pub use document::*;
pub use pdf::{page_strings, wrap_text};
pub use stamp::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Missing mandatory fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("PDF assembly error: {0}")]
    Pdf(String),

    #[error("Document has no pages")]
    NoPages,
}

impl From<lopdf::Error> for RenderError {
    fn from(e: lopdf::Error) -> Self {
        RenderError::Pdf(e.to_string())
    }
}
