pub mod delivery;
pub mod document;
pub mod draft;
pub mod enums;
pub mod linkage;
pub mod record;

pub use delivery::*;
pub use document::*;
pub use draft::*;
pub use enums::*;
pub use linkage::*;
pub use record::*;
