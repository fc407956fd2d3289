//! Visible signature stamps applied to an existing PDF.
//!
//! Two looks, so a reader can tell the assurance tier at a glance:
//! - certificate stamp: solid border, "DIGITALLY SIGNED"
//! - manual stamp: dashed border, "MANUAL STAMP - NO DIGITAL CERTIFICATE"

use chrono::{DateTime, Utc};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use super::document::STAMP_BOX;
use super::pdf::PageCanvas;
use super::RenderError;

const STAMP_FONT: &str = "FStamp";

pub const CERTIFICATE_STAMP_TITLE: &str = "DIGITALLY SIGNED";
pub const MANUAL_STAMP_TITLE: &str = "MANUAL STAMP - NO DIGITAL CERTIFICATE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StampKind {
    /// Visible counterpart of a cryptographic signature.
    Certificate { certificate_subject: Option<String> },
    /// Visual-only mark, no cryptographic backing.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub kind: StampKind,
    pub signer_name: String,
    pub signed_at: DateTime<Utc>,
}

impl Stamp {
    pub fn manual(signer_name: impl Into<String>, signed_at: DateTime<Utc>) -> Self {
        Self {
            kind: StampKind::Manual,
            signer_name: signer_name.into(),
            signed_at,
        }
    }

    pub fn certificate(
        signer_name: impl Into<String>,
        certificate_subject: Option<String>,
        signed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: StampKind::Certificate {
                certificate_subject,
            },
            signer_name: signer_name.into(),
            signed_at,
        }
    }

    pub fn title(&self) -> &'static str {
        match self.kind {
            StampKind::Certificate { .. } => CERTIFICATE_STAMP_TITLE,
            StampKind::Manual => MANUAL_STAMP_TITLE,
        }
    }

    fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Signed by: {}", self.signer_name),
            format!("Date: {}", self.signed_at.format("%d/%m/%Y %H:%M UTC")),
        ];
        if let StampKind::Certificate {
            certificate_subject: Some(subject),
        } = &self.kind
        {
            lines.push(format!("Certificate: {subject}"));
        }
        lines
    }

    fn canvas(&self) -> PageCanvas {
        let (x, y, width, height) = STAMP_BOX;
        let mut canvas = PageCanvas::new();
        canvas.rect(x, y, width, height, self.kind == StampKind::Manual);
        let mut line_y = y + height - 16;
        canvas.text(STAMP_FONT, 9, x + 8, line_y, self.title());
        for line in self.lines() {
            line_y -= 14;
            canvas.text(STAMP_FONT, 8, x + 8, line_y, &line);
        }
        canvas
    }
}

/// Apply a stamp to the last page of `pdf`, returning new bytes.
/// The input is never modified.
pub fn apply_stamp(pdf: &[u8], stamp: &Stamp) -> Result<Vec<u8>, RenderError> {
    let mut doc = Document::load_mem(pdf)?;
    let page_id = doc
        .get_pages()
        .values()
        .next_back()
        .copied()
        .ok_or(RenderError::NoPages)?;

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Oblique",
        "Encoding" => "WinAnsiEncoding",
    });
    register_font(&mut doc, page_id, font_id)?;

    // Isolate the original content's graphics state from the stamp.
    let open = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
    let mut closing = b"Q\n".to_vec();
    closing.extend(stamp.canvas().into_content()?);
    let close = doc.add_object(Stream::new(dictionary! {}, closing));
    wrap_page_contents(&mut doc, page_id, open, close)?;

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| RenderError::Pdf(format!("save failed: {e}")))?;
    tracing::debug!(title = stamp.title(), "Stamp applied");
    Ok(out)
}

fn wrap_page_contents(
    doc: &mut Document,
    page_id: ObjectId,
    open: ObjectId,
    close: ObjectId,
) -> Result<(), RenderError> {
    let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
    let mut contents = vec![Object::Reference(open)];
    match page.get(b"Contents") {
        Ok(Object::Reference(id)) => contents.push(Object::Reference(*id)),
        Ok(Object::Array(existing)) => contents.extend(existing.iter().cloned()),
        _ => {}
    }
    contents.push(Object::Reference(close));
    page.set("Contents", Object::Array(contents));
    Ok(())
}

/// Make `STAMP_FONT` resolvable from the page's resources, whether the
/// resources (or their font table) are inline or referenced.
fn register_font(doc: &mut Document, page_id: ObjectId, font_id: ObjectId) -> Result<(), RenderError> {
    let resources_ref = match doc.get_object(page_id)?.as_dict()?.get(b"Resources") {
        Ok(Object::Reference(id)) => Some(*id),
        _ => None,
    };

    let resources: &mut Dictionary = match resources_ref {
        Some(id) => doc.get_object_mut(id)?.as_dict_mut()?,
        None => {
            let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
            if !matches!(page.get(b"Resources"), Ok(Object::Dictionary(_))) {
                page.set("Resources", Dictionary::new());
            }
            page.get_mut(b"Resources")?.as_dict_mut()?
        }
    };

    let fonts_ref = match resources.get(b"Font") {
        Ok(Object::Reference(id)) => Some(*id),
        Ok(Object::Dictionary(_)) => None,
        _ => {
            resources.set("Font", Dictionary::new());
            None
        }
    };

    match fonts_ref {
        Some(id) => {
            doc.get_object_mut(id)?
                .as_dict_mut()?
                .set(STAMP_FONT, Object::Reference(font_id));
        }
        None => {
            resources
                .get_mut(b"Font")?
                .as_dict_mut()?
                .set(STAMP_FONT, Object::Reference(font_id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::pdf::{assemble, FONT_REGULAR};
    use crate::render::page_strings;
    use chrono::TimeZone;

    fn base_pdf() -> Vec<u8> {
        let mut canvas = PageCanvas::new();
        canvas.text(FONT_REGULAR, 10, 60, 700, "Body");
        assemble(vec![canvas], "Base").unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 14, 30, 0).unwrap()
    }

    #[test]
    fn manual_stamp_is_visible_and_distinct() {
        let stamped = apply_stamp(&base_pdf(), &Stamp::manual("Dr. Ana Costa", at())).unwrap();
        let strings = page_strings(&stamped).unwrap().concat();
        assert!(strings.iter().any(|s| s == "Body"));
        assert!(strings.iter().any(|s| s == MANUAL_STAMP_TITLE));
        assert!(strings.iter().any(|s| s == "Signed by: Dr. Ana Costa"));
        assert!(strings.iter().any(|s| s == "Date: 04/05/2026 14:30 UTC"));
        assert!(!strings.iter().any(|s| s == CERTIFICATE_STAMP_TITLE));
    }

    #[test]
    fn certificate_stamp_lists_subject() {
        let stamp = Stamp::certificate("Dr. Ana Costa", Some("CN=Ana Costa:123".into()), at());
        let stamped = apply_stamp(&base_pdf(), &stamp).unwrap();
        let strings = page_strings(&stamped).unwrap().concat();
        assert!(strings.iter().any(|s| s == CERTIFICATE_STAMP_TITLE));
        assert!(strings.iter().any(|s| s == "Certificate: CN=Ana Costa:123"));
    }

    #[test]
    fn stamping_changes_bytes() {
        let base = base_pdf();
        let stamped = apply_stamp(&base, &Stamp::manual("Dr. A", at())).unwrap();
        assert_ne!(crate::hash::digest(&base), crate::hash::digest(&stamped));
    }

    #[test]
    fn stamp_targets_last_page() {
        let mut first = PageCanvas::new();
        first.text(FONT_REGULAR, 10, 60, 700, "One");
        let mut second = PageCanvas::new();
        second.text(FONT_REGULAR, 10, 60, 700, "Two");
        let pdf = assemble(vec![first, second], "Two pages").unwrap();

        let stamped = apply_stamp(&pdf, &Stamp::manual("Dr. A", at())).unwrap();
        let pages = page_strings(&stamped).unwrap();
        assert!(!pages[0].iter().any(|s| s == MANUAL_STAMP_TITLE));
        assert!(pages[1].iter().any(|s| s == MANUAL_STAMP_TITLE));
    }

    #[test]
    fn garbage_input_is_an_error() {
        assert!(apply_stamp(b"not a pdf", &Stamp::manual("Dr. A", at())).is_err());
    }
}
