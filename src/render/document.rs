//! Document Renderer: prescription draft to immutable PDF snapshot.
//!
//! Rendering never blocks on missing fields so an incomplete draft can
//! still be previewed; `check_mandatory` is the gate used before signing.

use super::pdf::{
    assemble, wrap_text, PageCanvas, FONT_BOLD, FONT_REGULAR, MARGIN_LEFT, MARGIN_RIGHT,
    PAGE_HEIGHT, PAGE_WIDTH,
};
use super::RenderError;
use crate::config::TemplateConfig;
use crate::records::legacy;
use crate::models::{GeneratedDocument, MedicationItem, PrescriptionDraft, PrescriptionFormat};

/// Layout version. Bump on any change that alters output bytes.
pub const RENDERER_VERSION: u32 = 2;

/// Lowest baseline usable for body text; below is reserved for the stamp.
pub const BODY_FLOOR: i64 = 170;

/// Stamp box, bottom-left of the last page.
pub const STAMP_BOX: (i64, i64, i64, i64) = (MARGIN_LEFT, 56, 300, 78);

const WRAP_CHARS: usize = 88;
const LINE: i64 = 14;

pub struct DocumentRenderer {
    template: TemplateConfig,
}

impl DocumentRenderer {
    pub fn new(template: TemplateConfig) -> Self {
        Self { template }
    }

    pub fn template(&self) -> &TemplateConfig {
        &self.template
    }

    /// Mandatory fields for signing: patient name and at least one medication.
    pub fn check_mandatory(&self, draft: &PrescriptionDraft) -> Result<(), RenderError> {
        let missing = draft.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RenderError::MissingFields(missing))
        }
    }

    /// Render a fresh snapshot. Deterministic for identical draft + template.
    pub fn render(&self, draft: &PrescriptionDraft) -> Result<GeneratedDocument, RenderError> {
        if let Err(RenderError::MissingFields(missing)) = self.check_mandatory(draft) {
            tracing::warn!(missing = ?missing, "Rendering preview of incomplete draft");
        }

        let copies: &[&str] = match draft.format {
            PrescriptionFormat::Simple => &[""],
            PrescriptionFormat::SpecialControl => &["1st copy: pharmacy", "2nd copy: patient"],
        };

        let mut pages = Vec::new();
        for copy_label in copies {
            pages.extend(self.render_copy(draft, copy_label));
        }

        let bytes = assemble(pages, self.title(draft))?;
        let filename = self.filename(draft);
        let document = GeneratedDocument::new(bytes, filename, RENDERER_VERSION);
        tracing::debug!(
            filename = document.filename(),
            hash = crate::hash::short(document.hash()),
            "Prescription rendered"
        );
        Ok(document)
    }

    /// `prescription_<consultation>_<yyyymmdd>.pdf`, no patient data.
    pub fn filename(&self, draft: &PrescriptionDraft) -> String {
        let consultation: String = draft
            .consultation_id
            .as_deref()
            .unwrap_or("draft")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!(
            "prescription_{consultation}_{}.pdf",
            draft.issued_on.format("%Y%m%d")
        )
    }

    fn title(&self, draft: &PrescriptionDraft) -> &'static str {
        match draft.format {
            PrescriptionFormat::Simple => "PRESCRIPTION",
            PrescriptionFormat::SpecialControl => "SPECIAL CONTROL PRESCRIPTION",
        }
    }

    fn render_copy(&self, draft: &PrescriptionDraft, copy_label: &str) -> Vec<PageCanvas> {
        let mut writer = PageWriter::new();

        // Header
        writer.line_of(FONT_BOLD, 14, 0, &self.template.clinic_name);
        if let Some(address) = &self.template.clinic_address {
            writer.line_of(FONT_REGULAR, 9, 0, address);
        }
        writer.rule();
        writer.line_of(FONT_BOLD, 13, 0, self.title(draft));
        if !copy_label.is_empty() {
            writer.line_of(FONT_REGULAR, 9, 0, copy_label);
        }
        writer.gap(6);

        // Prescriber
        let doctor_name = draft.doctor.name.as_deref().unwrap_or("-");
        writer.line_of(FONT_BOLD, 10, 0, &format!("Prescriber: {doctor_name}"));
        if let Some(registration) = draft.doctor.registration_line() {
            writer.line_of(FONT_REGULAR, 10, 0, &registration);
        }
        if let Some(specialty) = &draft.doctor.specialty {
            writer.line_of(FONT_REGULAR, 10, 0, specialty);
        }
        writer.gap(4);

        // Patient
        let patient_name = draft.patient_name().unwrap_or("-");
        writer.line_of(FONT_BOLD, 10, 0, &format!("Patient: {patient_name}"));
        if let Some(number) = &draft.patient.document_number {
            writer.line_of(FONT_REGULAR, 10, 0, &format!("ID: {number}"));
        }
        if draft.format == PrescriptionFormat::SpecialControl {
            let address = draft.patient.address.as_deref().unwrap_or("-");
            writer.wrapped(FONT_REGULAR, 10, 0, &format!("Address: {address}"));
        }
        writer.rule();

        // Medications
        let items = medication_lines(draft);
        for (i, item) in items.iter().enumerate() {
            writer.wrapped(FONT_BOLD, 11, 0, &item_heading(i + 1, item));
            if let Some(instructions) = &item.instructions {
                writer.wrapped(FONT_REGULAR, 10, 16, instructions);
            }
            writer.gap(4);
        }

        let observations = draft.observations.clone().or_else(|| {
            draft
                .legacy
                .as_ref()
                .and_then(legacy::legacy_instructions)
        });
        if let Some(observations) = observations {
            writer.gap(4);
            writer.line_of(FONT_BOLD, 10, 0, "Observations:");
            writer.wrapped(FONT_REGULAR, 10, 0, &observations);
        }

        writer.gap(8);
        writer.line_of(
            FONT_REGULAR,
            10,
            0,
            &format!("Issued on: {}", draft.issued_on.format("%d/%m/%Y")),
        );
        if let Some(valid_until) = draft.valid_until {
            writer.line_of(
                FONT_REGULAR,
                10,
                0,
                &format!("Valid until: {}", valid_until.format("%d/%m/%Y")),
            );
        }

        if draft.format == PrescriptionFormat::SpecialControl {
            writer.gap(8);
            writer.line_of(FONT_BOLD, 9, 0, "Buyer identification");
            writer.line_of(FONT_REGULAR, 9, 0, "Name: ______________________  ID: ____________");
            writer.line_of(FONT_BOLD, 9, 0, "Supplier identification");
            writer.line_of(FONT_REGULAR, 9, 0, "Pharmacist: ________________  Date: __/__/____");
        }

        writer.finish(&self.template.footer)
    }
}

/// Structured items, or items parsed from legacy free text.
pub fn medication_lines(draft: &PrescriptionDraft) -> Vec<MedicationItem> {
    if !draft.items.is_empty() {
        return draft
            .items
            .iter()
            .filter(|i| !i.name.trim().is_empty())
            .cloned()
            .collect();
    }
    draft
        .legacy
        .as_ref()
        .map(legacy::parse_legacy_medications)
        .unwrap_or_default()
}

fn item_heading(position: usize, item: &MedicationItem) -> String {
    let mut heading = format!("{position}. {}", item.name.trim());
    if let Some(dosage) = &item.dosage {
        heading.push(' ');
        heading.push_str(dosage);
    }
    if let Some(route) = &item.route {
        heading.push_str(&format!(" ({route})"));
    }
    if let Some(quantity) = &item.quantity {
        heading.push_str(&format!(" - {quantity}"));
    }
    heading
}

/// Tracks the baseline and breaks pages above the stamp area.
struct PageWriter {
    pages: Vec<PageCanvas>,
    current: PageCanvas,
    y: i64,
}

impl PageWriter {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: PageCanvas::new(),
            y: PAGE_HEIGHT - 60,
        }
    }

    fn ensure_room(&mut self) {
        if self.y < BODY_FLOOR {
            let full = std::mem::take(&mut self.current);
            self.pages.push(full);
            self.y = PAGE_HEIGHT - 60;
        }
    }

    fn line_of(&mut self, font: &str, size: i64, indent: i64, text: &str) {
        self.ensure_room();
        self.current.text(font, size, MARGIN_LEFT + indent, self.y, text);
        self.y -= LINE.max(size + 4);
    }

    fn wrapped(&mut self, font: &str, size: i64, indent: i64, text: &str) {
        for line in wrap_text(text, WRAP_CHARS) {
            self.line_of(font, size, indent, &line);
        }
    }

    fn rule(&mut self) {
        self.ensure_room();
        self.y -= 2;
        self.current
            .line(MARGIN_LEFT, self.y, PAGE_WIDTH - MARGIN_RIGHT, self.y);
        self.y -= 12;
    }

    fn gap(&mut self, points: i64) {
        self.y -= points;
    }

    /// Close the copy: signature line on the last page plus footer on every page.
    fn finish(mut self, footer: &str) -> Vec<PageCanvas> {
        let (x, y, width, height) = STAMP_BOX;
        let signature_y = y + height + 20;
        self.current.line(x, signature_y, x + width, signature_y);
        self.pages.push(self.current);

        for page in &mut self.pages {
            page.text(FONT_REGULAR, 8, MARGIN_LEFT, 30, footer);
        }
        self.pages
    }
}
