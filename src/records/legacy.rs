//! Best-effort parser for legacy free-text prescriptions.
//!
//! Older drafts typed all medications into a single text box, one per line.
//! Each non-empty line becomes a `MedicationItem`. Nothing here fails: a line
//! that cannot be split is kept whole as the medication name.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{LegacyText, MedicationItem};

static LEADING_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\d+\s*[.)]\s+|[-*•]\s+)").unwrap());

static TRAILING_QUANTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*([^()]*\d[^()]*?)\s*\)\s*$").unwrap());

static LABELLED_QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*\b(?:qty|qtd|quantity|quantidade)\b\s*[:=]?\s*(.+)$").unwrap()
});

static DOSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d+(?:[.,]\d+)?\s*(?:mg/ml|mcg|mg|µg|ml|ui|g|%)").unwrap()
});

/// Parse all medication lines of a legacy draft.
pub fn parse_legacy_medications(legacy: &LegacyText) -> Vec<MedicationItem> {
    legacy
        .medications
        .lines()
        .filter_map(parse_line)
        .collect()
}

/// General instructions, when the legacy draft has any.
pub fn legacy_instructions(legacy: &LegacyText) -> Option<String> {
    let text = legacy.instructions.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Parse one free-text line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<MedicationItem> {
    let mut rest = LEADING_MARKER.replace(line, "").trim().to_string();
    if rest.is_empty() {
        return None;
    }

    let mut quantity = None;
    if let Some(caps) = TRAILING_QUANTITY.captures(&rest) {
        quantity = Some(caps[1].trim().to_string());
        let start = caps.get(0).map_or(rest.len(), |m| m.start());
        rest = rest[..start].trim().to_string();
    } else if let Some(caps) = LABELLED_QUANTITY.captures(&rest) {
        quantity = Some(caps[1].trim().to_string());
        let start = caps.get(0).map_or(rest.len(), |m| m.start());
        rest = rest[..start].trim().to_string();
    }

    let (head, instructions) = split_instructions(&rest);
    let (name, dosage) = split_dosage(head);

    Some(MedicationItem {
        name,
        dosage,
        quantity: quantity.filter(|q| !q.is_empty()),
        route: None,
        instructions,
    })
}

fn split_instructions(text: &str) -> (&str, Option<String>) {
    let split_at = [" - ", " – ", ";"]
        .iter()
        .filter_map(|sep| text.find(sep).map(|idx| (idx, sep.len())))
        .min_by_key(|(idx, _)| *idx);

    match split_at {
        Some((idx, len)) => {
            let tail = text[idx + len..].trim();
            (
                text[..idx].trim(),
                (!tail.is_empty()).then(|| tail.to_string()),
            )
        }
        None => (text.trim(), None),
    }
}

fn split_dosage(head: &str) -> (String, Option<String>) {
    match DOSAGE.find(head) {
        Some(m) if m.start() > 0 => {
            let name = head[..m.start()].trim();
            let dosage = head[m.start()..].trim();
            if name.is_empty() {
                (head.to_string(), None)
            } else {
                (name.to_string(), Some(dosage.to_string()))
            }
        }
        _ => (head.to_string(), None),
    }
}
