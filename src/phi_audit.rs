// Static analysis tests that scan every Rust source file for tracing calls
// carrying patient data or signing secrets. Log lines may only carry opaque
// identifiers, hash prefixes and outcomes.

use std::fs;
use std::path::Path;

/// Field names and interpolations that MUST NOT appear in tracing macros.
const PHI_PATTERNS: &[&str] = &[
    // Patient and prescription content
    "patient_name",
    "patient.name",
    "doctor.name",
    "signer_name",
    "item.name",
    "medication_name",
    ".medications",
    "instructions",
    "observations",
    "document_number",
    "birth_date",
    ".address",
    // Contact details
    "email",
    "phone",
    ".to,",
    // Secrets
    "password",
    "pin =",
    "%pin",
    "?pin",
    ".expose()",
];

const ALLOWLIST: &[&str] = &["phi_audit.rs"];

const TRACING_MACROS: &[&str] = &[
    "tracing::info!",
    "tracing::warn!",
    "tracing::error!",
    "tracing::debug!",
    "tracing::trace!",
];

#[test]
fn no_phi_in_tracing_calls() {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    assert!(src_dir.exists(), "Source directory not found: {}", src_dir.display());

    let mut violations = Vec::new();
    scan_directory(&src_dir, &mut violations);

    if !violations.is_empty() {
        let report = violations
            .iter()
            .map(|(file, line_num, call, pattern)| {
                format!("  {file}:{line_num}: found '{pattern}' in: {call}")
            })
            .collect::<Vec<_>>()
            .join("\n");
        panic!(
            "PHI AUDIT FAILED: {} violation(s) found in tracing calls:\n{}\n\n\
             Fix: log opaque ids (record_id, consultation_id, hash prefixes) instead.",
            violations.len(),
            report
        );
    }
}

#[test]
fn phi_patterns_list_is_not_empty() {
    assert!(PHI_PATTERNS.len() >= 10);
}

#[test]
fn scanner_detects_known_violation() {
    let line = r#"tracing::info!(name = %draft.patient.name, "signed");"#;
    assert!(!tracing_calls(line).is_empty());
    assert!(PHI_PATTERNS.iter().any(|p| line.contains(p)));
}

#[test]
fn scanner_passes_clean_tracing() {
    let line = r#"tracing::info!(record_id = %id, post_hash = hash::short(&h), "Audit entry recorded");"#;
    assert!(!PHI_PATTERNS.iter().any(|p| line.contains(p)));
}

#[test]
fn multi_line_calls_are_joined() {
    let source = "tracing::warn!(\n    error = %e,\n    password = %p,\n    \"x\"\n);\nlet y = 1;";
    let calls = tracing_calls(source);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, 1);
    assert!(calls[0].1.contains("password"));
}

fn scan_directory(dir: &Path, violations: &mut Vec<(String, usize, String, String)>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            scan_directory(&path, violations);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            scan_file(&path, violations);
        }
    }
}

fn scan_file(path: &Path, violations: &mut Vec<(String, usize, String, String)>) {
    let filename = path.file_name().unwrap_or_default().to_string_lossy();
    if ALLOWLIST.iter().any(|a| filename.contains(a)) {
        return;
    }
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };

    let relative_path = path
        .strip_prefix(Path::new(env!("CARGO_MANIFEST_DIR")).join("src"))
        .unwrap_or(path)
        .display()
        .to_string();

    for (line_num, call) in tracing_calls(&content) {
        for pattern in PHI_PATTERNS {
            if call.contains(pattern) {
                violations.push((relative_path.clone(), line_num, call.clone(), pattern.to_string()));
            }
        }
    }
}

/// Every tracing macro call with its 1-indexed start line, joined onto one line.
fn tracing_calls(content: &str) -> Vec<(usize, String)> {
    let lines: Vec<&str> = content.lines().collect();
    let mut calls = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let trimmed = lines[i].trim();
        if !TRACING_MACROS.iter().any(|m| trimmed.starts_with(m)) {
            i += 1;
            continue;
        }

        let mut call = String::from(trimmed);
        let mut depth = paren_delta(trimmed);
        let mut j = i + 1;
        while depth > 0 && j < lines.len() {
            let next = lines[j].trim();
            call.push(' ');
            call.push_str(next);
            depth += paren_delta(next);
            j += 1;
        }

        calls.push((i + 1, call));
        i = j;
    }
    calls
}

fn paren_delta(line: &str) -> i32 {
    line.chars().fold(0, |depth, ch| match ch {
        '(' => depth + 1,
        ')' => depth - 1,
        _ => depth,
    })
}
