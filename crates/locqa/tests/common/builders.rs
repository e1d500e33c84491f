//! Builders for test inputs.

#![allow(dead_code)]

use locqa::model::Segment;
use locqa::parity::ExternalFinding;

/// Segments that pass every L1 rule.
pub fn clean_segments(file_id: &str) -> Vec<Segment> {
    vec![
        Segment::new(format!("{}-s1", file_id), file_id, 1, "Save the document.", "Speichern Sie das Dokument."),
        Segment::new(format!("{}-s2", file_id), file_id, 2, "Open the settings.", "Öffnen Sie die Einstellungen."),
        Segment::new(format!("{}-s3", file_id), file_id, 3, "Close the window.", "Schließen Sie das Fenster."),
    ]
}

/// Four segments: one with a double space (minor) and one with a changed
/// number (major, ambiguous).
pub fn flawed_segments(file_id: &str) -> Vec<Segment> {
    vec![
        Segment::new(format!("{}-s1", file_id), file_id, 1, "Save the document.", "Speichern Sie  das Dokument."),
        Segment::new(format!("{}-s2", file_id), file_id, 2, "Buy 3 apples.", "Kaufen Sie 4 Äpfel."),
        Segment::new(format!("{}-s3", file_id), file_id, 3, "Close the window.", "Schließen Sie das Fenster."),
        Segment::new(format!("{}-s4", file_id), file_id, 4, "Print the page.", "Drucken Sie die Seite."),
    ]
}

pub fn segment(file_id: &str, number: u32, source: &str, target: &str) -> Segment {
    Segment::new(format!("{}-s{}", file_id, number), file_id, number, source, target)
}

pub fn external(file_name: &str, segment: Option<&str>, category: &str) -> ExternalFinding {
    ExternalFinding {
        file_name: file_name.to_string(),
        segment: segment.map(str::to_string),
        source_text: String::new(),
        target_text: String::new(),
        category: category.to_string(),
        severity: None,
    }
}

pub fn external_with_text(file_name: &str, source: &str, target: &str, category: &str) -> ExternalFinding {
    ExternalFinding {
        file_name: file_name.to_string(),
        segment: None,
        source_text: source.to_string(),
        target_text: target.to_string(),
        category: category.to_string(),
        severity: Some("minor".to_string()),
    }
}
