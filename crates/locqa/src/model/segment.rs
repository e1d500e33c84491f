use serde::{Deserialize, Serialize};

/// One aligned source/target pair of a file. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: String,
    pub file_id: String,
    pub segment_number: u32,
    pub source_text: String,
    pub target_text: String,
}

impl Segment {
    pub fn new(
        id: impl Into<String>,
        file_id: impl Into<String>,
        segment_number: u32,
        source_text: impl Into<String>,
        target_text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            file_id: file_id.into(),
            segment_number,
            source_text: source_text.into(),
            target_text: target_text.into(),
        }
    }
}

/// Checks that a segment list belongs to `file_id`, has unique ids and
/// strictly increasing segment numbers.
pub fn validate_segments(file_id: &str, segments: &[Segment]) -> Result<(), String> {
    let mut seen = std::collections::HashSet::new();
    let mut last_number: Option<u32> = None;

    for segment in segments {
        if segment.file_id != file_id {
            return Err(format!(
                "segment '{}' belongs to file '{}', expected '{}'",
                segment.id, segment.file_id, file_id
            ));
        }
        if segment.id.is_empty() {
            return Err(format!(
                "segment number {} has an empty id",
                segment.segment_number
            ));
        }
        if !seen.insert(segment.id.as_str()) {
            return Err(format!("duplicate segment id '{}'", segment.id));
        }
        if let Some(last) = last_number {
            if segment.segment_number <= last {
                return Err(format!(
                    "segment numbers out of order: {} follows {}",
                    segment.segment_number, last
                ));
            }
        }
        last_number = Some(segment.segment_number);
    }

    Ok(())
}
