//! Prompt assembly and response extraction shared by both tiers.

use serde::Serialize;

use crate::model::Segment;

/// Maximum characters of one segment side sent to a model.
const MAX_SEGMENT_CHARS: usize = 2000;

/// Escapes chat-template control sequences so segment text cannot pose as
/// instructions.
///
/// # Sequences Escaped
/// - `<|...|>` - ChatML special tokens
/// - `<s>`, `</s>` - Sequence boundaries
/// - `[INST]`, `[/INST]` - Llama-style instruction markers
/// - `<<SYS>>`, `<</SYS>>` - Llama-style system prompt markers
pub(crate) fn sanitize_for_prompt(text: &str) -> String {
    text.replace("<|", "< |")
        .replace("|>", "| >")
        .replace("<s>", "< s >")
        .replace("</s>", "< / s >")
        .replace("[INST]", "[ INST ]")
        .replace("[/INST]", "[ / INST ]")
        .replace("<<SYS>>", "< < SYS > >")
        .replace("<</SYS>>", "< < / SYS > >")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PromptSegment<'a> {
    segment_id: &'a str,
    source: String,
    target: String,
}

/// Renders segments as a JSON array, one object per segment.
///
/// JSON encoding keeps quotes and newlines inside the segment text from
/// breaking the prompt structure.
pub(crate) fn render_segments(segments: &[&Segment]) -> String {
    let items: Vec<PromptSegment<'_>> = segments
        .iter()
        .map(|s| PromptSegment {
            segment_id: &s.id,
            source: sanitize_for_prompt(&s.source_text)
                .chars()
                .take(MAX_SEGMENT_CHARS)
                .collect(),
            target: sanitize_for_prompt(&s.target_text)
                .chars()
                .take(MAX_SEGMENT_CHARS)
                .collect(),
        })
        .collect();
    serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
}

/// Extracts the first JSON object from a model answer, tolerating code fences
/// and chatter around it.
///
/// Uses a scanner that tracks string boundaries and escape sequences so braces
/// inside string values do not end the object early.
pub(crate) fn extract_json(response: &str) -> &str {
    let Some(start) = response.find('{') else {
        return response.trim();
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    let mut end = response.len();

    for (i, c) in response[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    &response[start..end]
}
