//! Mapping of third-party QA tool category strings onto the internal vocabulary.

use crate::model::Category;

/// Known external labels, already normalized (lowercase, single spaces).
const CATEGORY_TABLE: &[(&str, Category)] = &[
    // Internal names map to themselves
    ("accuracy", Category::Accuracy),
    ("fluency", Category::Fluency),
    ("terminology", Category::Terminology),
    ("consistency", Category::Consistency),
    ("style", Category::Style),
    ("locale convention", Category::LocaleConvention),
    ("other", Category::Other),
    // Accuracy
    ("mistranslation", Category::Accuracy),
    ("omission", Category::Accuracy),
    ("addition", Category::Accuracy),
    ("untranslated", Category::Accuracy),
    ("untranslated segment", Category::Accuracy),
    ("empty target", Category::Accuracy),
    ("blank target", Category::Accuracy),
    ("source equals target", Category::Accuracy),
    ("number mismatch", Category::Accuracy),
    ("numeric mismatch", Category::Accuracy),
    ("numbers", Category::Accuracy),
    ("url mismatch", Category::Accuracy),
    ("link mismatch", Category::Accuracy),
    // Fluency
    ("tag mismatch", Category::Fluency),
    ("tags", Category::Fluency),
    ("missing tag", Category::Fluency),
    ("double space", Category::Fluency),
    ("double spaces", Category::Fluency),
    ("whitespace", Category::Fluency),
    ("leading/trailing spaces", Category::Fluency),
    ("punctuation", Category::Fluency),
    ("end punctuation", Category::Fluency),
    ("spelling", Category::Fluency),
    ("grammar", Category::Fluency),
    ("typography", Category::Fluency),
    ("capitalization", Category::Fluency),
    ("repeated word", Category::Fluency),
    ("repeated words", Category::Fluency),
    // Terminology
    ("key term mismatch", Category::Terminology),
    ("glossary", Category::Terminology),
    ("term mismatch", Category::Terminology),
    ("forbidden term", Category::Terminology),
    // Consistency
    ("inconsistency", Category::Consistency),
    ("inconsistency in target", Category::Consistency),
    ("inconsistency in source", Category::Consistency),
    ("inconsistent translation", Category::Consistency),
    // Style
    ("register", Category::Style),
    ("tone", Category::Style),
    ("length", Category::Style),
    // Locale convention
    ("locale", Category::LocaleConvention),
    ("date format", Category::LocaleConvention),
    ("number format", Category::LocaleConvention),
    ("measurement", Category::LocaleConvention),
    ("currency", Category::LocaleConvention),
];

/// Normalizes an external category string. Total: unknown input is `Other`.
///
/// Case, surrounding whitespace, `-`/`_` separators and repeated spaces are
/// ignored.
pub fn normalize_category(raw: &str) -> Category {
    let key = raw
        .to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    CATEGORY_TABLE
        .iter()
        .find(|(label, _)| *label == key)
        .map(|(_, category)| *category)
        .unwrap_or(Category::Other)
}
