//! Individual L1 checks over one source/target pair.

use regex::Regex;

use crate::model::{Category, Severity};

/// Stable identifiers of the deterministic rules, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleId {
    EmptyTarget,
    Untranslated,
    TagMismatch,
    NumberMismatch,
    UrlMismatch,
    DoubleSpace,
    WhitespaceMismatch,
    EndPunctuation,
    RepeatedWord,
}

impl RuleId {
    pub const ALL: [RuleId; 9] = [
        RuleId::EmptyTarget,
        RuleId::Untranslated,
        RuleId::TagMismatch,
        RuleId::NumberMismatch,
        RuleId::UrlMismatch,
        RuleId::DoubleSpace,
        RuleId::WhitespaceMismatch,
        RuleId::EndPunctuation,
        RuleId::RepeatedWord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::EmptyTarget => "empty_target",
            RuleId::Untranslated => "untranslated",
            RuleId::TagMismatch => "tag_mismatch",
            RuleId::NumberMismatch => "number_mismatch",
            RuleId::UrlMismatch => "url_mismatch",
            RuleId::DoubleSpace => "double_space",
            RuleId::WhitespaceMismatch => "whitespace_mismatch",
            RuleId::EndPunctuation => "end_punctuation",
            RuleId::RepeatedWord => "repeated_word",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            RuleId::EmptyTarget
            | RuleId::Untranslated
            | RuleId::NumberMismatch
            | RuleId::UrlMismatch => Category::Accuracy,
            RuleId::TagMismatch
            | RuleId::DoubleSpace
            | RuleId::WhitespaceMismatch
            | RuleId::EndPunctuation
            | RuleId::RepeatedWord => Category::Fluency,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            RuleId::EmptyTarget
            | RuleId::Untranslated
            | RuleId::TagMismatch
            | RuleId::NumberMismatch
            | RuleId::UrlMismatch => Severity::Major,
            RuleId::DoubleSpace
            | RuleId::WhitespaceMismatch
            | RuleId::EndPunctuation
            | RuleId::RepeatedWord => Severity::Minor,
        }
    }

    /// Rules whose hits are worth a second look by the screening tier.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            RuleId::Untranslated | RuleId::NumberMismatch | RuleId::EndPunctuation
        )
    }
}

/// Result of a single check: a human-readable description.
pub type Hit = Option<String>;

/// Pre-compiled patterns shared by the checks.
pub struct Patterns {
    tag: Regex,
    number: Regex,
    url: Regex,
    double_space: Regex,
    word: Regex,
}

impl Patterns {
    pub fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            // XML-like tags and numbered placeholders such as {0} or %1$s
            tag: Regex::new(r"</?[A-Za-z][^<>]*>|\{\d+\}|%\d*\$?[sd]")?,
            number: Regex::new(r"\d+(?:[.,\x{00A0} ]\d+)*")?,
            url: Regex::new(r"https?://[^\s<>]+[^\s<>.,;:!?)]")?,
            double_space: Regex::new(r"\S {2,}\S")?,
            word: Regex::new(r"\w+")?,
        })
    }

    pub fn run(&self, rule: RuleId, source: &str, target: &str) -> Hit {
        match rule {
            RuleId::EmptyTarget => empty_target(source, target),
            RuleId::Untranslated => untranslated(source, target),
            RuleId::TagMismatch => self.tag_mismatch(source, target),
            RuleId::NumberMismatch => self.number_mismatch(source, target),
            RuleId::UrlMismatch => self.url_mismatch(source, target),
            RuleId::DoubleSpace => self.double_space(source, target),
            RuleId::WhitespaceMismatch => whitespace_mismatch(source, target),
            RuleId::EndPunctuation => end_punctuation(source, target),
            RuleId::RepeatedWord => self.repeated_word(source, target),
        }
    }

    fn tag_mismatch(&self, source: &str, target: &str) -> Hit {
        let source_tags = sorted_matches(&self.tag, source, |m| m.to_string());
        let target_tags = sorted_matches(&self.tag, target, |m| m.to_string());
        (source_tags != target_tags).then(|| {
            format!(
                "Tags differ: source has {} tag(s), target has {}",
                source_tags.len(),
                target_tags.len()
            )
        })
    }

    fn number_mismatch(&self, source: &str, target: &str) -> Hit {
        // Compare digits only so that 1,000.5 and 1.000,5 agree.
        let digits = |m: &str| m.chars().filter(|c| c.is_ascii_digit()).collect::<String>();
        let source_numbers = sorted_matches(&self.number, source, digits);
        let target_numbers = sorted_matches(&self.number, target, digits);
        (source_numbers != target_numbers).then(|| {
            let missing: Vec<&str> = source_numbers
                .iter()
                .filter(|n| !target_numbers.contains(n))
                .map(|n| n.as_str())
                .collect();
            if missing.is_empty() {
                "Target contains numbers not present in source".to_string()
            } else {
                format!("Numbers missing from target: {}", missing.join(", "))
            }
        })
    }

    fn url_mismatch(&self, source: &str, target: &str) -> Hit {
        let source_urls = sorted_matches(&self.url, source, |m| m.to_string());
        let target_urls = sorted_matches(&self.url, target, |m| m.to_string());
        (source_urls != target_urls).then(|| "URLs differ between source and target".to_string())
    }

    fn double_space(&self, source: &str, target: &str) -> Hit {
        (self.double_space.is_match(target) && !self.double_space.is_match(source))
            .then(|| "Target contains a double space".to_string())
    }

    fn repeated_word(&self, source: &str, target: &str) -> Hit {
        let repeated = |text: &str| -> Option<String> {
            let words: Vec<String> = self
                .word
                .find_iter(text)
                .map(|m| m.as_str().to_lowercase())
                .collect();
            words
                .windows(2)
                .find(|pair| pair[0] == pair[1] && pair[0].chars().any(|c| c.is_alphabetic()))
                .map(|pair| pair[0].clone())
        };
        match (repeated(target), repeated(source)) {
            (Some(word), None) => Some(format!("Repeated word '{}'", word)),
            _ => None,
        }
    }
}

fn sorted_matches(re: &Regex, text: &str, map: impl Fn(&str) -> String) -> Vec<String> {
    let mut found: Vec<String> = re.find_iter(text).map(|m| map(m.as_str())).collect();
    found.sort();
    found
}

fn empty_target(source: &str, target: &str) -> Hit {
    (!source.trim().is_empty() && target.trim().is_empty())
        .then(|| "Target is empty".to_string())
}

fn untranslated(source: &str, target: &str) -> Hit {
    let source = source.trim();
    (source == target.trim() && source.chars().any(|c| c.is_alphabetic()))
        .then(|| "Target is identical to source".to_string())
}

fn whitespace_mismatch(source: &str, target: &str) -> Hit {
    let leading = |s: &str| s.len() - s.trim_start().len();
    let trailing = |s: &str| s.len() - s.trim_end().len();
    if (leading(source) > 0) != (leading(target) > 0) {
        return Some("Leading whitespace differs".to_string());
    }
    if (trailing(source) > 0) != (trailing(target) > 0) {
        return Some("Trailing whitespace differs".to_string());
    }
    None
}

fn end_punctuation(source: &str, target: &str) -> Hit {
    fn class(text: &str) -> Option<char> {
        match text.trim_end().chars().last()? {
            '.' | '。' | '．' => Some('.'),
            '!' | '！' => Some('!'),
            '?' | '？' => Some('?'),
            ':' | '：' => Some(':'),
            ';' | '；' => Some(';'),
            _ => None,
        }
    }
    let (s, t) = (class(source), class(target));
    (s != t).then(|| match (s, t) {
        (Some(s), Some(t)) => format!("Source ends with '{}', target with '{}'", s, t),
        (Some(s), None) => format!("Target lacks ending '{}'", s),
        _ => "Target adds ending punctuation".to_string(),
    })
}
