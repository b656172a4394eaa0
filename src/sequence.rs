//! Filename sequence parsing
//!
//! Extracts an ordering key from free-form member filenames. The grammar is an
//! ordered rule list ([`SequenceRule`]); the first rule that matches wins:
//!
//! 1. `Labelled`: a known label (`part`, `page`, `group` by default) followed by
//!    optional separators and a digit run, e.g. `Scan_PART-07.pdf`
//! 2. `Bare`: the first digit run anywhere in the name, e.g. `07 intro.pdf`
//! 3. `Unordered`: no digits at all

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Labels recognized when no configuration overrides them
pub const DEFAULT_LABELS: &[&str] = &["part", "page", "group"];

/// Grammar rules in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceRule {
    Labelled,
    Bare,
    Unordered,
}

impl SequenceRule {
    pub const ALL: [SequenceRule; 3] = [Self::Labelled, Self::Bare, Self::Unordered];
}

/// Ordering key parsed from a filename
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SequenceKey {
    /// Lowercased label, `None` for bare numbers
    pub group_label: Option<String>,
    /// Numeric value; `None` means unordered
    pub part_number: Option<u64>,
    /// Digits as written, leading zeros kept
    pub part_digits: Option<String>,
    pub raw_name: String,
}

impl SequenceKey {
    fn unordered(raw_name: &str) -> Self {
        Self {
            group_label: None,
            part_number: None,
            part_digits: None,
            raw_name: raw_name.to_string(),
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.part_number.is_some()
    }

    /// Two ordered keys with the same label and number collide
    pub fn collides_with(&self, other: &Self) -> bool {
        self.is_ordered() && self.group_label == other.group_label && self.part_number == other.part_number
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.group_label, &self.part_digits) {
            (Some(label), Some(digits)) => write!(f, "{label} {digits}"),
            (None, Some(digits)) => f.write_str(digits),
            _ => f.write_str("unordered"),
        }
    }
}

/// Parses [`SequenceKey`]s with a configurable label set
#[derive(Debug, Clone)]
pub struct SequenceParser {
    labelled: Option<Regex>,
    bare: Regex,
}

impl SequenceParser {
    /// Build a parser for the given labels (matched case-insensitively)
    pub fn new<S: AsRef<str>>(labels: &[S]) -> Result<Self, regex::Error> {
        let alternation: Vec<String> = labels
            .iter()
            .map(|l| l.as_ref().trim())
            .filter(|l| !l.is_empty())
            .map(regex::escape)
            .collect();

        let labelled = if alternation.is_empty() {
            None
        } else {
            Some(Regex::new(&format!(
                r"(?i)({})[ _\-]*([0-9]+)",
                alternation.join("|")
            ))?)
        };

        Ok(Self {
            labelled,
            bare: Regex::new("[0-9]+")?,
        })
    }

    /// Parse a member filename (directories and extension are ignored)
    pub fn parse(&self, filename: &str) -> SequenceKey {
        self.parse_with_rule(filename).0
    }

    /// Parse and report which rule matched
    pub fn parse_with_rule(&self, filename: &str) -> (SequenceKey, SequenceRule) {
        let stem = file_stem(filename);

        for rule in SequenceRule::ALL {
            let key = match rule {
                SequenceRule::Labelled => self.labelled_key(stem, filename),
                SequenceRule::Bare => self.bare.find(stem).map(|m| SequenceKey {
                    group_label: None,
                    part_number: Some(parse_saturating(m.as_str())),
                    part_digits: Some(m.as_str().to_string()),
                    raw_name: filename.to_string(),
                }),
                SequenceRule::Unordered => Some(SequenceKey::unordered(filename)),
            };
            if let Some(key) = key {
                return (key, rule);
            }
        }
        (SequenceKey::unordered(filename), SequenceRule::Unordered)
    }

    /// Longest labelled digit run; the first one wins ties
    fn labelled_key(&self, stem: &str, filename: &str) -> Option<SequenceKey> {
        let regex = self.labelled.as_ref()?;
        let mut best: Option<(String, &str)> = None;
        for caps in regex.captures_iter(stem) {
            let (Some(label), Some(digits)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let longer = best
                .as_ref()
                .map_or(true, |(_, d)| digits.as_str().len() > d.len());
            if longer {
                best = Some((label.as_str().to_lowercase(), digits.as_str()));
            }
        }
        best.map(|(label, digits)| SequenceKey {
            group_label: Some(label),
            part_number: Some(parse_saturating(digits)),
            part_digits: Some(digits.to_string()),
            raw_name: filename.to_string(),
        })
    }
}

fn file_stem(filename: &str) -> &str {
    let base = crate::archive::basename(filename);
    Path::new(base)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(base)
}

/// Decimal digits to u64, saturating on overflow
fn parse_saturating(digits: &str) -> u64 {
    digits.parse().unwrap_or(u64::MAX)
}
