pub mod import;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// A raw value submitted for one input field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InputValue {
    Numeric(f64),
    Text(String),
}

/// Field name to submitted value, ordered by field name.
pub type InputValues = BTreeMap<String, InputValue>;

impl InputValue {
    /// Interprets a spreadsheet cell or CLI argument. Blank cells are absent.
    pub fn from_cell(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(match parse_numeric_text(trimmed) {
            Some(value) => Self::Numeric(value),
            None => Self::Text(trimmed.to_string()),
        })
    }

    /// Numeric reading used by formulas: numbers as-is, numeric-looking text
    /// parsed, other text looked up in the qualitative scale.
    pub fn as_number(&self, scale: &QualitativeScale) -> Option<f64> {
        match self {
            Self::Numeric(value) => value.is_finite().then_some(*value),
            Self::Text(text) => parse_numeric_text(text).or_else(|| scale.score(text)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Numeric(_) => "numeric",
            Self::Text(_) => "text",
        }
    }
}

impl Display for InputValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric(value) => write!(f, "{value}"),
            Self::Text(text) => write!(f, "{text}"),
        }
    }
}

/// Parses `1,200`, `45%`, ` 3.5 `; the percent sign is dropped, not applied.
pub fn parse_numeric_text(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses a `field=value` pair from the command line.
pub fn parse_assignment(raw: &str) -> Result<(String, InputValue)> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected field=value, got `{raw}`"))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(anyhow!("field name is empty in `{raw}`"));
    }
    let value =
        InputValue::from_cell(value).ok_or_else(|| anyhow!("value for `{field}` is empty"))?;
    Ok((field.to_string(), value))
}

/// Scores for qualitative (text) answers, matched case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct QualitativeScale(BTreeMap<String, f64>);

impl QualitativeScale {
    pub fn new(entries: BTreeMap<String, f64>) -> Self {
        Self(entries)
    }

    pub fn score(&self, answer: &str) -> Option<f64> {
        let answer = answer.trim();
        self.0
            .iter()
            .find(|(label, _)| label.trim().eq_ignore_ascii_case(answer))
            .map(|(_, score)| *score)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(label, score)| (label.as_str(), *score))
    }
}

impl Default for QualitativeScale {
    fn default() -> Self {
        let full = [
            "yes",
            "true",
            "completed",
            "applied",
            "full",
            "fully",
            "fully compliant",
            "fully documented",
            "conducted",
        ];
        let partial = [
            "partial",
            "partially",
            "partly",
            "partially applied",
            "partially compliant",
            "partially documented",
            "partially conducted",
            "in progress",
            "yes, but inadequate",
        ];
        let none = [
            "no",
            "false",
            "none",
            "not applied",
            "not completed",
            "not started",
            "non-compliant",
            "not documented",
            "not conducted",
        ];
        let mut entries = BTreeMap::new();
        for label in full {
            entries.insert(label.to_string(), 100.0);
        }
        for label in partial {
            entries.insert(label.to_string(), 50.0);
        }
        for label in none {
            entries.insert(label.to_string(), 0.0);
        }
        Self(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_assignment, parse_numeric_text, InputValue, QualitativeScale};

    #[test]
    fn parses_cells() {
        assert_eq!(InputValue::from_cell(" 1,200 "), Some(InputValue::Numeric(1200.0)));
        assert_eq!(InputValue::from_cell("45%"), Some(InputValue::Numeric(45.0)));
        assert_eq!(
            InputValue::from_cell("Partially Applied"),
            Some(InputValue::Text("Partially Applied".into()))
        );
        assert_eq!(InputValue::from_cell("   "), None);
        assert_eq!(InputValue::from_cell("NaN"), Some(InputValue::Text("NaN".into())));
    }

    #[test]
    fn numeric_text_rejects_non_finite() {
        assert_eq!(parse_numeric_text("inf"), None);
        assert_eq!(parse_numeric_text("%"), None);
        assert_eq!(parse_numeric_text("-0.5"), Some(-0.5));
    }

    #[test]
    fn parses_assignments() {
        let (field, value) = parse_assignment("Earned Value = 12.5").expect("parse");
        assert_eq!(field, "Earned Value");
        assert_eq!(value, InputValue::Numeric(12.5));
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("x=").is_err());
        assert!(parse_assignment("=3").is_err());
    }

    #[test]
    fn scale_matches_case_insensitively() {
        let scale = QualitativeScale::default();
        assert_eq!(scale.score("YES"), Some(100.0));
        assert_eq!(scale.score(" In Progress "), Some(50.0));
        assert_eq!(scale.score("Non-Compliant"), Some(0.0));
        assert_eq!(scale.score("perhaps"), None);
    }

    #[test]
    fn untagged_json_round_trip() {
        let json = r#"{"a":1.5,"b":"Yes"}"#;
        let parsed: super::InputValues = serde_json::from_str(json).expect("json");
        assert_eq!(parsed["a"], InputValue::Numeric(1.5));
        assert_eq!(parsed["b"], InputValue::Text("Yes".into()));
    }
}
