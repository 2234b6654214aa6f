use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::scoring::ScoringOptions;

/// Store-assigned number of an imported criteria set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct CriteriaVersion(pub i64);

impl Display for CriteriaVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Error)]
#[error("invalid criteria version: {0}")]
pub struct VersionParseError(pub String);

impl FromStr for CriteriaVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        digits
            .parse::<i64>()
            .ok()
            .filter(|v| *v > 0)
            .map(Self)
            .ok_or_else(|| VersionParseError(s.to_string()))
    }
}

/// Scores from `lower_bound` up to the next band get `label`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatingBand {
    pub lower_bound: f64,
    pub label: String,
    /// A score equal to `lower_bound` stays in the band below (`>90%`).
    #[serde(default, skip_serializing_if = "is_false")]
    pub exclusive: bool,
}

impl RatingBand {
    pub fn new(lower_bound: f64, label: impl Into<String>) -> Self {
        Self {
            lower_bound,
            label: label.into(),
            exclusive: false,
        }
    }

    /// Band for scores strictly greater than `lower_bound`.
    pub fn above(lower_bound: f64, label: impl Into<String>) -> Self {
        Self {
            exclusive: true,
            ..Self::new(lower_bound, label)
        }
    }

    pub fn admits(&self, score: f64) -> bool {
        if self.exclusive {
            score > self.lower_bound
        } else {
            score >= self.lower_bound
        }
    }
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl Display for RatingBand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.exclusive {
            write!(f, ">{}:{}", self.lower_bound, self.label)
        } else {
            write!(f, "{}:{}", self.lower_bound, self.label)
        }
    }
}

/// Rating bands per performance signal or key topic name.
pub type GroupBands = BTreeMap<String, Vec<RatingBand>>;

#[derive(Debug, Error)]
#[error("invalid rating band `{0}`, expected <lower bound>:<label>")]
pub struct BandParseError(pub String);

/// Parses `0:Fail;50:Pass;75:Good`. Order is preserved, not sorted, so that
/// validation can report a mis-ordered sheet instead of silently fixing it.
/// A `>` before the bound makes it exclusive (`70:Pass;>90:Good`).
pub fn parse_bands(raw: &str) -> Result<Vec<RatingBand>, BandParseError> {
    raw.split(';')
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(|piece| {
            let (bound, label) = piece
                .split_once(':')
                .ok_or_else(|| BandParseError(piece.to_string()))?;
            let bound = bound.trim();
            let (bound, exclusive) = match bound.strip_prefix(">=") {
                Some(rest) => (rest, false),
                None => match bound.strip_prefix('>') {
                    Some(rest) => (rest, true),
                    None => (bound, false),
                },
            };
            let lower_bound = bound
                .trim()
                .trim_end_matches('%')
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| BandParseError(piece.to_string()))?;
            let label = label.trim();
            if label.is_empty() {
                return Err(BandParseError(piece.to_string()));
            }
            Ok(RatingBand {
                exclusive,
                ..RatingBand::new(lower_bound, label)
            })
        })
        .collect()
}

pub fn format_bands(bands: &[RatingBand]) -> String {
    bands
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(";")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Criterion {
    pub id: String,
    pub name: String,
    pub weight: f64,
    pub formula: String,
    #[serde(default)]
    pub bands: Vec<RatingBand>,
    #[serde(default)]
    pub pillar: Option<String>,
    /// Performance signal the criterion rolls up into.
    #[serde(default)]
    pub performance_signal: Option<String>,
    /// Key topic of the criterion's performance signal.
    #[serde(default)]
    pub key_topic: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriteriaSet {
    pub label: String,
    pub source: String,
    pub imported_at: DateTime<Utc>,
    pub criteria: Vec<Criterion>,
    /// Bands applied to the weighted aggregate.
    pub bands: Vec<RatingBand>,
    /// Signals and topics without an entry here are rated on `bands`.
    #[serde(default)]
    pub signal_bands: GroupBands,
    #[serde(default)]
    pub topic_bands: GroupBands,
    /// Rules recorded at import; every score under this set uses them.
    #[serde(default)]
    pub scoring: ScoringOptions,
    pub content_hash: String,
}

impl CriteriaSet {
    pub fn with_hash(
        label: impl Into<String>,
        source: impl Into<String>,
        criteria: Vec<Criterion>,
        bands: Vec<RatingBand>,
    ) -> Self {
        let mut set = Self {
            label: label.into(),
            source: source.into(),
            imported_at: Utc::now(),
            criteria,
            bands,
            signal_bands: GroupBands::new(),
            topic_bands: GroupBands::new(),
            scoring: ScoringOptions::default(),
            content_hash: String::new(),
        };
        set.rehash();
        set
    }

    pub fn with_scoring(mut self, scoring: ScoringOptions) -> Self {
        self.scoring = scoring;
        self.rehash();
        self
    }

    pub fn with_group_bands(mut self, signal_bands: GroupBands, topic_bands: GroupBands) -> Self {
        self.signal_bands = signal_bands;
        self.topic_bands = topic_bands;
        self.rehash();
        self
    }

    pub fn rehash(&mut self) {
        self.content_hash = content_hash(self);
    }

    pub fn active_criteria(&self) -> impl Iterator<Item = &Criterion> {
        self.criteria.iter().filter(|c| c.active)
    }

    pub fn find(&self, id: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.id == id)
    }
}

/// SHA-256 over the canonical JSON of everything that decides scores and
/// ratings. Label, source and import time are left out.
pub fn content_hash(set: &CriteriaSet) -> String {
    let canonical = serde_json::to_string(&(
        &set.criteria,
        &set.bands,
        &set.signal_bands,
        &set.topic_bands,
        &set.scoring,
    ))
    .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A criteria set as persisted: immutable content plus its version number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionedCriteria {
    pub version: CriteriaVersion,
    pub active: bool,
    pub set: CriteriaSet,
}

/// Listing row for a stored criteria version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriteriaVersionInfo {
    pub version: CriteriaVersion,
    pub label: String,
    pub source: String,
    pub imported_at: DateTime<Utc>,
    pub content_hash: String,
    pub criteria_count: usize,
    pub active: bool,
}

/// Lowercase ASCII slug used as the default criterion id.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}
