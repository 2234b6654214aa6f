//! Domain error types.
//!
//! `EvaluationError` is raised by the formula engine, `ConfigurationError`
//! by criteria-set validation, and `SubmissionError` wraps both (plus store
//! failures) for the submission pipeline so callers can map each class to
//! the right audience.

use thiserror::Error;

/// A formula could not be parsed or evaluated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("formula is empty")]
    Empty,

    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("function `{function}` expects {expected} argument(s), got {found}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        found: usize,
    },

    #[error("missing input field `{0}`")]
    MissingField(String),

    #[error("input field `{field}` has non-numeric value `{value}`")]
    NonNumericField { field: String, value: String },

    #[error("formula produced a non-finite result")]
    NonFinite,

    #[error("formula is {length} characters long, limit is {max}")]
    TooLong { length: usize, max: usize },

    #[error("formula nesting exceeds {max} levels")]
    TooDeep { max: usize },
}

impl EvaluationError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }
}

/// A criteria set is internally inconsistent and must not be used for scoring.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("criteria set has no active criteria")]
    NoActiveCriteria,

    #[error("duplicate criterion id `{0}`")]
    DuplicateCriterion(String),

    #[error("criterion `{criterion}` has invalid weight {weight}")]
    InvalidWeight { criterion: String, weight: f64 },

    #[error("active criterion weights sum to {total}, expected 1 within {tolerance}")]
    WeightSum { total: f64, tolerance: f64 },

    #[error("{scope} rating bands are empty")]
    EmptyBands { scope: String },

    #[error("{scope} rating bands are not strictly ascending at band {index} (`{label}`)")]
    BandsNotAscending {
        scope: String,
        index: usize,
        label: String,
    },

    #[error("weight tolerance {0} must be finite and not negative")]
    InvalidTolerance(f64),

    #[error("criterion `{0}` names a key topic but no performance signal")]
    TopicWithoutSignal(String),

    #[error("performance signal `{signal}` is under key topic `{first}` and `{second}`")]
    SignalTopicConflict {
        signal: String,
        first: String,
        second: String,
    },

    #[error("rating bands given for unknown {level} `{name}`")]
    UnknownGroup { level: String, name: String },

    #[error("criterion `{criterion}` has an invalid formula: {source}")]
    Formula {
        criterion: String,
        #[source]
        source: EvaluationError,
    },
}

/// Why a submission was rejected. Nothing is persisted for any variant.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("DevCo identifier is empty")]
    EmptyDevco,

    #[error("no criteria set is active")]
    NoActiveCriteria,

    #[error("active criteria set is inconsistent: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("criterion `{criterion}` could not be evaluated: {source}")]
    Evaluation {
        criterion: String,
        #[source]
        source: EvaluationError,
    },

    #[error("storage failure, please retry: {0:#}")]
    Store(anyhow::Error),
}

impl SubmissionError {
    /// True when the problem lies with the submitted values rather than the
    /// criteria set or the store.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::EmptyDevco | Self::Evaluation { .. })
    }
}
