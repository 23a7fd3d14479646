use thiserror::Error;

/// Rule engine error types.
///
/// Parsing, validation and matching never fail; these errors only come from
/// the edges that touch the outside world (files, JSON, options).
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Unknown rule type: {0}")]
    UnknownRuleType(String),

    #[error("Failed to read rules file '{path}': {source}")]
    ReadRules {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;
