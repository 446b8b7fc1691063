use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ManifestError {
    #[error("manifest has no periods")]
    NoPeriods,

    #[error("adaptation `{id}` has no representations")]
    EmptyAdaptation { id: String },

    #[error("invalid period `{id}`: {reason}")]
    InvalidPeriod { id: String, reason: String },

    #[error("invalid segment template `{template}`: {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("manifest parse error: {0}")]
    Parse(String),
}

pub type ManifestResult<T> = Result<T, ManifestError>;
