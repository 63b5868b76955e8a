//! Errors raised by the query façades and batch tools.

use crate::db::repository::RepositoryError;
use crate::models::{SupplementalMismatch, UnknownShortName};

pub type TadResult<T> = Result<T, TadError>;

#[derive(Debug, thiserror::Error)]
#[allow(clippy::result_large_err)]
pub enum TadError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// A caller-supplied value (usually an enum short name) was rejected.
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// Stored data contradicts an assumption the query relies on.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error(
        "Observing seasons differ: {original_label} is season {original}, {other_label} is season {other}"
    )]
    SeasonMismatch {
        original_label: String,
        original: i32,
        other_label: String,
        other: i32,
    },

    #[error(transparent)]
    KeplerIdMismatch(#[from] SupplementalMismatch),

    #[error("Expected at most one {what}, found {count}")]
    NonUniqueResult { what: String, count: usize },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl TadError {
    pub fn not_found(what: impl Into<String>) -> Self {
        TadError::NotFound(what.into())
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        TadError::IllegalState(message.into())
    }

    pub fn non_unique(what: impl Into<String>, count: usize) -> Self {
        TadError::NonUniqueResult {
            what: what.into(),
            count,
        }
    }
}

impl From<UnknownShortName> for TadError {
    fn from(err: UnknownShortName) -> Self {
        TadError::IllegalArgument(err.to_string())
    }
}

/// Zero or one element of `items`; more than one is a `NonUniqueResult`.
pub(crate) fn at_most_one<T>(mut items: Vec<T>, what: &str) -> TadResult<Option<T>> {
    match items.len() {
        0 => Ok(None),
        1 => Ok(items.pop()),
        count => Err(TadError::non_unique(what, count)),
    }
}
