//! Error types for record mapping.

use thiserror::Error;

/// Result type for mapping operations.
pub type MappingResult<T> = Result<T, MappingError>;

/// Raised by a mapper when external data does not have the expected shape.
///
/// Inside a reconciliation run these surface as ordinary task failures and are
/// retried like any other transient error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    /// A field the resource cannot be identified or created without is absent.
    #[error("{table}: required field `{field}` is missing")]
    MissingField { table: String, field: String },

    /// A field is present but has the wrong type or an invalid value.
    #[error("{table}: invalid value for `{field}`: {reason}")]
    InvalidField {
        table: String,
        field: String,
        reason: String,
    },

    /// The payload is not a JSON object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(String),
}
