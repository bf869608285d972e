use thiserror::Error;

/// Structural problems found while building or parsing a protocol object.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown object type: {0}")]
    UnknownType(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Object of type {0} requires a non-empty id")]
    EmptyIdentity(String),
}
