//! Bus error types

/// Errors raised while manipulating property values
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BusError {
    #[error("Property '{property}' has no item named '{item}'")]
    UnknownItem { property: String, item: String },

    #[error("Item '{item}' of property '{property}' is not a {expected} item")]
    TypeMismatch {
        property: String,
        item: String,
        expected: &'static str,
    },
}

pub type BusResult<T> = Result<T, BusError>;
