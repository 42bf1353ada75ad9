//! Error taxonomy shared by the stores, the domain services and the dialog controller.

/// Failures a domain operation can report.
///
/// Only [`Error::Validation`] and [`Error::InvalidValue`] are recoverable: the
/// dialog stays where it is and re-prompts. Everything else ends the dialog.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed user input, e.g. text where a number was expected.
    #[error("{0}")]
    Validation(String),

    /// A number that parsed but is out of range (zero, negative).
    #[error("{0}")]
    InvalidValue(String),

    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    #[error("a food named '{0}' already exists")]
    DuplicateName(String),

    #[error("food {0} does not belong to you")]
    NotOwned(i64),

    #[error("storage failure: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("corrupt session data: {0}")]
    Session(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn food_not_found(key: impl ToString) -> Self {
        Self::NotFound {
            entity: "food",
            key: key.to_string(),
        }
    }

    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidValue(_))
    }

    /// Persistence failures whose cause is for operators, not users.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Session(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Map a unique-index violation on `foods` to [`Error::DuplicateName`].
pub(crate) fn map_food_conflict(err: rusqlite::Error, name: &str) -> Error {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::DuplicateName(name.to_string())
        }
        other => Error::Store(other),
    }
}
