use thiserror::Error;

/// Result type for frame lifecycle operations
pub type FrameResult<T> = Result<T, FrameError>;

/// Errors surfaced by the frame lifecycle and lookup flow
///
/// Every variant renders a message suitable for showing to the user as-is.
/// None of them are retried and none leave the application unusable.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The action needs a signed-in session and there is none
    #[error("You must be signed in to do that.")]
    AuthRequired,

    /// The auth backend rejected the credentials or the request
    #[error("{message}")]
    Auth { message: String },

    /// Missing or oversized input, caught before any network call
    #[error("{message}")]
    Validation { message: String },

    /// Upload rejected or failed
    #[error("Upload of {path} failed: {message}")]
    Storage { path: String, message: String },

    /// Row insert or query failed at the backend
    #[error("Database error: {source}")]
    Persistence {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Query succeeded but matched no rows
    #[error("Memory not found: {id}")]
    NotFound { id: String },
}

impl FrameError {
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn storage<P: Into<String>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Wrap any backend error as a persistence failure
    pub fn persistence<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Persistence {
            source: Box::new(error),
        }
    }

    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Stable machine-readable code, used by the playback API
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::Auth { .. } => "AUTH_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
        }
    }
}

impl From<sqlx::Error> for FrameError {
    fn from(error: sqlx::Error) -> Self {
        Self::persistence(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_user_readable() {
        assert_eq!(
            FrameError::AuthRequired.to_string(),
            "You must be signed in to do that."
        );
        assert_eq!(
            FrameError::validation("Video exceeds 50MB limit.").to_string(),
            "Video exceeds 50MB limit."
        );
        assert_eq!(
            FrameError::storage("photos/a.png", "already exists").to_string(),
            "Upload of photos/a.png failed: already exists"
        );
    }

    #[test]
    fn test_not_found_classification() {
        assert!(FrameError::not_found("42").is_not_found());
        assert!(!FrameError::AuthRequired.is_not_found());
        assert_eq!(FrameError::not_found("42").code(), "NOT_FOUND");
    }

    #[test]
    fn test_persistence_wraps_source() {
        let err = FrameError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.code(), "PERSISTENCE_ERROR");
        assert!(std::error::Error::source(&err).is_some());
    }
}
