//! Error types for package signing and encrypted envelopes.

/// Coarse classification of a [`PackageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    State,
    Format,
    Crypto,
    Storage,
}

/// Package errors.
///
/// Verification outcomes are not errors; see
/// [`VerifyResult`](crate::signing::VerifyResult).
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// Caller input rejected before any mutation.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// A referenced part does not exist.
    #[error("part not found: {uri}")]
    NotFound { uri: String },

    /// The object is not in a state that permits the operation.
    #[error("invalid state: {message}")]
    State { message: String },

    /// Structural metadata is corrupt or ambiguous.
    #[error("invalid format: {message}")]
    Format { message: String },

    /// Failure raised by the signing engine or the confidentiality transform.
    #[error("cryptographic failure: {message}")]
    Crypto { message: String },

    /// Failure raised by the container or compound-file storage.
    #[error("storage failure: {message}")]
    Storage { message: String },

    /// The object was closed or its signature removed.
    #[error("object disposed: {object}")]
    Disposed { object: String },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PackageError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(uri: impl ToString) -> Self {
        Self::NotFound {
            uri: uri.to_string(),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn disposed(object: impl Into<String>) -> Self {
        Self::Disposed {
            object: object.into(),
        }
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::State { .. } => ErrorKind::State,
            Self::Format { .. } => ErrorKind::Format,
            Self::Crypto { .. } => ErrorKind::Crypto,
            Self::Storage { .. } | Self::Io(_) => ErrorKind::Storage,
            Self::Disposed { .. } => ErrorKind::State,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_state(&self) -> bool {
        self.kind() == ErrorKind::State
    }

    pub fn is_format(&self) -> bool {
        self.kind() == ErrorKind::Format
    }

    pub fn is_crypto(&self) -> bool {
        self.kind() == ErrorKind::Crypto
    }

    /// Disposed objects are a specific kind of state error.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }

    /// Exit code for CLI front ends.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::NotFound => 1,
            ErrorKind::State => 2,
            ErrorKind::Format => 3,
            ErrorKind::Crypto => 4,
            ErrorKind::Storage => 5,
        }
    }
}

impl From<serde_json::Error> for PackageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Format {
            message: err.to_string(),
        }
    }
}

/// Result type for package operations.
pub type PackResult<T> = Result<T, PackageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_and_exit_codes() {
        let err = PackageError::not_found("/a.xml");
        assert!(err.is_not_found());
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "part not found: /a.xml");

        let err = PackageError::from(std::io::Error::other("disk"));
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(err.exit_code(), 5);

        let disposed = PackageError::disposed("EncryptedPackageEnvelope");
        assert!(disposed.is_disposed());
        assert!(disposed.is_state());
        assert!(PackageError::state("read-only").is_state());
    }

    #[test]
    fn test_json_errors_are_format_errors() {
        let err: PackageError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(err.is_format());
    }
}
