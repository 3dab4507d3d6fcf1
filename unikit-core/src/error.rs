use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UnikitError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{entity} not found: {query}")]
    NotFound { entity: EntityKind, query: String },

    #[error("{entity} '{query}' is ambiguous, matches: {}", matches.join(", "))]
    AmbiguousMatch {
        entity: EntityKind,
        query: String,
        matches: Vec<String>,
    },

    #[error("{entity} already exists: {name}")]
    AlreadyExists { entity: EntityKind, name: String },

    #[error("Conflict on {entity} {id}: {message}")]
    Conflict {
        entity: EntityKind,
        id: String,
        message: String,
    },

    #[error("{source_name} failed during {operation}: {cause}")]
    ExternalFailure {
        source_name: String,
        operation: String,
        cause: String,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, UnikitError>;

/// Coarse classification callers match on instead of the concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    AmbiguousMatch,
    AlreadyExists,
    Conflict,
    ExternalFailure,
    Timeout,
}

impl UnikitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UnikitError::InvalidInput(_) | UnikitError::ConfigError(_) => ErrorKind::InvalidInput,
            UnikitError::NotFound { .. } => ErrorKind::NotFound,
            UnikitError::AmbiguousMatch { .. } => ErrorKind::AmbiguousMatch,
            UnikitError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            UnikitError::Conflict { .. } => ErrorKind::Conflict,
            UnikitError::Timeout { .. } => ErrorKind::Timeout,
            UnikitError::ExternalFailure { .. }
            | UnikitError::IoError(_)
            | UnikitError::SerializationError(_)
            | UnikitError::Other(_) => ErrorKind::ExternalFailure,
        }
    }

    pub fn not_found(entity: EntityKind, query: impl Into<String>) -> Self {
        UnikitError::NotFound {
            entity,
            query: query.into(),
        }
    }

    pub fn already_exists(entity: EntityKind, name: impl Into<String>) -> Self {
        UnikitError::AlreadyExists {
            entity,
            name: name.into(),
        }
    }

    pub fn conflict(entity: EntityKind, id: impl Into<String>, message: impl Into<String>) -> Self {
        UnikitError::Conflict {
            entity,
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn external(
        source_name: impl Into<String>,
        operation: impl Into<String>,
        cause: impl std::fmt::Display,
    ) -> Self {
        UnikitError::ExternalFailure {
            source_name: source_name.into(),
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Image,
    Instance,
    Volume,
    Provider,
    Compiler,
    Artifact,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Image => write!(f, "Image"),
            EntityKind::Instance => write!(f, "Instance"),
            EntityKind::Volume => write!(f, "Volume"),
            EntityKind::Provider => write!(f, "Provider"),
            EntityKind::Compiler => write!(f, "Compiler"),
            EntityKind::Artifact => write!(f, "Artifact"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_external_failures() {
        let err: UnikitError = std::io::Error::other("disk on fire").into();
        assert_eq!(err.kind(), ErrorKind::ExternalFailure);
    }

    #[test]
    fn test_ambiguous_message_lists_matches() {
        let err = UnikitError::AmbiguousMatch {
            entity: EntityKind::Instance,
            query: "web-".to_string(),
            matches: vec!["web-1".to_string(), "web-2".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Instance 'web-' is ambiguous, matches: web-1, web-2"
        );
        assert_eq!(err.kind(), ErrorKind::AmbiguousMatch);
    }

    #[test]
    fn test_config_errors_are_invalid_input() {
        let err = UnikitError::ConfigError("bad yaml".to_string());
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
