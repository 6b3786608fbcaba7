use thiserror::Error;

/// Closed error set of the engine. Parser failures are aggregated into the
/// ingest report; query errors surface directly to the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument `{field}`: {message}")]
    InvalidArgument { field: String, message: String },

    #[error("no parser registered for {path}")]
    UnsupportedFormat { path: String },

    #[error("malformed input {path}: {message}")]
    MalformedInput { path: String, message: String },

    #[error("no node matches entity `{name}`")]
    UnknownEntity { name: String },

    #[error("traversal visited {visited} nodes, cap is {cap}")]
    LimitExceeded { visited: usize, cap: usize },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Two commits raced for the same document. Never surfaces to callers:
    /// the committer serializes through the writer lock.
    #[error("conflicting commit for document {document_id}")]
    Conflict { document_id: String },

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid_argument(field: &str, message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn malformed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::MalformedInput {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable tag used in reports and tool responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument { .. } => "invalid_argument",
            Error::UnsupportedFormat { .. } => "unsupported_format",
            Error::MalformedInput { .. } => "malformed_input",
            Error::UnknownEntity { .. } => "unknown_entity",
            Error::LimitExceeded { .. } => "limit_exceeded",
            Error::Cancelled => "cancelled",
            Error::DeadlineExceeded => "deadline_exceeded",
            Error::Conflict { .. } => "conflict",
            Error::Internal(_) => "internal",
        }
    }

    /// Process exit code for the CLI surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidArgument { .. } => 2,
            Error::UnknownEntity { .. } => 3,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(
            Error::invalid_argument("direction", "bad").kind(),
            "invalid_argument"
        );
        assert_eq!(
            Error::UnknownEntity {
                name: "X".to_string()
            }
            .kind(),
            "unknown_entity"
        );
        assert_eq!(Error::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn exit_codes() {
        assert_eq!(Error::invalid_argument("k", "negative").exit_code(), 2);
        assert_eq!(
            Error::UnknownEntity {
                name: "X".to_string()
            }
            .exit_code(),
            3
        );
        assert_eq!(Error::Internal("bad".to_string()).exit_code(), 1);
    }
}
