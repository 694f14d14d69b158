//! Error types for shelf-core.

use miette::Diagnostic;
use thiserror::Error;

/// Registry failure kinds, each mapped to the protocol status the server
/// reports for it.
#[derive(Error, Diagnostic, Debug)]
pub enum RegistryError {
    #[error("{0}")]
    #[diagnostic(code(shelf::bad_request))]
    BadRequest(String),

    #[error("{0}")]
    #[diagnostic(
        code(shelf::forbidden),
        help("Only references with the 'github' account marker are served")
    )]
    Forbidden(String),

    #[error("{0}")]
    #[diagnostic(code(shelf::not_found))]
    NotFound(String),

    #[error("{0}")]
    #[diagnostic(
        code(shelf::conflict),
        help("The metadata changed underneath this request; retry it")
    )]
    Conflict(String),

    #[error("{0}")]
    #[diagnostic(
        code(shelf::bad_gateway),
        help("The backing repository is unreachable or in an unexpected state")
    )]
    BadGateway(String),

    /// A failed asset upload, carrying the platform's own status and error
    /// body through to the client.
    #[error("upload failed with HTTP {status}: {message}")]
    #[diagnostic(code(shelf::upstream))]
    Upstream { status: u16, message: String },
}

impl RegistryError {
    /// The protocol status this error surfaces as.
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::BadGateway(_) => 502,
            Self::Upstream { status, .. } => *status,
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(RegistryError::BadRequest("x".into()).status(), 400);
        assert_eq!(RegistryError::Forbidden("x".into()).status(), 403);
        assert_eq!(RegistryError::NotFound("x".into()).status(), 404);
        assert_eq!(RegistryError::Conflict("x".into()).status(), 409);
        assert_eq!(RegistryError::BadGateway("x".into()).status(), 502);
        let err = RegistryError::Upstream {
            status: 413,
            message: "too large".into(),
        };
        assert_eq!(err.status(), 413);
    }

    #[test]
    fn test_upstream_message() {
        let err = RegistryError::Upstream {
            status: 422,
            message: "Validation Failed".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("422"));
        assert!(msg.contains("Validation Failed"));
    }
}
