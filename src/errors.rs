//! Typed error hierarchy for the TFS relay.
//!
//! A single `TfsError` enum covers three failure classes:
//! - configuration: the project or build definition cannot be resolved
//! - transport: a remote call failed (network, auth, non-2xx status)
//! - shape: the remote service returned an object without a field we rely on

use thiserror::Error;

/// Errors raised while talking to the remote build service.
#[derive(Debug, Error)]
pub enum TfsError {
    #[error("Could not find the project: {project}")]
    ProjectNotFound { project: String },

    #[error("Could not find the buildDefinition: {definition}")]
    DefinitionNotFound { definition: i32 },

    #[error("Remote {object} is missing required field '{field}'")]
    MissingField {
        object: &'static str,
        field: &'static str,
    },

    #[error("{method} {url} returned {status}: {body}")]
    Http {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TfsError {
    /// True when the remote service answered 404 for the requested object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TfsError::Http { status: 404, .. })
    }

    /// True for errors caused by the configured identifiers rather than the transport.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TfsError::ProjectNotFound { .. }
                | TfsError::DefinitionNotFound { .. }
                | TfsError::InvalidUrl(_)
                | TfsError::Config(_)
        )
    }
}

pub type TfsResult<T> = std::result::Result<T, TfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_not_found_carries_name() {
        let err = TfsError::ProjectNotFound {
            project: "Fabrikam".to_string(),
        };
        match &err {
            TfsError::ProjectNotFound { project } => assert_eq!(project, "Fabrikam"),
            _ => panic!("Expected ProjectNotFound"),
        }
        assert!(err.to_string().contains("Fabrikam"));
        assert!(err.is_configuration());
    }

    #[test]
    fn definition_not_found_carries_id() {
        let err = TfsError::DefinitionNotFound { definition: 42 };
        assert!(err.to_string().contains("42"));
        assert!(err.is_configuration());
    }

    #[test]
    fn http_404_is_not_found() {
        let err = TfsError::Http {
            method: "GET".into(),
            url: "http://tfs/_apis/build/builds/7".into(),
            status: 404,
            body: String::new(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_configuration());
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn http_500_is_not_not_found() {
        let err = TfsError::Http {
            method: "PATCH".into(),
            url: "http://tfs".into(),
            status: 500,
            body: "boom".into(),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn converts_from_anyhow() {
        let err: TfsError = anyhow::anyhow!("wrapped").into();
        assert!(matches!(err, TfsError::Other(_)));
        assert_eq!(err.to_string(), "wrapped");
    }

    #[test]
    fn implements_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&TfsError::Config("x".into()));
    }
}
