use thiserror::Error;

/// Failure of an operation keyed by a blob identifier.
#[derive(Debug, Error)]
pub enum IdentifierError {
    /// The string is not a form the backend accepts as an identifier.
    #[error("ill-formed identifier {0:?}")]
    IllFormed(String),
    /// Well-formed identifier with no blob stored under it.
    #[error("no blob stored under identifier {0}")]
    NotFound(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl IdentifierError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_ill_formed(&self) -> bool {
        matches!(self, Self::IllFormed(_))
    }
}

impl From<std::io::Error> for IdentifierError {
    fn from(err: std::io::Error) -> Self {
        Self::Backend(err.into())
    }
}
