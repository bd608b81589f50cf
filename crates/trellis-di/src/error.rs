use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("service not registered: {token}")]
    Unregistered { token: String },

    #[error("circular dependency detected while resolving {token}: {}", .chain.join(" -> "))]
    CircularDependency { token: String, chain: Vec<String> },

    #[error("service already registered: {token}")]
    Duplicate { token: String },

    #[error("service {token} is not a {expected}")]
    TypeMismatch {
        token: String,
        expected: &'static str,
    },

    /// Error raised by a provider, passed through untouched.
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

impl ContainerError {
    /// Recover a container fault that travelled through a provider as `anyhow::Error`.
    ///
    /// Nested `resolve` calls inside a provider surface as `anyhow` errors; the
    /// original fault (e.g. a circular dependency) is restored so callers can
    /// match on it.
    pub(crate) fn from_provider(err: anyhow::Error) -> Self {
        match err.downcast::<ContainerError>() {
            Ok(inner) => inner,
            Err(other) => ContainerError::Provider(other),
        }
    }

    /// The token this fault is about, when it names one.
    pub fn token(&self) -> Option<&str> {
        match self {
            ContainerError::Unregistered { token }
            | ContainerError::CircularDependency { token, .. }
            | ContainerError::Duplicate { token }
            | ContainerError::TypeMismatch { token, .. } => Some(token),
            ContainerError::Provider(_) => None,
        }
    }
}
