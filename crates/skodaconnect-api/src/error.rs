//! Data-fetch error types.

use skodaconnect_auth::{AuthError, HttpError};

/// Why a vehicle data call produced no data.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// No usable session could be established.
    #[error("session unavailable: {0}")]
    Session(#[from] AuthError),

    /// The call itself failed.
    #[error("request failed: {0}")]
    Http(#[from] HttpError),

    /// The response lacked the field the operation unwraps.
    #[error("response has no `{field}`")]
    Missing { field: String },
}

impl FetchError {
    pub(crate) fn missing(field: &str) -> Self {
        Self::Missing {
            field: field.to_string(),
        }
    }

    /// HTTP status of a failed call, if the service answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(e) => e.status(),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the data-fetch crate.
pub type Result<T> = std::result::Result<T, FetchError>;
