//! Error types for the session core.
//!
//! Login and refresh failures surface through [`AuthError`]; individual API
//! calls surface through [`HttpError`]. Step-level variants of
//! [`AuthError`] never escape a login attempt on their own: the login
//! boundary wraps them in [`AuthError::AuthenticationFailed`] together with
//! the [`LoginStep`] that failed.

use std::fmt;

use crate::tokens::Authority;

/// The fallible steps of the interactive login, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    Discover,
    Authorize,
    SubmitEmail,
    SubmitPassword,
    FollowRedirects,
    ExchangeAuthCode,
    VerifyIdentity,
    ExchangeSecondaryToken,
    VerifySecondary,
}

impl fmt::Display for LoginStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "discover",
            Self::Authorize => "authorize",
            Self::SubmitEmail => "submit_email",
            Self::SubmitPassword => "submit_password",
            Self::FollowRedirects => "follow_redirects",
            Self::ExchangeAuthCode => "exchange_auth_code",
            Self::VerifyIdentity => "verify_identity",
            Self::ExchangeSecondaryToken => "exchange_secondary_token",
            Self::VerifySecondary => "verify_secondary",
        };
        f.write_str(name)
    }
}

/// Errors raised while establishing or renewing a session.
///
/// `Clone` so that callers waiting on an in-flight login receive the same
/// outcome as the caller that ran it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The identity provider configuration document was unreachable or
    /// incomplete.
    #[error("discovery failed: {reason}")]
    Discovery {
        /// What was wrong with the discovery document.
        reason: String,
    },

    /// An intermediate login page did not contain the expected form.
    #[error("could not parse form `{form}`: {reason}")]
    FormParse {
        /// The `id` attribute of the form we looked for.
        form: String,
        /// Why extraction failed.
        reason: String,
    },

    /// The redirect chain after the password step never reached the app
    /// redirect URI.
    #[error("redirect chain did not reach the app after {hops} hops")]
    RedirectLoop {
        /// Number of hops followed before giving up.
        hops: usize,
    },

    /// A token endpoint rejected the exchange.
    #[error("token exchange with {authority} failed: {reason}")]
    TokenExchange {
        /// The authority whose endpoint failed.
        authority: Authority,
        /// Status line or body returned by the server.
        reason: String,
    },

    /// A token's signature or audience did not verify. Only fatal in strict
    /// verification mode.
    #[error("{authority} token verification failed: {reason}")]
    VerificationFailed {
        /// The authority the token claims to come from.
        authority: Authority,
        /// Why verification failed.
        reason: String,
    },

    /// A login attempt failed. Terminal for that attempt.
    #[error("authentication failed at step {step}: {source}")]
    AuthenticationFailed {
        /// The step that failed.
        step: LoginStep,
        /// The step-level error.
        #[source]
        source: Box<AuthError>,
    },

    /// Refreshing the token sets failed; the caller should fall back to a
    /// full interactive login.
    #[error("token refresh failed: {reason}")]
    RefreshFailed {
        /// Why the refresh failed.
        reason: String,
    },

    /// A token could not be decoded.
    #[error("invalid token: {reason}")]
    InvalidToken {
        /// Decoding failure detail.
        reason: String,
    },

    /// A token required for the current operation is not held.
    #[error("no {authority} token available")]
    MissingToken {
        /// The authority whose token is missing.
        authority: Authority,
    },

    /// Configuration is missing or malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The service answered in a way the login flow cannot continue from.
    #[error("unexpected response: {reason}")]
    UnexpectedResponse {
        /// What was expected and what arrived instead.
        reason: String,
    },

    /// Transport-level HTTP failure.
    #[error("network error: {reason}")]
    Network {
        /// Underlying transport failure.
        reason: String,
    },

    /// JSON serialization or deserialization error.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Underlying serde failure.
        reason: String,
    },

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl AuthError {
    /// Wrap a step-level error as a failed login attempt.
    ///
    /// An error that is already [`AuthError::AuthenticationFailed`] is
    /// returned unchanged.
    pub fn at_step(self, step: LoginStep) -> Self {
        match self {
            already @ Self::AuthenticationFailed { .. } => already,
            other => Self::AuthenticationFailed {
                step,
                source: Box::new(other),
            },
        }
    }

    /// The step that failed, if this is a failed login attempt.
    pub fn failed_step(&self) -> Option<LoginStep> {
        match self {
            Self::AuthenticationFailed { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// The innermost step-level error.
    pub fn step_error(&self) -> &AuthError {
        match self {
            Self::AuthenticationFailed { source, .. } => source.step_error(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Errors returned by individual authenticated requests.
///
/// None of these are fatal to the session except [`HttpError::Unauthorized`],
/// which also marks the session expired.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The service answered 401.
    #[error("unauthorized")]
    Unauthorized,

    /// The service answered with a non-success status.
    #[error("HTTP {status}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// Value of the `X-RateLimit-Remaining` header, if present.
        rate_limit_remaining: Option<String>,
    },

    /// No response arrived within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The request could not be sent or the response not read.
    #[error("transport error: {reason}")]
    Transport {
        /// Underlying transport failure.
        reason: String,
    },

    /// The response body was not the JSON we expected.
    #[error("could not decode response: {reason}")]
    Decode {
        /// Decoding failure detail.
        reason: String,
    },

    /// The request path could not be resolved to a URL.
    #[error("invalid request url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// No usable session; carries the login or refresh failure.
    #[error("session unavailable: {0}")]
    Session(#[from] AuthError),
}

impl HttpError {
    /// The HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode {
                reason: err.to_string(),
            }
        } else {
            Self::Transport {
                reason: err.to_string(),
            }
        }
    }
}

/// Convenience alias for session operations.
pub type Result<T> = std::result::Result<T, AuthError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
