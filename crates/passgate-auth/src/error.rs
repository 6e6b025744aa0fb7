//! Error types.

use passgate_api::PassgateError;
use thiserror::Error;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// How a caller should treat a failed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A credential was presented and refused. Respond 401.
    Rejected,
    /// Identity could not be determined because a trust backend failed or the
    /// request ran out of time. Respond 5xx; retrying may help.
    Unavailable,
    /// The inbound request was canceled while resolution was in flight.
    Cancelled,
}

/// Errors returned by this crate.
///
/// Messages never contain the credential itself.
#[derive(Debug, Error)]
pub enum Error {
    /// JWT is malformed or missing required fields.
    #[error("invalid JWT: {0}")]
    InvalidJwt(String),

    /// Algorithm is not in the allow-list.
    #[error("unsupported JWT algorithm: {0:?}")]
    UnsupportedAlg(jsonwebtoken::Algorithm),

    /// Unable to fetch, parse, or use a JWKS.
    #[error("JWKS error: {0}")]
    Jwks(String),

    /// The JWKS does not contain a usable key for the token.
    #[error("no suitable key found in JWKS")]
    NoMatchingKey,

    /// Token claims failed validation.
    #[error("token validation failed: {0}")]
    Validation(String),

    /// The credential header was present but unusable.
    #[error("malformed credential in header {header}: {reason}")]
    MalformedHeader {
        /// Header that carried the credential.
        header: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// The review backend answered and refused the token.
    #[error("{strategy}: user token authentication failed")]
    NotAuthenticated {
        /// Strategy that asked for the review.
        strategy: &'static str,
    },

    /// The review backend could not be reached or failed internally.
    #[error("{strategy}: token review failed: {source}")]
    Review {
        /// Strategy that asked for the review.
        strategy: &'static str,
        /// Backend failure.
        #[source]
        source: PassgateError,
    },

    /// Claims parsing failed inside a passthrough strategy.
    #[error("failed to parse for passthrough: {0}")]
    Passthrough(#[source] Box<Error>),

    /// The inbound request was canceled.
    #[error("request cancelled during principal resolution")]
    Cancelled,

    /// The inbound request deadline elapsed.
    #[error("request deadline exceeded during principal resolution")]
    DeadlineExceeded,

    /// An error occurred while performing HTTP requests.
    #[cfg(feature = "fetch-reqwest")]
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// jsonwebtoken error.
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl Error {
    /// Classify the failure for response mapping.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::InvalidJwt(_)
            | Error::UnsupportedAlg(_)
            | Error::NoMatchingKey
            | Error::Validation(_)
            | Error::MalformedHeader { .. }
            | Error::NotAuthenticated { .. } => FailureKind::Rejected,
            Error::Passthrough(inner) => inner.kind(),
            Error::Cancelled => FailureKind::Cancelled,
            Error::Jwks(_)
            | Error::Review { .. }
            | Error::DeadlineExceeded
            | Error::Json(_)
            | Error::Jwt(_) => FailureKind::Unavailable,
            #[cfg(feature = "fetch-reqwest")]
            Error::Reqwest(_) => FailureKind::Unavailable,
        }
    }

    /// True when the credential itself was refused.
    pub fn is_rejected(&self) -> bool {
        self.kind() == FailureKind::Rejected
    }
}
