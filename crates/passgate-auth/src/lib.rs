//! passgate-auth
//!
//! Resolves the authenticated principal of an HTTP request. Each credential transport
//! is a [`PrincipalGetter`] strategy:
//!
//! - **Bearer passthrough**: token from a header, authenticity decided by a remote
//!   [`TokenReviewer`](passgate_api::TokenReviewer); no claims are read.
//! - **JWT cookie passthrough**: signed token from a cookie, verified locally by a
//!   [`TokenVerifier`]; `sub`/`groups` become the principal's id and groups.
//! - **JWT header**: signed token from a header, verified locally and mapped with a
//!   [`ClaimsConfig`](passgate_api::ClaimsConfig).
//!
//! A getter answers `Ok(None)` when its transport carries no credential, so callers can
//! chain them. Failures are classified by [`Error::kind`]: a refused credential, an
//! unavailable backend, or a canceled request.
//!
//! ## Quick start
//! ```no_run
//! use std::sync::Arc;
//! use http::header::AUTHORIZATION;
//! use passgate_auth::{
//!     JwtPassthroughCookiePrincipalGetter, JwtVerifier, PrincipalGetter, RequestScope,
//!     VerifyOptions,
//! };
//!
//! # async fn demo(req: http::request::Parts) -> Result<(), Box<dyn std::error::Error>> {
//! let verifier = JwtVerifier::discover("https://issuer.example/", VerifyOptions::default()).await?;
//! let getter = JwtPassthroughCookiePrincipalGetter::new(Arc::new(verifier), "id_token");
//!
//! if let Some(principal) = getter.principal(&req, &RequestScope::new()).await? {
//!     println!("id={:?} groups={:?}", principal.id, principal.groups);
//! }
//! # Ok(()) }
//! ```

#![forbid(unsafe_code)]

mod claims;
mod cookie;
mod error;
mod extract;
mod header_jwt;
mod jwt;
mod passthrough;
mod principal;
mod scope;
#[cfg(test)]
mod testing;

pub use claims::{parse_jwt_token, principal_from_claims};
pub use cookie::request_cookie;
pub use error::{Error, FailureKind, Result};
pub use extract::{extract_token, header_token};
pub use header_jwt::JwtHeaderPrincipalGetter;
pub use jwt::{
    Jwk, JwksSet, JwksSource, JwtVerifier, TokenVerifier, VerifiedJwt, VerifyOptions,
    resolve_oidc_jwks_url,
};
pub use passthrough::{BearerTokenPassthroughPrincipalGetter, JwtPassthroughCookiePrincipalGetter};
pub use principal::PrincipalGetter;
pub use scope::RequestScope;
