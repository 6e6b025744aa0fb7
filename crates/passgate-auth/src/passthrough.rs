//! Strategies that relay the caller's credential onward.
//!
//! The bearer strategy proves authenticity with a remote token review and never looks
//! inside the token, so it also works for opaque tokens. The cookie strategy has no
//! remote check behind it and verifies the signature locally instead.

use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderName;
use http::request::Parts;
use passgate_api::{TokenReviewer, UserPrincipal};
use tracing::{debug, trace};

use crate::claims::parse_jwt_token;
use crate::cookie::request_cookie;
use crate::extract::header_token;
use crate::jwt::TokenVerifier;
use crate::principal::PrincipalGetter;
use crate::scope::RequestScope;
use crate::{Error, Result};

const BEARER_PASSTHROUGH: &str = "bearer-passthrough";
const JWT_COOKIE_PASSTHROUGH: &str = "jwt-cookie-passthrough";

/// Reads a bearer token from a named header and asks the review backend whether it
/// is valid.
///
/// The principal carries the token only; no id or group information is available.
pub struct BearerTokenPassthroughPrincipalGetter {
    reviewer: Arc<dyn TokenReviewer>,
    header: HeaderName,
}

impl BearerTokenPassthroughPrincipalGetter {
    pub fn new(reviewer: Arc<dyn TokenReviewer>, header: HeaderName) -> Self {
        Self { reviewer, header }
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }
}

#[async_trait]
impl PrincipalGetter for BearerTokenPassthroughPrincipalGetter {
    fn name(&self) -> &'static str {
        BEARER_PASSTHROUGH
    }

    async fn principal(
        &self,
        req: &Parts,
        scope: &RequestScope,
    ) -> Result<Option<UserPrincipal>> {
        let Some(token) = header_token(&req.headers, &self.header)? else {
            trace!(strategy = BEARER_PASSTHROUGH, header = %self.header, "no credential header");
            return Ok(None);
        };

        debug!(
            strategy = BEARER_PASSTHROUGH,
            reviewer = self.reviewer.id(),
            "submitting token for review"
        );
        let status = scope
            .guard(self.reviewer.review(token))
            .await?
            .map_err(|source| Error::Review {
                strategy: BEARER_PASSTHROUGH,
                source,
            })?;

        if !status.authenticated {
            debug!(
                strategy = BEARER_PASSTHROUGH,
                reason = status.error.as_deref().unwrap_or("none given"),
                "token review refused credential"
            );
            return Err(Error::NotAuthenticated {
                strategy: BEARER_PASSTHROUGH,
            });
        }

        Ok(Some(UserPrincipal::new(token)))
    }
}

/// Reads a signed token from a named cookie, verifies it, and returns the principal
/// with the cookie value attached verbatim.
pub struct JwtPassthroughCookiePrincipalGetter {
    verifier: Arc<dyn TokenVerifier>,
    cookie: String,
}

impl JwtPassthroughCookiePrincipalGetter {
    pub fn new(verifier: Arc<dyn TokenVerifier>, cookie: impl Into<String>) -> Self {
        Self {
            verifier,
            cookie: cookie.into(),
        }
    }

    pub fn cookie(&self) -> &str {
        &self.cookie
    }
}

#[async_trait]
impl PrincipalGetter for JwtPassthroughCookiePrincipalGetter {
    fn name(&self) -> &'static str {
        JWT_COOKIE_PASSTHROUGH
    }

    async fn principal(
        &self,
        req: &Parts,
        scope: &RequestScope,
    ) -> Result<Option<UserPrincipal>> {
        let Some(raw) = request_cookie(&req.headers, &self.cookie) else {
            trace!(strategy = JWT_COOKIE_PASSTHROUGH, cookie = %self.cookie, "no credential cookie");
            return Ok(None);
        };

        // No claims mapping: the token is relayed, its claims do not authorize anything here.
        let mut principal = scope
            .guard(parse_jwt_token(self.verifier.as_ref(), raw, None))
            .await?
            .map_err(|e| Error::Passthrough(Box::new(e)))?;

        debug!(strategy = JWT_COOKIE_PASSTHROUGH, "passing through token");
        principal.set_token(raw);

        Ok(Some(principal))
    }
}
