//! Locally verified bearer JWTs with claims mapping.

use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderName;
use http::request::Parts;
use passgate_api::{ClaimsConfig, UserPrincipal};
use tracing::{debug, trace};

use crate::Result;
use crate::claims::parse_jwt_token;
use crate::extract::header_token;
use crate::jwt::TokenVerifier;
use crate::principal::PrincipalGetter;
use crate::scope::RequestScope;

const JWT_HEADER: &str = "jwt-header";

/// Reads a JWT from a named header, verifies it, and maps its claims with the
/// configured [`ClaimsConfig`].
pub struct JwtHeaderPrincipalGetter {
    verifier: Arc<dyn TokenVerifier>,
    header: HeaderName,
    claims: ClaimsConfig,
}

impl JwtHeaderPrincipalGetter {
    pub fn new(verifier: Arc<dyn TokenVerifier>, header: HeaderName, claims: ClaimsConfig) -> Self {
        Self {
            verifier,
            header,
            claims,
        }
    }
}

#[async_trait]
impl PrincipalGetter for JwtHeaderPrincipalGetter {
    fn name(&self) -> &'static str {
        JWT_HEADER
    }

    async fn principal(
        &self,
        req: &Parts,
        scope: &RequestScope,
    ) -> Result<Option<UserPrincipal>> {
        let Some(token) = header_token(&req.headers, &self.header)? else {
            trace!(strategy = JWT_HEADER, header = %self.header, "no credential header");
            return Ok(None);
        };

        let principal = scope
            .guard(parse_jwt_token(self.verifier.as_ref(), token, Some(&self.claims)))
            .await??;
        debug!(
            strategy = JWT_HEADER,
            id = principal.id.as_deref().unwrap_or(""),
            groups = principal.groups.len(),
            "resolved principal from claims"
        );
        Ok(Some(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingVerifier, parts, sign, standard_claims};
    use crate::{Error, FailureKind};
    use http::header::AUTHORIZATION;
    use std::collections::BTreeSet;

    fn getter(claims: ClaimsConfig) -> (JwtHeaderPrincipalGetter, Arc<CountingVerifier>) {
        let verifier = Arc::new(CountingVerifier::new());
        (
            JwtHeaderPrincipalGetter::new(verifier.clone(), AUTHORIZATION, claims),
            verifier,
        )
    }

    #[tokio::test]
    async fn maps_configured_claims() {
        let (getter, _) = getter(ClaimsConfig {
            username: "email".to_string(),
            groups: "groups".to_string(),
        });
        let mut claims = standard_claims("u1", &["devs"]);
        claims["email"] = serde_json::json!("jo@example.com");
        let token = sign(&claims);
        let req = parts(&[("authorization", format!("Bearer {token}").as_str())]);

        let principal = getter
            .principal(&req, &RequestScope::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(principal.id.as_deref(), Some("jo@example.com"));
        assert_eq!(principal.groups, BTreeSet::from(["devs".to_string()]));
        assert_eq!(principal.token(), token);
    }

    #[tokio::test]
    async fn absent_header_skips_verification() {
        let (getter, verifier) = getter(ClaimsConfig::default());
        let got = getter
            .principal(&parts(&[]), &RequestScope::new())
            .await
            .unwrap();
        assert!(got.is_none());
        assert_eq!(verifier.calls(), 0);
    }

    #[tokio::test]
    async fn opaque_token_is_rejected_unwrapped() {
        let (getter, _) = getter(ClaimsConfig::default());
        let req = parts(&[("authorization", "Bearer abc123")]);
        let err = getter
            .principal(&req, &RequestScope::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidJwt(_)));
        assert_eq!(err.kind(), FailureKind::Rejected);
    }
}
