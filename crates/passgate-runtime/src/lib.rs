use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderName;
use http::request::Parts;
use jsonwebtoken::Algorithm;
use passgate_api::{PassgateError, ReviewerFactory, SecretStore, TokenReviewer, UserPrincipal};
use passgate_auth::{
    BearerTokenPassthroughPrincipalGetter, JwksSource, JwtHeaderPrincipalGetter,
    JwtPassthroughCookiePrincipalGetter, JwtVerifier, PrincipalGetter, RequestScope,
    TokenVerifier, VerifyOptions,
};
use passgate_connectors::{DefaultReviewerFactory, EnvSecretStore};
use passgate_core::{GetterKind, OidcSettings, PassgateConfig, validate_config};
use tracing::{debug, info, trace};

const CHAIN: &str = "chain";

/// Ordered list of strategies; the first one that finds a credential decides.
///
/// A getter error ends the walk. A credential that was presented and refused is never
/// retried under another transport.
#[derive(Default)]
pub struct PrincipalChain {
    getters: Vec<Arc<dyn PrincipalGetter>>,
}

impl PrincipalChain {
    pub fn new(getters: Vec<Arc<dyn PrincipalGetter>>) -> Self {
        Self { getters }
    }

    pub fn push(&mut self, getter: Arc<dyn PrincipalGetter>) {
        self.getters.push(getter);
    }

    pub fn len(&self) -> usize {
        self.getters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.getters.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.getters.iter().map(|g| g.name()).collect()
    }

    /// Build the chain described by `cfg`, with review credentials read from the
    /// environment.
    pub async fn from_config(cfg: &PassgateConfig) -> Result<Self, PassgateError> {
        Self::from_config_with_factory(cfg, &DefaultReviewerFactory, &EnvSecretStore).await
    }

    pub async fn from_config_with_factory(
        cfg: &PassgateConfig,
        factory: &dyn ReviewerFactory,
        secrets: &dyn SecretStore,
    ) -> Result<Self, PassgateError> {
        validate_config(cfg)?;

        let needs_review = cfg.getters.iter().any(|g| g.kind == GetterKind::Bearer);
        let needs_verifier = cfg.getters.iter().any(|g| g.kind != GetterKind::Bearer);

        let reviewer: Option<Arc<dyn TokenReviewer>> = match (&cfg.review, needs_review) {
            (Some(review), true) => Some(factory.build(review, secrets)?),
            _ => None,
        };
        let verifier: Option<Arc<dyn TokenVerifier>> = match (&cfg.oidc, needs_verifier) {
            (Some(oidc), true) => Some(Arc::new(build_verifier(oidc).await?)),
            _ => None,
        };

        let mut chain = Self::default();
        for entry in &cfg.getters {
            let getter: Arc<dyn PrincipalGetter> = match entry.kind {
                GetterKind::Bearer => {
                    let reviewer = reviewer.clone().ok_or_else(|| {
                        PassgateError::Validation("bearer getter requires a [review] section".to_string())
                    })?;
                    Arc::new(BearerTokenPassthroughPrincipalGetter::new(
                        reviewer,
                        header_name(entry.header_name())?,
                    ))
                }
                GetterKind::JwtCookie => Arc::new(JwtPassthroughCookiePrincipalGetter::new(
                    require_verifier(verifier.as_ref())?,
                    entry.cookie_name(),
                )),
                GetterKind::JwtHeader => Arc::new(JwtHeaderPrincipalGetter::new(
                    require_verifier(verifier.as_ref())?,
                    header_name(entry.header_name())?,
                    cfg.claims.clone().unwrap_or_default(),
                )),
            };
            info!(kind = entry.kind.as_str(), transport = entry.transport(), "registered getter");
            chain.push(getter);
        }
        Ok(chain)
    }
}

#[async_trait]
impl PrincipalGetter for PrincipalChain {
    fn name(&self) -> &'static str {
        CHAIN
    }

    async fn principal(
        &self,
        req: &Parts,
        scope: &RequestScope,
    ) -> passgate_auth::Result<Option<UserPrincipal>> {
        for getter in &self.getters {
            match getter.principal(req, scope).await {
                Ok(Some(principal)) => {
                    debug!(strategy = getter.name(), "principal resolved");
                    return Ok(Some(principal));
                }
                Ok(None) => trace!(strategy = getter.name(), "no credential, trying next"),
                Err(e) => {
                    debug!(strategy = getter.name(), kind = ?e.kind(), error = %e, "getter failed");
                    return Err(e);
                }
            }
        }
        trace!(strategy = CHAIN, "no getter found a credential");
        Ok(None)
    }
}

pub fn verify_options(oidc: &OidcSettings) -> Result<VerifyOptions, PassgateError> {
    let allowed_algs = oidc
        .allowed_algs
        .iter()
        .map(|alg| {
            Algorithm::from_str(alg)
                .map_err(|_| PassgateError::Validation(format!("unknown JWT algorithm {alg}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(VerifyOptions {
        issuer: Some(oidc.issuer.clone()),
        audience: oidc.audience.clone(),
        allowed_algs,
        leeway_seconds: oidc.leeway_seconds,
        max_jwks_age_seconds: oidc.max_jwks_age_seconds,
        require_kid: oidc.require_kid,
    })
}

async fn build_verifier(oidc: &OidcSettings) -> Result<JwtVerifier, PassgateError> {
    let opts = verify_options(oidc)?;
    match &oidc.jwks_url {
        Some(url) => Ok(JwtVerifier::new(JwksSource::Url(url.clone()), opts)),
        None => {
            debug!(issuer = %oidc.issuer, "discovering JWKS endpoint");
            JwtVerifier::discover(&oidc.issuer, opts).await.map_err(|e| {
                PassgateError::Connection(format!("OIDC discovery for {} failed: {e}", oidc.issuer))
            })
        }
    }
}

fn require_verifier(
    verifier: Option<&Arc<dyn TokenVerifier>>,
) -> Result<Arc<dyn TokenVerifier>, PassgateError> {
    verifier
        .cloned()
        .ok_or_else(|| PassgateError::Validation("JWT getters require an [oidc] section".to_string()))
}

fn header_name(name: &str) -> Result<HeaderName, PassgateError> {
    HeaderName::from_str(name)
        .map_err(|_| PassgateError::Validation(format!("invalid header name {name:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use passgate_api::{ReviewBackendConfig, ReviewStatus};
    use passgate_auth::{Error, FailureKind};
    use passgate_core::{GetterSpec, demo_config};
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Outcome {
        Found(&'static str),
        Absent,
        Refused,
    }

    struct FixedGetter {
        outcome: Outcome,
        calls: AtomicUsize,
    }

    impl FixedGetter {
        fn new(outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PrincipalGetter for FixedGetter {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn principal(
            &self,
            _req: &Parts,
            _scope: &RequestScope,
        ) -> passgate_auth::Result<Option<UserPrincipal>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::Found(token) => Ok(Some(UserPrincipal::new(token))),
                Outcome::Absent => Ok(None),
                Outcome::Refused => Err(Error::NotAuthenticated { strategy: "fixed" }),
            }
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl TokenReviewer for AcceptAll {
        fn id(&self) -> &str {
            "accept-all"
        }

        async fn review(&self, _token: &str) -> Result<ReviewStatus, PassgateError> {
            Ok(ReviewStatus {
                authenticated: true,
                ..Default::default()
            })
        }
    }

    struct StaticFactory {
        builds: AtomicUsize,
    }

    impl ReviewerFactory for StaticFactory {
        fn build(
            &self,
            _cfg: &ReviewBackendConfig,
            _secrets: &dyn SecretStore,
        ) -> Result<Arc<dyn TokenReviewer>, PassgateError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(AcceptAll))
        }
    }

    struct NoSecrets;

    impl SecretStore for NoSecrets {
        fn get(&self, secret_ref: &str) -> Result<String, PassgateError> {
            Err(PassgateError::NotFound(secret_ref.to_string()))
        }
    }

    fn factory() -> StaticFactory {
        StaticFactory {
            builds: AtomicUsize::new(0),
        }
    }

    fn request(headers: &[(&str, &str)]) -> Parts {
        let mut builder = http::Request::builder().uri("https://app.passgate.test/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn offline_config() -> PassgateConfig {
        let mut cfg = demo_config();
        if let Some(oidc) = cfg.oidc.as_mut() {
            oidc.jwks_url = Some("https://issuer.example.com/jwks.json".to_string());
        }
        cfg
    }

    #[tokio::test]
    async fn first_found_principal_wins() {
        let absent = FixedGetter::new(Outcome::Absent);
        let found = FixedGetter::new(Outcome::Found("t1"));
        let later = FixedGetter::new(Outcome::Found("t2"));
        let getters: Vec<Arc<dyn PrincipalGetter>> = vec![absent.clone(), found, later.clone()];
        let chain = PrincipalChain::new(getters);

        let principal = chain
            .principal(&request(&[]), &RequestScope::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(principal.token(), "t1");
        assert_eq!(absent.calls(), 1);
        assert_eq!(later.calls(), 0);
    }

    #[tokio::test]
    async fn error_stops_the_chain() {
        let refused = FixedGetter::new(Outcome::Refused);
        let later = FixedGetter::new(Outcome::Found("t2"));
        let getters: Vec<Arc<dyn PrincipalGetter>> = vec![refused, later.clone()];
        let chain = PrincipalChain::new(getters);

        let err = chain
            .principal(&request(&[]), &RequestScope::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Rejected);
        assert_eq!(later.calls(), 0);
    }

    #[tokio::test]
    async fn nothing_found_is_absent() {
        let getters: Vec<Arc<dyn PrincipalGetter>> = vec![
            FixedGetter::new(Outcome::Absent),
            FixedGetter::new(Outcome::Absent),
        ];
        let chain = PrincipalChain::new(getters);
        let got = chain
            .principal(&request(&[]), &RequestScope::new())
            .await
            .unwrap();
        assert!(got.is_none());
        assert!(PrincipalChain::default().is_empty());
    }

    #[tokio::test]
    async fn builds_getters_in_configured_order() {
        let factory = factory();
        let chain = PrincipalChain::from_config_with_factory(&offline_config(), &factory, &NoSecrets)
            .await
            .unwrap();
        assert_eq!(chain.names(), vec!["bearer-passthrough", "jwt-cookie-passthrough"]);
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn configured_chain_resolves_bearer() {
        let chain =
            PrincipalChain::from_config_with_factory(&offline_config(), &factory(), &NoSecrets)
                .await
                .unwrap();
        let principal = chain
            .principal(
                &request(&[("authorization", "Bearer abc123")]),
                &RequestScope::new(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(principal.token(), "abc123");
        assert!(!principal.has_claims());
    }

    #[tokio::test]
    async fn review_backend_is_not_built_without_bearer_getter() {
        let mut cfg = offline_config();
        cfg.getters = vec![GetterSpec {
            kind: GetterKind::JwtHeader,
            header: Some("X-Id-Token".to_string()),
            cookie: None,
        }];
        let factory = factory();
        let chain = PrincipalChain::from_config_with_factory(&cfg, &factory, &NoSecrets)
            .await
            .unwrap();
        assert_eq!(chain.names(), vec!["jwt-header"]);
        assert_eq!(factory.builds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_header_name_is_rejected() {
        let mut cfg = offline_config();
        cfg.getters[0].header = Some("bad header".to_string());
        let err = PrincipalChain::from_config_with_factory(&cfg, &factory(), &NoSecrets)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PassgateError::Validation(_)));
    }

    #[test]
    fn verify_options_parse_algorithms() {
        let cfg = offline_config();
        let oidc = cfg.oidc.unwrap();
        let opts = verify_options(&oidc).unwrap();
        assert_eq!(
            opts.allowed_algs,
            vec![Algorithm::RS256, Algorithm::ES256, Algorithm::EdDSA]
        );
        assert_eq!(opts.issuer.as_deref(), Some("https://issuer.example.com"));
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let mut oidc = offline_config().oidc.unwrap();
        oidc.allowed_algs = vec!["none".to_string()];
        assert!(verify_options(&oidc).is_err());
    }
}
