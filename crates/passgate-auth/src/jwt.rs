//! JWT verification using JWKS.

use crate::{Error, Result};

use async_trait::async_trait;
use tracing::debug;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
#[cfg(feature = "cache")]
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(feature = "cache")]
use dashmap::DashMap;
#[cfg(feature = "cache")]
use once_cell::sync::Lazy;

/// A JWKS (JSON Web Key Set).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JwksSet {
    /// Keys.
    pub keys: Vec<Jwk>,
}

/// Minimal JWK structure for RSA/EC/OKP.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Jwk {
    /// Key type ("RSA", "EC", "OKP").
    pub kty: String,

    /// Key id.
    pub kid: Option<String>,

    /// Public key use.
    #[serde(rename = "use")]
    pub use_: Option<String>,

    /// Algorithm (optional).
    pub alg: Option<String>,

    // RSA
    /// RSA modulus.
    pub n: Option<String>,
    /// RSA exponent.
    pub e: Option<String>,

    // EC / OKP
    /// Curve name.
    pub crv: Option<String>,
    /// EC x coordinate, or the Ed25519 public key.
    pub x: Option<String>,
    /// EC y coordinate.
    pub y: Option<String>,
}

/// Source of JWKS data.
#[derive(Debug, Clone)]
pub enum JwksSource {
    /// Fetch from this URL.
    Url(String),
    /// Parse this JSON string.
    Json(String),
    /// Use this parsed key set.
    Set(JwksSet),
}

/// Options for token verification.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Expected issuer (`iss`).
    pub issuer: Option<String>,

    /// Expected audience (`aud`).
    pub audience: Option<String>,

    /// Allowed algorithms.
    pub allowed_algs: Vec<Algorithm>,

    /// Clock skew/leeway in seconds.
    pub leeway_seconds: u64,

    /// Max cache age for JWKS (seconds). Only used when the `cache` feature is enabled.
    pub max_jwks_age_seconds: u64,

    /// If true, reject tokens without a `kid` header.
    pub require_kid: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            allowed_algs: vec![Algorithm::RS256, Algorithm::ES256, Algorithm::EdDSA],
            leeway_seconds: 60,
            max_jwks_age_seconds: 300,
            require_kid: false,
        }
    }
}

/// A verified JWT (header + claims).
#[derive(Debug, Clone)]
pub struct VerifiedJwt {
    /// The parsed header.
    pub header: Header,
    /// The decoded claims as JSON.
    pub claims: Value,
}

impl VerifiedJwt {
    /// Get a claim by key.
    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.claims.get(key)
    }

    /// Get a string claim by key.
    pub fn claim_str(&self, key: &str) -> Option<&str> {
        self.claim(key).and_then(|v| v.as_str())
    }

    /// Read a claim holding either a list of strings or a single string.
    ///
    /// Non-string list entries are skipped.
    pub fn claim_set(&self, key: &str) -> BTreeSet<String> {
        match self.claim(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) if !s.is_empty() => BTreeSet::from([s.clone()]),
            _ => BTreeSet::new(),
        }
    }

    /// Convenience accessor for `sub`.
    pub fn sub(&self) -> Option<&str> {
        self.claim_str("sub")
    }

    /// Convenience accessor for `iss`.
    pub fn iss(&self) -> Option<&str> {
        self.claim_str("iss")
    }

    /// Convenience accessor for `aud`.
    pub fn aud(&self) -> Option<&Value> {
        self.claim("aud")
    }

    /// Convenience accessor for `exp`.
    pub fn exp(&self) -> Option<i64> {
        self.claim("exp").and_then(Value::as_i64)
    }
}

/// Signature-verification engine: token in, validated claims out.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify `token` and return its claims.
    async fn verify(&self, token: &str) -> Result<VerifiedJwt>;
}

#[cfg(feature = "cache")]
#[derive(Debug, Clone)]
struct CachedJwks {
    exp_at_ms: u128,
    jwks: JwksSet,
}

#[cfg(feature = "cache")]
static JWKS_CACHE: Lazy<DashMap<String, CachedJwks>> = Lazy::new(DashMap::new);

/// Lifetime of a fetched document when the response carries no `max-age`.
#[cfg(feature = "fetch-reqwest")]
const DEFAULT_MAX_AGE_SECONDS: u64 = 300;

#[cfg(feature = "fetch-reqwest")]
const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// HTTP access for key sets and discovery documents.
#[derive(Debug, Clone)]
struct Fetcher {
    #[cfg(feature = "fetch-reqwest")]
    client: reqwest::Client,
}

impl Fetcher {
    fn new() -> Self {
        Self {
            #[cfg(feature = "fetch-reqwest")]
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// GET `url`, returning the body and how long it may be cached.
    #[cfg(feature = "fetch-reqwest")]
    async fn get(&self, url: &str) -> Result<(String, u64)> {
        use reqwest::header;

        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Jwks(format!("fetch failed: {}", resp.status())));
        }

        let max_age = resp
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_cache_control_max_age)
            .unwrap_or(DEFAULT_MAX_AGE_SECONDS);

        let text = resp.text().await?;
        Ok((text, max_age))
    }

    #[cfg(not(feature = "fetch-reqwest"))]
    async fn get(&self, _url: &str) -> Result<(String, u64)> {
        Err(Error::Jwks(
            "fetching over HTTP requires the fetch-reqwest feature (or provide JwksSource::Json/Set)"
                .to_string(),
        ))
    }

    async fn jwks(&self, url: &str) -> Result<(JwksSet, u64)> {
        let (json, max_age) = self.get(url).await?;
        Ok((serde_json::from_str(&json)?, max_age))
    }

    async fn json(&self, url: &str) -> Result<(Value, u64)> {
        let (json, max_age) = self.get(url).await?;
        Ok((serde_json::from_str(&json)?, max_age))
    }
}

/// Verifies JWTs against one key source with fixed options.
///
/// Built once at startup and shared read-only between requests. Remote key sets are
/// fetched through one HTTP client owned by the verifier.
#[derive(Debug, Clone)]
pub struct JwtVerifier {
    source: JwksSource,
    opts: VerifyOptions,
    fetcher: Fetcher,
}

impl JwtVerifier {
    /// Create a verifier for a key source.
    pub fn new(source: JwksSource, opts: VerifyOptions) -> Self {
        Self {
            source,
            opts,
            fetcher: Fetcher::new(),
        }
    }

    /// Create a verifier for an OIDC issuer, resolving its `jwks_uri` via discovery.
    ///
    /// The expected issuer defaults to `issuer` when `opts.issuer` is unset.
    ///
    /// Requires the `fetch-reqwest` feature.
    pub async fn discover(issuer: &str, mut opts: VerifyOptions) -> Result<Self> {
        let fetcher = Fetcher::new();
        let jwks_url = resolve_jwks_url(&fetcher, issuer, opts.max_jwks_age_seconds).await?;
        if opts.issuer.is_none() {
            opts.issuer = Some(issuer.to_string());
        }
        Ok(Self {
            source: JwksSource::Url(jwks_url),
            opts,
            fetcher,
        })
    }

    /// Options this verifier applies.
    pub fn options(&self) -> &VerifyOptions {
        &self.opts
    }

    /// Verify a token's signature, expiry, issuer and audience.
    ///
    /// A `kid` missing from a cached remote key set triggers one refetch, so rotated
    /// signing keys are picked up before the cache expires.
    pub async fn verify(&self, token: &str) -> Result<VerifiedJwt> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| Error::InvalidJwt(format!("failed to decode header: {e}")))?;

        if !self.opts.allowed_algs.contains(&header.alg) {
            return Err(Error::UnsupportedAlg(header.alg));
        }

        if self.opts.require_kid && header.kid.as_deref().unwrap_or("").is_empty() {
            return Err(Error::InvalidJwt("missing kid".to_string()));
        }

        let mut jwks = self.load_jwks(false).await?;
        if self.unknown_remote_kid(&header, &jwks) {
            debug!(
                kid = header.kid.as_deref().unwrap_or(""),
                "kid not in cached key set, refetching"
            );
            jwks = self.load_jwks(true).await?;
        }
        verify_against_jwks(token, &header, &jwks, &self.opts)
    }

    fn unknown_remote_kid(&self, header: &Header, jwks: &JwksSet) -> bool {
        if !cfg!(feature = "cache") || !matches!(self.source, JwksSource::Url(_)) {
            return false;
        }
        header
            .kid
            .as_deref()
            .is_some_and(|kid| !jwks.keys.iter().any(|k| k.kid.as_deref() == Some(kid)))
    }

    async fn load_jwks(&self, refresh: bool) -> Result<JwksSet> {
        match &self.source {
            JwksSource::Set(set) => Ok(set.clone()),
            JwksSource::Json(json) => Ok(serde_json::from_str(json)?),
            JwksSource::Url(url) => {
                #[cfg(feature = "cache")]
                {
                    let now_ms = now_epoch_ms();
                    if !refresh {
                        if let Some(cached) = JWKS_CACHE.get(url) {
                            if cached.exp_at_ms > now_ms {
                                return Ok(cached.jwks.clone());
                            }
                        }
                    }

                    let (set, max_age_seconds) = self.fetcher.jwks(url).await?;
                    let ttl = std::cmp::min(max_age_seconds, self.opts.max_jwks_age_seconds);
                    let exp_at_ms = now_ms + u128::from(ttl) * 1000;
                    JWKS_CACHE.insert(
                        url.clone(),
                        CachedJwks {
                            exp_at_ms,
                            jwks: set.clone(),
                        },
                    );
                    return Ok(set);
                }

                #[cfg(not(feature = "cache"))]
                {
                    let _ = refresh;
                    let (set, _max_age_seconds) = self.fetcher.jwks(url).await?;
                    Ok(set)
                }
            }
        }
    }
}

/// Resolve an OIDC issuer to its `jwks_uri` via discovery.
///
/// Requires the `fetch-reqwest` feature.
pub async fn resolve_oidc_jwks_url(issuer: &str, max_age_seconds: u64) -> Result<String> {
    resolve_jwks_url(&Fetcher::new(), issuer, max_age_seconds).await
}

async fn resolve_jwks_url(fetcher: &Fetcher, issuer: &str, max_age_seconds: u64) -> Result<String> {
    let issuer = issuer.trim_end_matches('/');
    let discovery = format!("{issuer}/.well-known/openid-configuration");

    #[cfg(feature = "cache")]
    {
        static DISCOVERY_CACHE: Lazy<DashMap<String, (u128, String)>> = Lazy::new(DashMap::new);
        let now_ms = now_epoch_ms();
        if let Some(cached) = DISCOVERY_CACHE.get(&discovery) {
            if cached.value().0 > now_ms {
                return Ok(cached.value().1.clone());
            }
        }
        let (doc, max_age) = fetcher.json(&discovery).await?;
        let jwks_uri = jwks_uri_from_discovery(&doc)?;
        let ttl = std::cmp::min(max_age, max_age_seconds);
        DISCOVERY_CACHE.insert(
            discovery,
            (now_ms + u128::from(ttl) * 1000, jwks_uri.clone()),
        );
        return Ok(jwks_uri);
    }

    #[cfg(not(feature = "cache"))]
    {
        let _ = max_age_seconds;
        let (doc, _max_age) = fetcher.json(&discovery).await?;
        jwks_uri_from_discovery(&doc)
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedJwt> {
        JwtVerifier::verify(self, token).await
    }
}

fn jwks_uri_from_discovery(doc: &Value) -> Result<String> {
    doc.get("jwks_uri")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Jwks("OIDC discovery missing jwks_uri".to_string()))
}

fn verify_against_jwks(
    token: &str,
    header: &Header,
    jwks: &JwksSet,
    opts: &VerifyOptions,
) -> Result<VerifiedJwt> {
    let mut validation = Validation::new(header.alg);
    validation.leeway = opts.leeway_seconds;
    validation.validate_exp = true;
    validation.validate_nbf = true;
    // iss/aud are checked against the decoded claims below.
    validation.validate_aud = false;

    // Prefer kid match when present.
    let mut candidates: Vec<&Jwk> = Vec::new();
    if let Some(kid) = header.kid.as_deref() {
        candidates.extend(jwks.keys.iter().filter(|k| k.kid.as_deref() == Some(kid)));
    }
    if candidates.is_empty() {
        candidates = jwks.keys.iter().collect();
    }

    let mut last_err: Option<jsonwebtoken::errors::Error> = None;
    let mut key_err: Option<Error> = None;

    for jwk in candidates {
        let key = match decoding_key_from_jwk(jwk) {
            Ok(key) => key,
            Err(e) => {
                key_err = Some(e);
                continue;
            }
        };
        match jsonwebtoken::decode::<Value>(token, &key, &validation) {
            Ok(data) => {
                let verified = VerifiedJwt {
                    header: data.header,
                    claims: data.claims,
                };
                validate_issuer_audience(&verified, opts)?;
                return Ok(verified);
            }
            Err(e) => {
                last_err = Some(e);
            }
        }
    }

    if let Some(e) = last_err {
        return Err(Error::Validation(format!("{e}")));
    }

    // Keys were offered but none could be built: the key source is broken.
    match key_err {
        Some(Error::Jwks(msg)) => Err(Error::Jwks(msg)),
        Some(other) => Err(Error::Jwks(format!("unusable key: {other}"))),
        None => Err(Error::NoMatchingKey),
    }
}

fn decoding_key_from_jwk(jwk: &Jwk) -> Result<DecodingKey> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk
                .n
                .as_deref()
                .ok_or_else(|| Error::Jwks("RSA JWK missing n".to_string()))?;
            let e = jwk
                .e
                .as_deref()
                .ok_or_else(|| Error::Jwks("RSA JWK missing e".to_string()))?;
            Ok(DecodingKey::from_rsa_components(n, e)?)
        }
        "EC" => {
            let x = jwk
                .x
                .as_deref()
                .ok_or_else(|| Error::Jwks("EC JWK missing x".to_string()))?;
            let y = jwk
                .y
                .as_deref()
                .ok_or_else(|| Error::Jwks("EC JWK missing y".to_string()))?;
            Ok(DecodingKey::from_ec_components(x, y)?)
        }
        "OKP" => {
            let crv = jwk.crv.as_deref().unwrap_or("");
            if crv != "Ed25519" {
                return Err(Error::Jwks(format!("unsupported OKP curve: {crv}")));
            }
            let x = jwk
                .x
                .as_deref()
                .ok_or_else(|| Error::Jwks("OKP JWK missing x".to_string()))?;
            Ok(DecodingKey::from_ed_components(x)?)
        }
        other => Err(Error::Jwks(format!("unsupported kty: {other}"))),
    }
}

fn validate_issuer_audience(verified: &VerifiedJwt, opts: &VerifyOptions) -> Result<()> {
    if let Some(expected_iss) = &opts.issuer {
        let iss = verified
            .iss()
            .ok_or_else(|| Error::Validation("missing iss".to_string()))?;
        if iss != expected_iss {
            return Err(Error::Validation(format!(
                "issuer mismatch: expected {expected_iss}, got {iss}"
            )));
        }
    }

    if let Some(expected_aud) = &opts.audience {
        let aud = verified
            .aud()
            .ok_or_else(|| Error::Validation("missing aud".to_string()))?;
        let ok = match aud {
            Value::String(s) => s == expected_aud,
            Value::Array(arr) => arr
                .iter()
                .any(|v| v.as_str() == Some(expected_aud.as_str())),
            _ => false,
        };
        if !ok {
            return Err(Error::Validation(format!(
                "audience mismatch: expected {expected_aud}"
            )));
        }
    }

    Ok(())
}

#[cfg(feature = "cache")]
fn now_epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis()
}

/// `no-store` and `no-cache` mean the document must not be reused.
fn parse_cache_control_max_age(cc: &str) -> Option<u64> {
    let directives: Vec<&str> = cc.split(',').map(str::trim).collect();
    if directives
        .iter()
        .any(|d| d.eq_ignore_ascii_case("no-store") || d.eq_ignore_ascii_case("no-cache"))
    {
        return Some(0);
    }
    directives
        .iter()
        .filter_map(|d| d.strip_prefix("max-age="))
        .find_map(|rest| rest.trim().parse::<u64>().ok())
}
