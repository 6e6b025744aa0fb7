use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use passgate_api::{ClaimsConfig, PassgateError, ReviewBackendConfig};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "passgate.toml";
pub const DEFAULT_HEADER: &str = "Authorization";
pub const DEFAULT_COOKIE: &str = "id_token";

const DEFAULT_CONFIG: &str = include_str!("../../../docs/passgate/passgate.toml.example");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GetterKind {
    Bearer,
    JwtCookie,
    JwtHeader,
}

impl GetterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GetterKind::Bearer => "bearer",
            GetterKind::JwtCookie => "jwt_cookie",
            GetterKind::JwtHeader => "jwt_header",
        }
    }

    fn reads_cookie(self) -> bool {
        matches!(self, GetterKind::JwtCookie)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetterSpec {
    pub kind: GetterKind,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub cookie: Option<String>,
}

impl GetterSpec {
    pub fn header_name(&self) -> &str {
        self.header.as_deref().unwrap_or(DEFAULT_HEADER)
    }

    pub fn cookie_name(&self) -> &str {
        self.cookie.as_deref().unwrap_or(DEFAULT_COOKIE)
    }

    /// The header or cookie this getter reads.
    pub fn transport(&self) -> &str {
        if self.kind.reads_cookie() {
            self.cookie_name()
        } else {
            self.header_name()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcSettings {
    pub issuer: String,
    #[serde(default)]
    pub jwks_url: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "default_leeway_seconds")]
    pub leeway_seconds: u64,
    #[serde(default)]
    pub require_kid: bool,
    #[serde(default = "default_max_jwks_age_seconds")]
    pub max_jwks_age_seconds: u64,
    #[serde(default = "default_allowed_algs")]
    pub allowed_algs: Vec<String>,
}

fn default_leeway_seconds() -> u64 {
    60
}

fn default_max_jwks_age_seconds() -> u64 {
    300
}

fn default_allowed_algs() -> Vec<String> {
    ["RS256", "ES256", "EdDSA"].map(str::to_string).to_vec()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassgateConfig {
    pub getters: Vec<GetterSpec>,
    pub review: Option<ReviewBackendConfig>,
    pub oidc: Option<OidcSettings>,
    pub claims: Option<ClaimsConfig>,
}

pub fn validate_config(cfg: &PassgateConfig) -> Result<(), PassgateError> {
    if cfg.getters.is_empty() {
        return Err(PassgateError::Validation(
            "at least one getter must be configured".to_string(),
        ));
    }

    let mut seen = BTreeSet::new();
    for getter in &cfg.getters {
        let kind = getter.kind.as_str();
        let transport = getter.transport();
        if transport.trim().is_empty() {
            return Err(PassgateError::Validation(format!(
                "{kind} getter has an empty header/cookie name"
            )));
        }
        if !seen.insert((getter.kind, transport.to_ascii_lowercase())) {
            return Err(PassgateError::Validation(format!(
                "{kind} getter on {transport} is configured twice"
            )));
        }
        match getter.kind {
            GetterKind::Bearer if cfg.review.is_none() => {
                return Err(PassgateError::Validation(
                    "bearer getter requires a [review] section".to_string(),
                ));
            }
            GetterKind::JwtCookie | GetterKind::JwtHeader if cfg.oidc.is_none() => {
                return Err(PassgateError::Validation(format!(
                    "{kind} getter requires an [oidc] section"
                )));
            }
            _ => {}
        }
    }

    if let Some(review) = &cfg.review {
        if !(review.base_url.starts_with("https://") || review.base_url.starts_with("http://")) {
            return Err(PassgateError::Validation(format!(
                "review base_url must be an http(s) URL, got {}",
                review.base_url
            )));
        }
        if review.secret_ref.trim().is_empty() {
            return Err(PassgateError::Validation(
                "review secret_ref must not be empty".to_string(),
            ));
        }
    }

    if let Some(oidc) = &cfg.oidc {
        if oidc.issuer.trim().is_empty() {
            return Err(PassgateError::Validation(
                "oidc issuer must not be empty".to_string(),
            ));
        }
        if oidc.allowed_algs.is_empty() {
            return Err(PassgateError::Validation(
                "oidc allowed_algs must not be empty".to_string(),
            ));
        }
    }

    Ok(())
}

pub fn demo_config() -> PassgateConfig {
    PassgateConfig {
        getters: vec![
            GetterSpec {
                kind: GetterKind::Bearer,
                header: None,
                cookie: None,
            },
            GetterSpec {
                kind: GetterKind::JwtCookie,
                header: None,
                cookie: None,
            },
        ],
        review: Some(ReviewBackendConfig {
            reviewer_id: "review".to_string(),
            base_url: "https://kubernetes.default.svc".to_string(),
            secret_ref: "PASSGATE_REVIEW_TOKEN".to_string(),
            connect_timeout_ms: 2_000,
            request_timeout_ms: 10_000,
            ca_cert_path: None,
        }),
        oidc: Some(OidcSettings {
            issuer: "https://issuer.example.com".to_string(),
            jwks_url: None,
            audience: None,
            leeway_seconds: default_leeway_seconds(),
            require_kid: false,
            max_jwks_age_seconds: default_max_jwks_age_seconds(),
            allowed_algs: default_allowed_algs(),
        }),
        claims: None,
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    getters: Vec<GetterSpec>,
    review: Option<RawReview>,
    oidc: Option<OidcSettings>,
    claims: Option<ClaimsConfig>,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    base_url: String,
    secret_ref: String,
    #[serde(default = "default_connect_timeout_ms")]
    connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,
    #[serde(default)]
    ca_cert_path: Option<String>,
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

pub fn default_config_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("passgate")
    } else {
        PathBuf::from(".passgate")
    }
}

pub fn load_config_from_dir(dir: &Path) -> Result<PassgateConfig, PassgateError> {
    load_config_from_file(&dir.join(CONFIG_FILE))
}

pub fn load_config_from_file(path: &Path) -> Result<PassgateConfig, PassgateError> {
    let content = fs::read_to_string(path)
        .map_err(|e| PassgateError::NotFound(format!("failed to read {}: {e}", path.display())))?;
    parse_config(&content).map_err(|e| match e {
        PassgateError::Validation(msg) => {
            PassgateError::Validation(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

pub fn parse_config(content: &str) -> Result<PassgateConfig, PassgateError> {
    let raw: RawConfig = toml::from_str(content)
        .map_err(|e| PassgateError::Validation(format!("invalid TOML: {e}")))?;

    let review = raw.review.map(|r| ReviewBackendConfig {
        reviewer_id: "review".to_string(),
        base_url: r.base_url.trim_end_matches('/').to_string(),
        secret_ref: r.secret_ref,
        connect_timeout_ms: r.connect_timeout_ms,
        request_timeout_ms: r.request_timeout_ms,
        ca_cert_path: r.ca_cert_path,
    });

    let cfg = PassgateConfig {
        getters: raw.getters,
        review,
        oidc: raw.oidc,
        claims: raw.claims,
    };
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Write the commented default `passgate.toml` into `dir`.
///
/// Returns the path written, or `None` when a file already exists and `force` is false.
pub fn write_default_config_file(dir: &Path, force: bool) -> Result<Option<PathBuf>, PassgateError> {
    fs::create_dir_all(dir)
        .map_err(|e| PassgateError::Internal(format!("failed to create {}: {e}", dir.display())))?;

    let path = dir.join(CONFIG_FILE);
    if path.exists() && !force {
        return Ok(None);
    }
    fs::write(&path, DEFAULT_CONFIG).map_err(|e| {
        PassgateError::Internal(format!("failed to write {}: {e}", path.display()))
    })?;
    Ok(Some(path))
}
