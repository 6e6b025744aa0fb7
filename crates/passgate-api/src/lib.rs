use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type ReviewerId = String;

/// Identity resolved for a single request.
///
/// The credential itself is kept private and never shows up in `Debug` output or
/// serialized form; strategies that only pass a token through leave `id` and `groups`
/// empty.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct UserPrincipal {
    #[serde(skip)]
    token: String,
    pub id: Option<String>,
    pub groups: BTreeSet<String>,
}

impl UserPrincipal {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            id: None,
            groups: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = token.into();
    }

    /// True when identity claims were populated from a parsed token.
    pub fn has_claims(&self) -> bool {
        self.id.is_some() || !self.groups.is_empty()
    }
}

impl fmt::Debug for UserPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserPrincipal")
            .field("token", &"<redacted>")
            .field("id", &self.id)
            .field("groups", &self.groups)
            .finish()
    }
}

/// Names of the token claims mapped onto a [`UserPrincipal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsConfig {
    #[serde(default = "default_username_claim")]
    pub username: String,
    #[serde(default = "default_groups_claim")]
    pub groups: String,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            username: default_username_claim(),
            groups: default_groups_claim(),
        }
    }
}

fn default_username_claim() -> String {
    "sub".to_string()
}

fn default_groups_claim() -> String {
    "groups".to_string()
}

/// Outcome reported by an authentication-review backend.
///
/// Only `authenticated` takes part in the accept/reject decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStatus {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub user: Option<ReviewedUser>,
    #[serde(default)]
    pub audiences: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewedUser {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewBackendConfig {
    pub reviewer_id: ReviewerId,
    pub base_url: String,
    pub secret_ref: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub ca_cert_path: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PassgateError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub trait SecretStore: Send + Sync {
    fn get(&self, secret_ref: &str) -> Result<String, PassgateError>;
}

/// Remote authentication-review backend.
///
/// `Err` means the backend could not produce a verdict; a rejected token is
/// `Ok(ReviewStatus { authenticated: false, .. })`.
#[async_trait]
pub trait TokenReviewer: Send + Sync {
    fn id(&self) -> &str;
    async fn review(&self, token: &str) -> Result<ReviewStatus, PassgateError>;
}

pub trait ReviewerFactory: Send + Sync {
    fn build(
        &self,
        cfg: &ReviewBackendConfig,
        secrets: &dyn SecretStore,
    ) -> Result<Arc<dyn TokenReviewer>, PassgateError>;
}
