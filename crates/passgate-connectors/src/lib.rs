use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use passgate_api::{
    PassgateError, ReviewBackendConfig, ReviewStatus, ReviewerFactory, SecretStore, TokenReviewer,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

pub const TOKEN_REVIEW_PATH: &str = "/apis/authentication.k8s.io/v1/tokenreviews";

pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn get(&self, secret_ref: &str) -> Result<String, PassgateError> {
        std::env::var(secret_ref)
            .map_err(|_| PassgateError::NotFound(format!("missing secret env var {secret_ref}")))
    }
}

/// Submits tokens to a Kubernetes-style `TokenReview` endpoint.
pub struct HttpTokenReviewer {
    id: String,
    endpoint: String,
    credential: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenReviewResponse {
    #[serde(default)]
    status: ReviewStatus,
}

impl HttpTokenReviewer {
    pub fn new(
        id: String,
        base_url: &str,
        credential: String,
        client: reqwest::Client,
    ) -> Result<Self, PassgateError> {
        if base_url.is_empty() {
            return Err(PassgateError::Validation("base_url is empty".to_string()));
        }
        Ok(Self {
            id,
            endpoint: format!("{}{TOKEN_REVIEW_PATH}", base_url.trim_end_matches('/')),
            credential,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TokenReviewer for HttpTokenReviewer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn review(&self, token: &str) -> Result<ReviewStatus, PassgateError> {
        let body = json!({
            "apiVersion": "authentication.k8s.io/v1",
            "kind": "TokenReview",
            "spec": { "token": token },
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                warn!(reviewer = %self.id, error = %e, "token review request failed");
                PassgateError::Connection(format!("token review request failed: {e}"))
            })?;

        let status = resp.status();
        if !status.is_success() {
            warn!(reviewer = %self.id, %status, "token review endpoint returned an error");
            return Err(PassgateError::Connection(format!(
                "token review endpoint returned {status}"
            )));
        }

        let review: TokenReviewResponse = resp.json().await.map_err(|e| {
            PassgateError::Connection(format!("invalid token review response: {}", e.without_url()))
        })?;
        debug!(
            reviewer = %self.id,
            authenticated = review.status.authenticated,
            "token review completed"
        );
        Ok(review.status)
    }
}

#[derive(Default)]
pub struct DefaultReviewerFactory;

impl ReviewerFactory for DefaultReviewerFactory {
    fn build(
        &self,
        cfg: &ReviewBackendConfig,
        secrets: &dyn SecretStore,
    ) -> Result<Arc<dyn TokenReviewer>, PassgateError> {
        let credential = secrets.get(&cfg.secret_ref)?;

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(path) = &cfg.ca_cert_path {
            let pem = std::fs::read(path).map_err(|e| {
                PassgateError::NotFound(format!("failed to read CA bundle {path}: {e}"))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| PassgateError::Validation(format!("invalid CA bundle {path}: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|e| PassgateError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Arc::new(HttpTokenReviewer::new(
            cfg.reviewer_id.clone(),
            &cfg.base_url,
            credential,
            client,
        )?))
    }
}
