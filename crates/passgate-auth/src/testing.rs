//! Signing fixtures shared by the unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use passgate_api::{PassgateError, ReviewStatus, TokenReviewer};
use serde_json::{Value, json};

use crate::jwt::{
    Jwk, JwksSet, JwksSource, JwtVerifier, TokenVerifier, VerifiedJwt, VerifyOptions,
};

pub const ISSUER: &str = "https://issuer.passgate.test";
pub const KID: &str = "passgate-test-1";

const SIGNING_KEY_PEM: &str = include_str!("../tests/fixtures/signing_key.pem");
const FOREIGN_KEY_PEM: &str = include_str!("../tests/fixtures/foreign_key.pem");

// Public modulus of signing_key.pem, base64url.
const SIGNING_KEY_N: &str = "r-_6bcC4y21PjdjBr32KQAWiXOV-kO0KfkLnLDlLxS9X72Oo7GtQnazNEejEnroqGyyn9L9QPDw1ekIx8ZKM9_VaFfQr9B_3DHDt53b0hORYEKRNidl4KTx-6zkYwXAi7y21Jo30fN-9ZBTNryhsxiBIhl2otChzrYRc5CRNutr5MzLM4899UuPw2QJanDuiKd_si-XgBZr5JhmXCVDhbCDKfPh52yHfA-m2TII31VvVo1RaHAmHDDQo6K5nl37C7PmXn1Jvhv9TJWbBr5SGDg1DKNwf5iie61aOeNn-yu4ln9E6OKNvLJ5sqDy_wPN1qRC8f3NHWk0MGLECRrA6_w";

pub fn jwks() -> JwksSet {
    JwksSet {
        keys: vec![Jwk {
            kty: "RSA".to_string(),
            kid: Some(KID.to_string()),
            use_: Some("sig".to_string()),
            alg: Some("RS256".to_string()),
            n: Some(SIGNING_KEY_N.to_string()),
            e: Some("AQAB".to_string()),
            ..Default::default()
        }],
    }
}

/// The fixture key set after a rotation: a different key under a different kid.
pub fn retired_jwks() -> JwksSet {
    let mut set = jwks();
    for key in &mut set.keys {
        key.kid = Some("old".to_string());
        key.n = Some(format!("s{}", &SIGNING_KEY_N[1..]));
    }
    set
}

pub fn standard_claims(sub: &str, groups: &[&str]) -> Value {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    json!({
        "iss": ISSUER,
        "aud": "passgate",
        "sub": sub,
        "groups": groups,
        "iat": now,
        "exp": now + 3600,
    })
}

pub fn sign(claims: &Value) -> String {
    sign_with(SIGNING_KEY_PEM, claims)
}

/// Same header and kid as [`sign`], but signed by a key missing from [`jwks`].
pub fn foreign_token(claims: &Value) -> String {
    sign_with(FOREIGN_KEY_PEM, claims)
}

fn sign_with(pem: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.to_string());
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

pub fn parts(headers: &[(&str, &str)]) -> http::request::Parts {
    let mut builder = http::Request::builder().uri("https://app.passgate.test/api");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(()).unwrap().into_parts().0
}

#[derive(Debug, Clone, Copy)]
pub enum Verdict {
    Accept,
    Refuse,
    Fail,
    Hang,
}

/// Review backend returning a fixed verdict and recording what it was asked.
pub struct FakeReviewer {
    verdict: Verdict,
    calls: AtomicUsize,
    last_token: Mutex<Option<String>>,
}

impl FakeReviewer {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            calls: AtomicUsize::new(0),
            last_token: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_token(&self) -> Option<String> {
        self.last_token.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenReviewer for FakeReviewer {
    fn id(&self) -> &str {
        "fake"
    }

    async fn review(&self, token: &str) -> Result<ReviewStatus, PassgateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_token.lock().unwrap() = Some(token.to_string());
        match self.verdict {
            Verdict::Accept => Ok(ReviewStatus {
                authenticated: true,
                ..Default::default()
            }),
            Verdict::Refuse => Ok(ReviewStatus {
                authenticated: false,
                error: Some("token expired".to_string()),
                ..Default::default()
            }),
            Verdict::Fail => Err(PassgateError::Connection("connection refused".to_string())),
            Verdict::Hang => std::future::pending().await,
        }
    }
}

/// [`JwtVerifier`] over the fixture key set that counts invocations.
pub struct CountingVerifier {
    inner: JwtVerifier,
    calls: AtomicUsize,
}

impl CountingVerifier {
    pub fn new() -> Self {
        Self {
            inner: JwtVerifier::new(JwksSource::Set(jwks()), VerifyOptions::default()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenVerifier for CountingVerifier {
    async fn verify(&self, token: &str) -> crate::Result<VerifiedJwt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.verify(token).await
    }
}
