//! Claims parsing: verified token to principal.

use passgate_api::{ClaimsConfig, UserPrincipal};

use crate::Result;
use crate::extract::extract_token;
use crate::jwt::{TokenVerifier, VerifiedJwt};

/// Verify a signed token and build a principal from its claims.
///
/// With `claims == None` no custom mapping is applied: `sub` becomes the id and
/// `groups` the group set, and either stays empty when the claim is missing.
/// The principal's token is the normalized credential (scheme and whitespace removed).
pub async fn parse_jwt_token(
    verifier: &dyn TokenVerifier,
    raw: &str,
    claims: Option<&ClaimsConfig>,
) -> Result<UserPrincipal> {
    let token = extract_token(raw);
    let verified = verifier.verify(token).await?;
    Ok(principal_from_claims(token, &verified, claims))
}

/// Map verified claims onto a principal carrying `token`.
pub fn principal_from_claims(
    token: &str,
    verified: &VerifiedJwt,
    claims: Option<&ClaimsConfig>,
) -> UserPrincipal {
    let standard = ClaimsConfig::default();
    let cfg = claims.unwrap_or(&standard);

    let mut principal = UserPrincipal::new(token);
    principal.id = verified
        .claim_str(&cfg.username)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    principal.groups = verified.claim_set(&cfg.groups);
    principal
}
