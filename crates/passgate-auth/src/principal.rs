//! The principal-resolution contract shared by every strategy.

use async_trait::async_trait;
use http::request::Parts;
use passgate_api::UserPrincipal;

use crate::Result;
use crate::scope::RequestScope;

/// Resolves the caller's identity from one credential transport.
///
/// - `Ok(None)`: the transport carries no credential. Not an error; try the next
///   strategy or treat the request as unauthenticated.
/// - `Ok(Some(_))`: a credential was present and accepted.
/// - `Err(_)`: a credential was present but refused, or a trust backend failed.
///   See [`Error::kind`](crate::Error::kind).
///
/// Implementations never mutate the request.
#[async_trait]
pub trait PrincipalGetter: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    async fn principal(
        &self,
        req: &Parts,
        scope: &RequestScope,
    ) -> Result<Option<UserPrincipal>>;
}
