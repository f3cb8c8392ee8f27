use axum::http::HeaderMap;
use chat_protocol::Principal;
use chat_router::transport::axum_ws::{AuthError, PrincipalExtractor};

/// Resolves a [`Principal`] from plain `X-User-Id`/`X-User-Name`/`X-Role`
/// headers.
///
/// Real JWT/session-cookie validation is out of scope for the router core;
/// a production deployment replaces this with an extractor that verifies a
/// bearer token against its identity provider.
pub(crate) struct HeaderPrincipalExtractor;

#[async_trait::async_trait]
impl PrincipalExtractor for HeaderPrincipalExtractor {
    async fn extract(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let user_id = headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AuthError("missing x-user-id header".to_owned()))?;
        let display_name = headers
            .get("x-user-name")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let roles = headers
            .get("x-role")
            .and_then(|v| v.to_str().ok())
            .map(|role| vec![role.to_owned()])
            .unwrap_or_default();
        Ok(Principal::new(user_id, roles, display_name))
    }
}
