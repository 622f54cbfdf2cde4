use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use pyrnado_core::{DomainError, Principal, TenantId};
use uuid::Uuid;

use crate::{app::AppState, error::ApiError};

/// The verified caller. Handlers only ever see the tenant id, never the raw
/// credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant: TenantId,
    pub user_id: Uuid,
}

impl From<Principal> for TenantContext {
    fn from(principal: Principal) -> Self {
        Self {
            tenant: principal.tenant,
            user_id: principal.user_id,
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

async fn resolve(state: &AppState, headers: &HeaderMap) -> Result<Option<TenantContext>, ApiError> {
    let Some(token) = bearer_token(headers) else {
        return Ok(None);
    };
    let principal = state.identity.resolve_token(token).await?;
    Ok(principal.map(TenantContext::from))
}

impl FromRequestParts<AppState> for TenantContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        resolve(state, &parts.headers)
            .await?
            .ok_or(ApiError(DomainError::Unauthorized))
    }
}

/// Caller identity on public endpoints: `None` for anonymous requests and for
/// credentials that do not resolve.
#[derive(Debug, Clone, Copy)]
pub struct MaybeTenant(pub Option<TenantContext>);

impl FromRequestParts<AppState> for MaybeTenant {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        resolve(state, &parts.headers).await.map(MaybeTenant)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_scheme_is_required() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("bearer  abc ")), Some("abc"));
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
