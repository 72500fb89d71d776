//! Caller roles asserted by the authenticating proxy in front of the gateway.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::error::ApiError;

/// Header carrying the caller's role, set by the upstream proxy.
pub const ROLE_HEADER: &str = "x-authenticated-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Any authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub role: Role,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = parts
            .headers
            .get(ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(Role::parse)
            .ok_or(ApiError::Unauthorized)?;
        Ok(Caller { role })
    }
}

/// A caller holding the admin role.
#[derive(Debug, Clone, Copy)]
pub struct Admin(pub Caller);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;
        if caller.role < Role::Admin {
            return Err(ApiError::Forbidden);
        }
        Ok(Admin(caller))
    }
}
