//! Bearer token authentication
//!
//! Token issuance lives in the auth service; this middleware only verifies
//! HS256 bearer tokens and exposes the authenticated principal. The kiosk
//! principal's username doubles as the event-routing channel key.

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::state::AppState;

pub const KIOSK_ROLE: &str = "kiosk";
pub const ADMIN_ROLES: &[&str] = &["admin", "superadmin"];

#[derive(Debug, Clone, Deserialize)]
struct Claims {
    sub: String,
    role: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Authenticated principal added to request extensions.
#[derive(Debug, Clone)]
pub struct Principal {
    pub username: String,
    pub role: String,
}

impl Principal {
    pub fn is_kiosk(&self) -> bool {
        self.role == KIOSK_ROLE
    }

    pub fn is_admin(&self) -> bool {
        ADMIN_ROLES.contains(&self.role.as_str())
    }
}

fn bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
}

fn verify(state: &AppState, token: &str) -> Option<Principal> {
    let key = DecodingKey::from_secret(state.ctx.config.security.jwt_secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);

    match decode::<Claims>(token, &key, &validation) {
        Ok(data) => Some(Principal {
            username: data.claims.sub,
            role: data.claims.role,
        }),
        Err(e) => {
            tracing::debug!(error = %e, "bearer token rejected");
            None
        }
    }
}

/// Require a valid token with the kiosk role.
pub async fn kiosk_auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(&request).ok_or(StatusCode::UNAUTHORIZED)?;
    let principal = verify(&state, token).ok_or(StatusCode::UNAUTHORIZED)?;

    if !principal.is_kiosk() {
        return Err(StatusCode::FORBIDDEN);
    }

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Require a valid token with an admin role.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(&request).ok_or(StatusCode::UNAUTHORIZED)?;
    let principal = verify(&state, token).ok_or(StatusCode::UNAUTHORIZED)?;

    if !principal.is_admin() {
        return Err(StatusCode::FORBIDDEN);
    }

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_roles() {
        let kiosk = Principal {
            username: "kiosk-1".to_string(),
            role: "kiosk".to_string(),
        };
        assert!(kiosk.is_kiosk());
        assert!(!kiosk.is_admin());

        let admin = Principal {
            username: "ops".to_string(),
            role: "admin".to_string(),
        };
        assert!(!admin.is_kiosk());
        assert!(admin.is_admin());

        let superadmin = Principal {
            username: "root".to_string(),
            role: "superadmin".to_string(),
        };
        assert!(superadmin.is_admin());
    }
}
