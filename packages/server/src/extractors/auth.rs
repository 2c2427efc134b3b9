use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::state::AppState;
use crate::utils::jwt;

/// Authenticated user extracted from the `Authorization: Bearer <token>` header.
///
/// Add this as a handler parameter to require authentication. Whether the
/// principal may touch a given iteration is decided by the `AccessGate` in
/// the handler body.
pub struct AuthUser {
    pub login: String,
    pub active: bool,
}

impl AuthUser {
    /// Returns `Ok(())` if the account is enabled, `Err(UserNotActive)` otherwise.
    pub fn require_active(&self) -> Result<(), AppError> {
        if self.active {
            Ok(())
        } else {
            Err(AppError::UserNotActive)
        }
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::TokenMissing)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AppError::TokenInvalid)?;

        let claims = jwt::verify(token, state.config.auth.jwt_secret.as_bytes())
            .map_err(|_| AppError::TokenInvalid)?;

        Ok(AuthUser {
            login: claims.sub,
            active: claims.active,
        })
    }
}
