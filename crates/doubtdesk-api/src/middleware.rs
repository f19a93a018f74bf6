use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use uuid::Uuid;

use doubtdesk_types::api::Claims;
use doubtdesk_types::models::Role;

use crate::auth::{AppState, run_db};
use crate::error::ApiError;

/// The caller of an operation. Passed explicitly into every domain function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
}

/// Extract and validate JWT from Authorization header, then confirm the user
/// still exists. The stored name and role win over whatever the token carries.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("No token provided".into()))?;

    let claims = decode_token(&state.jwt_secret, token)?;

    let uid = claims.sub.to_string();
    let user = run_db(&state, move |db| db.get_user_by_id(&uid))
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid token".into()))?;

    let role = user
        .role
        .parse::<Role>()
        .map_err(|e| ApiError::Storage(anyhow::anyhow!("user {}: {}", user.id, e)))?;

    req.extensions_mut().insert(Identity {
        user_id: claims.sub,
        name: user.name,
        role,
    });
    Ok(next.run(req).await)
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized("Invalid token".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::create_token;

    #[test]
    fn tokens_decode_only_with_the_issuing_secret() {
        let user = Uuid::new_v4();
        let token = create_token("secret-a", 1, user, "Ravi", Role::Mentor).unwrap();

        let claims = decode_token("secret-a", &token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.role, Role::Mentor);

        assert!(matches!(decode_token("secret-b", &token), Err(ApiError::Unauthorized(_))));
        assert!(matches!(decode_token("secret-a", "garbage"), Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        // Beyond the default 60s leeway.
        let token = create_token("secret-a", -1, Uuid::new_v4(), "Asha", Role::Student).unwrap();
        assert!(matches!(decode_token("secret-a", &token), Err(ApiError::Unauthorized(_))));
    }
}
