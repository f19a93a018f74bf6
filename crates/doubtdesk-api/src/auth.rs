use std::net::SocketAddr;
use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::IntoResponse,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use doubtdesk_db::Database;
use doubtdesk_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};
use doubtdesk_types::models::Role;

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::rate_limit::RateLimiters;
use crate::rows;
use crate::storage::ScreenshotStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub screenshots: ScreenshotStore,
    pub limits: RateLimiters,
}

/// Run blocking DB work off the async runtime.
pub async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Storage(anyhow::anyhow!("blocking task failed: {}", e))
        })?
        .map_err(ApiError::Storage)
}

pub async fn register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.limits.register.check(&addr.ip().to_string())?;
    let resp = register_user(&state, req).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.limits.login.check(&addr.ip().to_string())?;
    Ok(Json(login_user(&state, req).await?))
}

pub async fn register_user(state: &AppState, req: RegisterRequest) -> Result<AuthResponse, ApiError> {
    // Validate input
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::validation("Name is required"));
    }
    let email = normalize_email(&req.email);
    if !is_valid_email(&email) {
        return Err(ApiError::validation("Valid email is required"));
    }
    if req.password.len() < 6 {
        return Err(ApiError::validation("Password must be 6+ characters"));
    }

    // Check if email is taken
    let lookup = email.clone();
    if run_db(state, move |db| db.get_user_by_email(&lookup)).await?.is_some() {
        return Err(ApiError::Conflict("Email is already registered".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();
    let role = req.role;
    {
        let (id, name, email) = (user_id.to_string(), name.clone(), email.clone());
        let created_at = rows::timestamp(rows::now());
        let inserted = run_db(state, move |db| {
            db.create_user(&id, &name, &email, &password_hash, role.as_str(), &created_at)
        })
        .await?;
        // A concurrent registration can win between the lookup and the insert.
        if !inserted {
            return Err(ApiError::Conflict("Email is already registered".into()));
        }
    }

    info!("Registered {} {} ({})", role, user_id, email);
    let token = create_token(&state.jwt_secret, state.token_ttl_days, user_id, &name, role)?;
    Ok(AuthResponse {
        user_id,
        name,
        role,
        token,
    })
}

pub async fn login_user(state: &AppState, req: LoginRequest) -> Result<AuthResponse, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid credentials".into());

    let email = normalize_email(&req.email);
    let user = run_db(state, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or_else(invalid)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored hash for {} unreadable: {}", user.id, e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| invalid())?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {}", user.id, e))?;
    let role: Role = user
        .role
        .parse()
        .map_err(|e| anyhow::anyhow!("user {}: {}", user.id, e))?;

    let token = create_token(&state.jwt_secret, state.token_ttl_days, user_id, &user.name, role)?;
    Ok(AuthResponse {
        user_id,
        name: user.name,
        role,
        token,
    })
}

pub fn create_token(
    secret: &str,
    ttl_days: i64,
    user_id: Uuid,
    name: &str,
    role: Role,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        name: name.to_string(),
        role,
        exp: (chrono::Utc::now() + chrono::Duration::days(ttl_days)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// `local@domain.tld`, no whitespace.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::decode_token;
    use crate::testing::test_state;

    fn request(email: &str, password: &str, role: Role) -> RegisterRequest {
        RegisterRequest {
            name: "Asha".into(),
            email: email.into(),
            password: password.into(),
            role,
        }
    }

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("asha@example.com"));
        assert!(is_valid_email("a.b@mail.example.org"));
        assert!(!is_valid_email("asha@example"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("asha@@example.com"));
        assert!(!is_valid_email("as ha@example.com"));
        assert!(!is_valid_email("asha.example.com"));
    }

    #[tokio::test]
    async fn register_then_login_issues_role_bearing_tokens() {
        let state = test_state().await;
        let registered = register_user(&state, request("Asha@Example.com ", "secret1", Role::Student))
            .await
            .unwrap();
        assert_eq!(registered.role, Role::Student);

        let claims = decode_token(&state.jwt_secret, &registered.token).unwrap();
        assert_eq!(claims.sub, registered.user_id);
        assert_eq!(claims.role, Role::Student);

        let logged_in = login_user(
            &state,
            LoginRequest {
                email: "asha@example.com".into(),
                password: "secret1".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(logged_in.user_id, registered.user_id);
        assert_eq!(logged_in.name, "Asha");
    }

    #[tokio::test]
    async fn register_rejects_bad_input_and_duplicates() {
        let state = test_state().await;
        assert!(matches!(
            register_user(&state, request("nope", "secret1", Role::Mentor)).await,
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            register_user(&state, request("m@example.com", "short", Role::Mentor)).await,
            Err(ApiError::Validation(_))
        ));

        register_user(&state, request("m@example.com", "secret1", Role::Mentor)).await.unwrap();
        assert!(matches!(
            register_user(&state, request("M@example.com", "secret2", Role::Student)).await,
            Err(ApiError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_duplicate_registration_yields_one_conflict() {
        let state = test_state().await;
        let (a, b) = tokio::join!(
            register_user(&state, request("same@example.com", "secret1", Role::Student)),
            register_user(&state, request("Same@example.com", "secret2", Role::Mentor)),
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes.iter().any(|r| matches!(r, Err(ApiError::Conflict(_)))));
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let state = test_state().await;
        register_user(&state, request("s@example.com", "secret1", Role::Student)).await.unwrap();

        let result = login_user(
            &state,
            LoginRequest {
                email: "s@example.com".into(),
                password: "secret2".into(),
            },
        )
        .await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));

        let result = login_user(
            &state,
            LoginRequest {
                email: "ghost@example.com".into(),
                password: "secret1".into(),
            },
        )
        .await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }
}
