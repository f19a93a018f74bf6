use std::sync::Arc;

use uuid::Uuid;

use doubtdesk_db::Database;
use doubtdesk_types::models::Role;

use crate::auth::{AppState, AppStateInner};
use crate::middleware::Identity;
use crate::rate_limit::{RateLimitConfig, RateLimiters};
use crate::rows;
use crate::storage::ScreenshotStore;

pub async fn test_state() -> AppState {
    test_state_with(RateLimitConfig {
        comments_per_minute: 1_000,
        doubts_per_minute: 1_000,
    })
    .await
}

pub async fn test_state_with(limits: RateLimitConfig) -> AppState {
    let dir = std::env::temp_dir().join(format!("doubtdesk-test-{}", Uuid::new_v4()));
    Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        jwt_secret: "test-secret".into(),
        token_ttl_days: 1,
        screenshots: ScreenshotStore::new(dir, "http://localhost:3000").await.unwrap(),
        limits: RateLimiters::new(limits),
    })
}

/// Insert a user row and return the matching identity.
pub fn user(state: &AppState, name: &str, role: Role) -> Identity {
    let id = Uuid::new_v4();
    state
        .db
        .create_user(
            &id.to_string(),
            name,
            &format!("{}@example.com", id),
            "unused-hash",
            role.as_str(),
            &rows::timestamp(rows::now()),
        )
        .unwrap();
    Identity {
        user_id: id,
        name: name.to_string(),
        role,
    }
}
