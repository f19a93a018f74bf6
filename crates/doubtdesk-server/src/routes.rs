use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use doubtdesk_api::auth::{self, AppState};
use doubtdesk_api::comments;
use doubtdesk_api::counts;
use doubtdesk_api::doubts;
use doubtdesk_api::middleware::require_auth;

/// A base64-encoded 5 MB screenshot plus its JSON envelope.
const MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(health))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/doubts", post(doubts::post_doubt).get(doubts::get_all_doubts))
        .route("/doubts/my", get(doubts::get_my_doubts))
        .route(
            "/doubts/{doubt_id}",
            get(doubts::get_one_doubt)
                .patch(doubts::patch_doubt)
                .delete(doubts::remove_doubt),
        )
        .route("/doubts/{doubt_id}/resolve", patch(doubts::resolve_doubt))
        .route("/doubts/{doubt_id}/status", patch(doubts::toggle_doubt_status))
        .route("/doubts/{doubt_id}/comments/count", get(counts::comment_count))
        .route(
            "/doubts/{doubt_id}/comments",
            post(comments::post_comment).get(comments::get_comments),
        )
        .route(
            "/comments/{comment_id}",
            patch(comments::patch_comment).delete(comments::remove_comment),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service("/screenshots", ServeDir::new(state.screenshots.dir()))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}
