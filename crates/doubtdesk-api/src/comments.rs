use axum::{
    Extension, Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use tracing::{debug, info};
use uuid::Uuid;

use doubtdesk_db::models::NewComment;
use doubtdesk_types::api::{AddCommentRequest, DeleteCommentResponse, EditCommentRequest};
use doubtdesk_types::models::{Author, Comment, CommentNode};

use crate::auth::{AppState, run_db};
use crate::authz;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath};
use crate::middleware::Identity;
use crate::rows;
use crate::tree;

fn validate_text(text: &str) -> Result<&str, ApiError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ApiError::validation("Comment text is required"));
    }
    Ok(text)
}

/// Post a root comment (`parent_id = None`) or a reply under an existing
/// comment of the same doubt.
pub async fn add_comment(
    state: &AppState,
    identity: &Identity,
    doubt_id: Uuid,
    text: &str,
    parent_id: Option<Uuid>,
) -> Result<Comment, ApiError> {
    let text = validate_text(text)?.to_string();
    state.limits.comments.check(&identity.user_id.to_string())?;

    let did = doubt_id.to_string();
    let pid = parent_id.map(|p| p.to_string());
    let (doubt_exists, parent_doubt) = run_db(state, move |db| {
        let doubt = db.get_doubt(&did)?;
        let parent_doubt = match &pid {
            Some(p) => db.get_comment(p)?.map(|c| c.doubt_id),
            None => None,
        };
        Ok((doubt.is_some(), parent_doubt))
    })
    .await?;

    if !doubt_exists {
        return Err(ApiError::not_found("Doubt"));
    }
    if parent_id.is_some() && parent_doubt != Some(doubt_id.to_string()) {
        return Err(ApiError::not_found("Parent comment"));
    }

    let id = Uuid::new_v4();
    let created_at = rows::now();
    {
        let (cid, did, pid, aid) = (
            id.to_string(),
            doubt_id.to_string(),
            parent_id.map(|p| p.to_string()),
            identity.user_id.to_string(),
        );
        let (text, at) = (text.clone(), rows::timestamp(created_at));
        run_db(state, move |db| {
            db.insert_comment(&NewComment {
                id: &cid,
                doubt_id: &did,
                parent_id: pid.as_deref(),
                author_id: &aid,
                text: &text,
                created_at: &at,
            })
        })
        .await?;
    }

    info!(
        "Comment {} on doubt {} by {} {}{}",
        id,
        doubt_id,
        identity.role,
        identity.user_id,
        parent_id.map(|p| format!(" (reply to {})", p)).unwrap_or_default()
    );

    Ok(Comment {
        id,
        doubt_id,
        parent_id,
        author: Author {
            id: identity.user_id,
            name: identity.name.clone(),
            role: identity.role,
        },
        text,
        created_at,
        updated_at: created_at,
    })
}

/// The doubt's comments as a forest of root comments with nested replies.
pub async fn list_comments_for_doubt(
    state: &AppState,
    identity: &Identity,
    doubt_id: Uuid,
) -> Result<Vec<CommentNode>, ApiError> {
    let did = doubt_id.to_string();
    let records = run_db(state, move |db| {
        if db.get_doubt(&did)?.is_none() {
            return Ok(None);
        }
        db.list_comments_for_doubt(&did).map(Some)
    })
    .await?
    .ok_or_else(|| ApiError::not_found("Doubt"))?;

    let comments = records.into_iter().filter_map(rows::comment_from_row).collect();
    let forest = tree::build_forest(comments);
    debug!(
        "{} listed {} comments ({} roots) on doubt {}",
        identity.user_id,
        tree::forest_len(&forest),
        forest.len(),
        doubt_id
    );
    Ok(forest)
}

/// Replace a comment's text in place. Author only.
pub async fn edit_comment(
    state: &AppState,
    identity: &Identity,
    comment_id: Uuid,
    new_text: &str,
) -> Result<Comment, ApiError> {
    let mut comment = load_comment(state, comment_id).await?;
    authz::ensure_comment_author(identity, comment.author.id)?;
    let text = validate_text(new_text)?.to_string();

    let updated_at = rows::now();
    let (cid, t, at) = (comment_id.to_string(), text.clone(), rows::timestamp(updated_at));
    let found = run_db(state, move |db| db.update_comment_text(&cid, &t, &at)).await?;
    if !found {
        return Err(ApiError::not_found("Comment"));
    }

    info!("Comment {} edited by {}", comment_id, identity.user_id);
    comment.text = text;
    comment.updated_at = updated_at;
    Ok(comment)
}

/// Delete a comment and every reply beneath it. Author only.
/// Returns how many comments were removed.
pub async fn delete_comment(
    state: &AppState,
    identity: &Identity,
    comment_id: Uuid,
) -> Result<usize, ApiError> {
    let comment = load_comment(state, comment_id).await?;
    authz::ensure_comment_author(identity, comment.author.id)?;

    let cid = comment_id.to_string();
    let removed = run_db(state, move |db| db.delete_comment_subtree(&cid)).await?;
    if removed == 0 {
        return Err(ApiError::not_found("Comment"));
    }

    info!(
        "Comment {} deleted by {} with {} nested replies",
        comment_id,
        identity.user_id,
        removed - 1
    );
    Ok(removed)
}

async fn load_comment(state: &AppState, comment_id: Uuid) -> Result<Comment, ApiError> {
    let cid = comment_id.to_string();
    run_db(state, move |db| db.get_comment(&cid))
        .await?
        .and_then(rows::comment_from_row)
        .ok_or_else(|| ApiError::not_found("Comment"))
}

// -- Handlers --

/// POST /doubts/{doubt_id}/comments
pub async fn post_comment(
    State(state): State<AppState>,
    ApiPath(doubt_id): ApiPath<Uuid>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<AddCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = add_comment(&state, &identity, doubt_id, &req.text, req.parent_comment_id).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// GET /doubts/{doubt_id}/comments
pub async fn get_comments(
    State(state): State<AppState>,
    ApiPath(doubt_id): ApiPath<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let forest = list_comments_for_doubt(&state, &identity, doubt_id).await?;
    let body = tree::forest_json(&forest).map_err(anyhow::Error::from)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

/// PATCH /comments/{comment_id}
pub async fn patch_comment(
    State(state): State<AppState>,
    ApiPath(comment_id): ApiPath<Uuid>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<EditCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(edit_comment(&state, &identity, comment_id, &req.text).await?))
}

/// DELETE /comments/{comment_id}
pub async fn remove_comment(
    State(state): State<AppState>,
    ApiPath(comment_id): ApiPath<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = delete_comment(&state, &identity, comment_id).await?;
    Ok(Json(DeleteCommentResponse {
        msg: "Comment and its replies deleted".into(),
        deleted,
    }))
}
