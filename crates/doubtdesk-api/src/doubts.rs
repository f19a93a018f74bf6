use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tracing::{info, warn};
use uuid::Uuid;

use doubtdesk_db::models::NewDoubt;
use doubtdesk_types::api::{
    CreateDoubtRequest, DoubtListQuery, DoubtResponse, MessageBody, ScreenshotUpload, UpdateDoubtRequest,
};
use doubtdesk_types::models::{Doubt, DoubtStatus, Screenshot, StudentProfile};

use crate::auth::{AppState, run_db};
use crate::authz;
use crate::counts;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::middleware::Identity;
use crate::rows;
use crate::storage::MAX_SCREENSHOT_SIZE;

fn required(field: &str, value: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

fn decode_screenshot(upload: &ScreenshotUpload) -> Result<Vec<u8>, ApiError> {
    let bytes = B64
        .decode(upload.data.trim())
        .map_err(|_| ApiError::validation("Screenshot is not valid base64"))?;
    if bytes.is_empty() {
        return Err(ApiError::validation("Screenshot is empty"));
    }
    if bytes.len() > MAX_SCREENSHOT_SIZE {
        return Err(ApiError::validation(format!(
            "Screenshot exceeds {} MB",
            MAX_SCREENSHOT_SIZE / (1024 * 1024)
        )));
    }
    Ok(bytes)
}

async fn load_doubt(state: &AppState, doubt_id: Uuid) -> Result<(Doubt, StudentProfile), ApiError> {
    let did = doubt_id.to_string();
    run_db(state, move |db| db.get_doubt(&did))
        .await?
        .map(rows::doubt_from_row)
        .ok_or_else(|| ApiError::not_found("Doubt"))
}

async fn respond(state: &AppState, doubt_id: Uuid) -> Result<DoubtResponse, ApiError> {
    let (doubt, student) = load_doubt(state, doubt_id).await?;
    let count = counts::count_for_doubt(state, doubt_id).await?;
    Ok(DoubtResponse {
        doubt,
        student: Some(student),
        comment_count: Some(count),
    })
}

/// Attach comment counts to a listing in one batch query.
async fn with_counts(
    state: &AppState,
    doubts: Vec<(Doubt, StudentProfile)>,
) -> Result<Vec<DoubtResponse>, ApiError> {
    let ids: Vec<Uuid> = doubts.iter().map(|(d, _)| d.id).collect();
    let counts = counts::count_all_for_doubts(state, &ids).await?;
    Ok(doubts
        .into_iter()
        .map(|(doubt, student)| {
            let count = counts.get(&doubt.id).copied().unwrap_or(0);
            DoubtResponse {
                doubt,
                student: Some(student),
                comment_count: Some(count),
            }
        })
        .collect())
}

/// Release a screenshot that was stored but never recorded.
async fn discard(state: &AppState, shot: &Screenshot) {
    if let Err(e) = state.screenshots.delete(&shot.file_id).await {
        warn!("Failed to discard unrecorded screenshot {}: {:#}", shot.file_id, e);
    }
}

pub async fn create_doubt(
    state: &AppState,
    identity: &Identity,
    req: CreateDoubtRequest,
) -> Result<DoubtResponse, ApiError> {
    authz::require_student(identity)?;
    let title = required("Title", &req.title)?;
    let description = required("Description", &req.description)?;
    let screenshot_bytes = req.screenshot.as_ref().map(decode_screenshot).transpose()?;
    state.limits.doubts.check(&identity.user_id.to_string())?;

    let screenshot = match (&req.screenshot, screenshot_bytes) {
        (Some(upload), Some(bytes)) => Some(state.screenshots.upload(&bytes, &upload.filename).await?),
        _ => None,
    };

    let id = Uuid::new_v4();
    let result = {
        let (did, sid, at) = (id.to_string(), identity.user_id.to_string(), rows::timestamp(rows::now()));
        let (t, d, shot) = (title.clone(), description, screenshot.clone());
        run_db(state, move |db| {
            db.insert_doubt(&NewDoubt {
                id: &did,
                student_id: &sid,
                title: &t,
                description: &d,
                screenshot_url: shot.as_ref().map(|s| s.url.as_str()),
                screenshot_file_id: shot.as_ref().map(|s| s.file_id.as_str()),
                created_at: &at,
            })
        })
        .await
    };
    if let Err(e) = result {
        if let Some(shot) = &screenshot {
            discard(state, shot).await;
        }
        return Err(e);
    }

    info!("Doubt {} '{}' created by {}", id, title, identity.user_id);
    respond(state, id).await
}

/// The caller's own doubts, newest first.
pub async fn list_my_doubts(state: &AppState, identity: &Identity) -> Result<Vec<DoubtResponse>, ApiError> {
    authz::require_student(identity)?;
    let sid = identity.user_id.to_string();
    let doubts = run_db(state, move |db| db.list_doubts_by_student(&sid)).await?;
    with_counts(state, doubts.into_iter().map(rows::doubt_from_row).collect()).await
}

/// Every doubt for mentors, newest first, optionally filtered by status.
pub async fn list_all_doubts(
    state: &AppState,
    identity: &Identity,
    status: Option<DoubtStatus>,
) -> Result<Vec<DoubtResponse>, ApiError> {
    authz::require_mentor(identity)?;
    let doubts = run_db(state, move |db| db.list_doubts(status.map(|s| s.as_str()))).await?;
    with_counts(state, doubts.into_iter().map(rows::doubt_from_row).collect()).await
}

pub async fn get_doubt(state: &AppState, _identity: &Identity, doubt_id: Uuid) -> Result<DoubtResponse, ApiError> {
    respond(state, doubt_id).await
}

/// Edit title, description or screenshot. Owning student only.
///
/// A replaced or removed screenshot is released from storage before the
/// record stops pointing at it.
pub async fn update_doubt(
    state: &AppState,
    identity: &Identity,
    doubt_id: Uuid,
    req: UpdateDoubtRequest,
) -> Result<DoubtResponse, ApiError> {
    let (doubt, _) = load_doubt(state, doubt_id).await?;
    authz::ensure_doubt_owner(identity, doubt.student_id)?;

    if req.screenshot.is_some() && req.remove_screenshot {
        return Err(ApiError::validation("Cannot replace and remove the screenshot at once"));
    }
    let title = match &req.title {
        Some(t) => required("Title", t)?,
        None => doubt.title.clone(),
    };
    let description = match &req.description {
        Some(d) => required("Description", d)?,
        None => doubt.description.clone(),
    };
    let new_bytes = req.screenshot.as_ref().map(decode_screenshot).transpose()?;

    let replacement = match (&req.screenshot, new_bytes) {
        (Some(upload), Some(bytes)) => Some(state.screenshots.upload(&bytes, &upload.filename).await?),
        _ => None,
    };

    let screenshot = if replacement.is_some() || req.remove_screenshot {
        if let Some(old) = &doubt.screenshot {
            if let Err(e) = state.screenshots.delete(&old.file_id).await {
                if let Some(shot) = &replacement {
                    discard(state, shot).await;
                }
                return Err(e.into());
            }
        }
        replacement.clone()
    } else {
        doubt.screenshot.clone()
    };

    let result = {
        let (did, at) = (doubt_id.to_string(), rows::timestamp(rows::now()));
        let shot = screenshot.clone();
        run_db(state, move |db| {
            db.update_doubt(
                &did,
                &title,
                &description,
                shot.as_ref().map(|s| (s.url.as_str(), s.file_id.as_str())),
                &at,
            )
        })
        .await
    };
    match result {
        Ok(true) => {}
        Ok(false) => return Err(ApiError::not_found("Doubt")),
        Err(e) => {
            if let Some(shot) = &replacement {
                discard(state, shot).await;
            }
            return Err(e);
        }
    }

    info!("Doubt {} updated by {}", doubt_id, identity.user_id);
    respond(state, doubt_id).await
}

/// Delete a doubt, its screenshot and all of its comments. Owning student only.
pub async fn delete_doubt(state: &AppState, identity: &Identity, doubt_id: Uuid) -> Result<(), ApiError> {
    let (doubt, _) = load_doubt(state, doubt_id).await?;
    authz::ensure_doubt_owner(identity, doubt.student_id)?;

    if let Some(shot) = &doubt.screenshot {
        state.screenshots.delete(&shot.file_id).await?;
    }

    let did = doubt_id.to_string();
    if !run_db(state, move |db| db.delete_doubt(&did)).await? {
        return Err(ApiError::not_found("Doubt"));
    }

    info!("Doubt {} deleted by {}", doubt_id, identity.user_id);
    Ok(())
}

/// One-way transition to resolved. Owning student only; resolving twice is harmless.
pub async fn mark_resolved(state: &AppState, identity: &Identity, doubt_id: Uuid) -> Result<DoubtResponse, ApiError> {
    let (doubt, _) = load_doubt(state, doubt_id).await?;
    authz::ensure_doubt_owner(identity, doubt.student_id)?;

    let (did, at) = (doubt_id.to_string(), rows::timestamp(rows::now()));
    let found = run_db(state, move |db| {
        db.set_doubt_status(&did, DoubtStatus::Resolved.as_str(), &at)
    })
    .await?;
    if !found {
        return Err(ApiError::not_found("Doubt"));
    }

    info!("Doubt {} marked resolved by {}", doubt_id, identity.user_id);
    respond(state, doubt_id).await
}

/// Flip open <-> resolved. Any mentor, or the student who owns the doubt.
pub async fn toggle_status(state: &AppState, identity: &Identity, doubt_id: Uuid) -> Result<DoubtResponse, ApiError> {
    let (doubt, _) = load_doubt(state, doubt_id).await?;
    if !authz::can_toggle_status(identity, doubt.student_id) {
        return Err(ApiError::forbidden("Only the owning student or a mentor can change the status"));
    }

    let (did, at) = (doubt_id.to_string(), rows::timestamp(rows::now()));
    let status = run_db(state, move |db| db.toggle_doubt_status(&did, &at))
        .await?
        .ok_or_else(|| ApiError::not_found("Doubt"))?;

    info!("Doubt {} is now {} ({} {})", doubt_id, status, identity.role, identity.user_id);
    respond(state, doubt_id).await
}

// -- Handlers --

/// POST /doubts
pub async fn post_doubt(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<CreateDoubtRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let doubt = create_doubt(&state, &identity, req).await?;
    Ok((StatusCode::CREATED, Json(doubt)))
}

/// GET /doubts/my
pub async fn get_my_doubts(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(list_my_doubts(&state, &identity).await?))
}

/// GET /doubts
pub async fn get_all_doubts(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<DoubtListQuery>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(list_all_doubts(&state, &identity, query.status).await?))
}

/// GET /doubts/{doubt_id}
pub async fn get_one_doubt(
    State(state): State<AppState>,
    ApiPath(doubt_id): ApiPath<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(get_doubt(&state, &identity, doubt_id).await?))
}

/// PATCH /doubts/{doubt_id}
pub async fn patch_doubt(
    State(state): State<AppState>,
    ApiPath(doubt_id): ApiPath<Uuid>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<UpdateDoubtRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(update_doubt(&state, &identity, doubt_id, req).await?))
}

/// DELETE /doubts/{doubt_id}
pub async fn remove_doubt(
    State(state): State<AppState>,
    ApiPath(doubt_id): ApiPath<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    delete_doubt(&state, &identity, doubt_id).await?;
    Ok(Json(MessageBody {
        msg: "Doubt deleted successfully".into(),
    }))
}

/// PATCH /doubts/{doubt_id}/resolve
pub async fn resolve_doubt(
    State(state): State<AppState>,
    ApiPath(doubt_id): ApiPath<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(mark_resolved(&state, &identity, doubt_id).await?))
}

/// PATCH /doubts/{doubt_id}/status
pub async fn toggle_doubt_status(
    State(state): State<AppState>,
    ApiPath(doubt_id): ApiPath<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(toggle_status(&state, &identity, doubt_id).await?))
}
