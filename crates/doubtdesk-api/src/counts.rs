use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};
use uuid::Uuid;

use doubtdesk_types::api::CommentCountResponse;

use crate::auth::{AppState, run_db};
use crate::error::ApiError;
use crate::extract::ApiPath;
use crate::middleware::Identity;

/// Every comment of the doubt, replies at any depth included.
/// Recomputed on each call; nothing is cached.
pub async fn count_for_doubt(state: &AppState, doubt_id: Uuid) -> Result<u64, ApiError> {
    let did = doubt_id.to_string();
    run_db(state, move |db| db.count_comments_for_doubt(&did)).await
}

/// Batch form of [`count_for_doubt`] used by listings. Every requested id gets an entry.
pub async fn count_all_for_doubts(
    state: &AppState,
    doubt_ids: &[Uuid],
) -> Result<HashMap<Uuid, u64>, ApiError> {
    let ids: Vec<String> = doubt_ids.iter().map(Uuid::to_string).collect();
    let counts = run_db(state, move |db| db.count_comments_for_doubts(&ids)).await?;

    Ok(doubt_ids
        .iter()
        .map(|id| (*id, counts.get(&id.to_string()).copied().unwrap_or(0)))
        .collect())
}

/// GET /doubts/{doubt_id}/comments/count
pub async fn comment_count(
    State(state): State<AppState>,
    ApiPath(doubt_id): ApiPath<Uuid>,
    Extension(_identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let did = doubt_id.to_string();
    if run_db(&state, move |db| db.get_doubt(&did)).await?.is_none() {
        return Err(ApiError::not_found("Doubt"));
    }
    let count = count_for_doubt(&state, doubt_id).await?;
    Ok(Json(CommentCountResponse { doubt_id, count }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comments::add_comment;
    use crate::doubts::create_doubt;
    use crate::testing::{test_state, user};
    use doubtdesk_types::api::CreateDoubtRequest;
    use doubtdesk_types::models::Role;

    #[tokio::test]
    async fn batch_counts_agree_with_single_counts() {
        let state = test_state().await;
        let student = user(&state, "Asha", Role::Student);
        let mentor = user(&state, "Ravi", Role::Mentor);

        let mut doubt_ids = Vec::new();
        for replies in [0usize, 1, 4] {
            let d = create_doubt(
                &state,
                &student,
                CreateDoubtRequest {
                    title: format!("doubt with {} replies", replies),
                    description: "details".into(),
                    screenshot: None,
                },
            )
            .await
            .unwrap()
            .doubt
            .id;
            let mut parent = None;
            for i in 0..replies {
                let c = add_comment(&state, &mentor, d, &format!("r{}", i), parent).await.unwrap();
                parent = Some(c.id);
            }
            doubt_ids.push(d);
        }
        let unknown = Uuid::new_v4();
        doubt_ids.push(unknown);

        let batch = count_all_for_doubts(&state, &doubt_ids).await.unwrap();
        assert_eq!(batch.len(), doubt_ids.len());
        for id in &doubt_ids {
            assert_eq!(batch[id], count_for_doubt(&state, *id).await.unwrap());
        }
        assert_eq!(batch[&doubt_ids[2]], 4);
        assert_eq!(batch[&unknown], 0);
        assert!(count_all_for_doubts(&state, &[]).await.unwrap().is_empty());
    }
}
