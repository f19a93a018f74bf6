use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Doubt, DoubtStatus, Role, StudentProfile};

// -- JWT Claims --

/// JWT claims issued at register/login and checked by the auth middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Returned by both register and login.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
    pub token: String,
}

// -- Doubts --

/// Screenshot carried inline as base64.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScreenshotUpload {
    pub filename: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDoubtRequest {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub screenshot: Option<ScreenshotUpload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateDoubtRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub screenshot: Option<ScreenshotUpload>,
    #[serde(default)]
    pub remove_screenshot: bool,
}

#[derive(Debug, Deserialize)]
pub struct DoubtListQuery {
    pub status: Option<DoubtStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DoubtResponse {
    #[serde(flatten)]
    pub doubt: Doubt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student: Option<StudentProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<u64>,
}

// -- Comments --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddCommentRequest {
    pub text: String,
    #[serde(default)]
    pub parent_comment_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditCommentRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteCommentResponse {
    pub msg: String,
    pub deleted: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommentCountResponse {
    pub doubt_id: Uuid,
    pub count: u64,
}

/// Generic body for messages and errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageBody {
    pub msg: String,
}
