//! Authorization predicates shared by the doubt and comment operations.

use uuid::Uuid;

use doubtdesk_types::models::Role;

use crate::error::ApiError;
use crate::middleware::Identity;

pub fn require_student(identity: &Identity) -> Result<(), ApiError> {
    match identity.role {
        Role::Student => Ok(()),
        Role::Mentor => Err(ApiError::forbidden("Access denied. Students only.")),
    }
}

pub fn require_mentor(identity: &Identity) -> Result<(), ApiError> {
    match identity.role {
        Role::Mentor => Ok(()),
        Role::Student => Err(ApiError::forbidden("Access denied. Mentors only.")),
    }
}

pub fn owns(identity: &Identity, owner_id: Uuid) -> bool {
    identity.user_id == owner_id
}

/// Title, description, screenshot and deletion belong to the owning student alone.
pub fn ensure_doubt_owner(identity: &Identity, student_id: Uuid) -> Result<(), ApiError> {
    require_student(identity)?;
    if owns(identity, student_id) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Only the student who posted this doubt can change it"))
    }
}

/// Any mentor may toggle; a student only their own doubt.
pub fn can_toggle_status(identity: &Identity, student_id: Uuid) -> bool {
    match identity.role {
        Role::Mentor => true,
        Role::Student => owns(identity, student_id),
    }
}

/// Comments are edited and deleted by their author only, whatever the role.
pub fn ensure_comment_author(identity: &Identity, author_id: Uuid) -> Result<(), ApiError> {
    if owns(identity, author_id) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Only the author can change this comment"))
    }
}
