//! Rows as SQLite returns them: string ids and RFC 3339 timestamps.
//! Conversion into `doubtdesk_types` models happens in the API layer.

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub created_at: String,
}

/// A doubt joined with its owning student's public profile.
pub struct DoubtRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub student_email: String,
    pub title: String,
    pub description: String,
    pub screenshot_url: Option<String>,
    pub screenshot_file_id: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct NewDoubt<'a> {
    pub id: &'a str,
    pub student_id: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub screenshot_url: Option<&'a str>,
    pub screenshot_file_id: Option<&'a str>,
    pub created_at: &'a str,
}

/// A comment joined with its author's name and role.
pub struct CommentRow {
    pub id: String,
    pub doubt_id: String,
    pub parent_id: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub author_role: String,
    pub text: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct NewComment<'a> {
    pub id: &'a str,
    pub doubt_id: &'a str,
    pub parent_id: Option<&'a str>,
    pub author_id: &'a str,
    pub text: &'a str,
    pub created_at: &'a str,
}
