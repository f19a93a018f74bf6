//! Conversions from `doubtdesk-db` rows to API models.
//! Corrupt columns are logged and replaced with defaults rather than failing a whole listing.

use chrono::{DateTime, SubsecRound, Utc};
use tracing::warn;
use uuid::Uuid;

use doubtdesk_db::models::{CommentRow, DoubtRow};
use doubtdesk_types::models::{Author, Comment, Doubt, DoubtStatus, Role, Screenshot, StudentProfile};

/// Current time at the precision timestamps are stored with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub fn parse_uuid(field: &str, value: &str, owner: &str) -> Uuid {
    value.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on '{}': {}", field, value, owner, e);
        Uuid::default()
    })
}

pub fn parse_timestamp(value: &str, owner: &str) -> DateTime<Utc> {
    value
        .parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') format has no timezone; treat it as UTC.
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on '{}': {}", value, owner, e);
            DateTime::default()
        })
}

fn required_uuid(field: &str, value: &str, owner: &str) -> Option<Uuid> {
    match value.parse() {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Corrupt {} '{}' on comment '{}': {}; skipping it", field, value, owner, e);
            None
        }
    }
}

/// `None` when the comment's own id, doubt or author cannot be read. Such rows
/// would collide under a placeholder id, so they are left out. A corrupt parent
/// reference only demotes the comment to a root.
pub fn comment_from_row(row: CommentRow) -> Option<Comment> {
    let id = required_uuid("id", &row.id, &row.id)?;
    let doubt_id = required_uuid("doubt_id", &row.doubt_id, &row.id)?;
    let author_id = required_uuid("author_id", &row.author_id, &row.id)?;
    let parent_id = row.parent_id.as_deref().and_then(|p| match p.parse() {
        Ok(pid) => Some(pid),
        Err(e) => {
            warn!("Corrupt parent_id '{}' on comment '{}': {}", p, row.id, e);
            None
        }
    });
    let role = row.author_role.parse().unwrap_or_else(|e| {
        warn!("Corrupt author role on comment '{}': {}", row.id, e);
        Role::Student
    });

    Some(Comment {
        id,
        doubt_id,
        parent_id,
        author: Author {
            id: author_id,
            name: row.author_name,
            role,
        },
        created_at: parse_timestamp(&row.created_at, &row.id),
        updated_at: parse_timestamp(&row.updated_at, &row.id),
        text: row.text,
    })
}

pub fn doubt_from_row(row: DoubtRow) -> (Doubt, StudentProfile) {
    let status = row.status.parse().unwrap_or_else(|e| {
        warn!("Corrupt status on doubt '{}': {}", row.id, e);
        DoubtStatus::Open
    });

    let screenshot = match (row.screenshot_url, row.screenshot_file_id) {
        (Some(url), Some(file_id)) => Some(Screenshot { url, file_id }),
        _ => None,
    };

    let student_id = parse_uuid("student_id", &row.student_id, &row.id);
    let doubt = Doubt {
        id: parse_uuid("id", &row.id, &row.id),
        student_id,
        title: row.title,
        description: row.description,
        screenshot,
        status,
        created_at: parse_timestamp(&row.created_at, &row.id),
        updated_at: parse_timestamp(&row.updated_at, &row.id),
    };
    let student = StudentProfile {
        id: student_id,
        name: row.student_name,
        email: row.student_email,
    };
    (doubt, student)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_round_trip_and_tolerate_sqlite_format() {
        let at = now();
        assert_eq!(parse_timestamp(&timestamp(at), "x"), at);

        let naive = parse_timestamp("2026-03-04 05:06:07", "x");
        assert_eq!(timestamp(naive), "2026-03-04T05:06:07.000000Z");

        assert_eq!(parse_timestamp("garbage", "x"), DateTime::<Utc>::default());
    }

    fn comment_row(id: &str, parent: Option<&str>) -> CommentRow {
        CommentRow {
            id: id.into(),
            doubt_id: Uuid::new_v4().to_string(),
            parent_id: parent.map(str::to_string),
            author_id: Uuid::new_v4().to_string(),
            author_name: "Ravi".into(),
            author_role: "mentor".into(),
            text: "t".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn unreadable_comment_ids_are_skipped() {
        assert!(comment_from_row(comment_row("not-a-uuid", None)).is_none());
        assert!(comment_from_row(comment_row("also-bad", None)).is_none());

        let mut row = comment_row(&Uuid::new_v4().to_string(), None);
        row.author_id = "???".into();
        assert!(comment_from_row(row).is_none());

        let id = Uuid::new_v4();
        let demoted = comment_from_row(comment_row(&id.to_string(), Some("broken"))).unwrap();
        assert_eq!(demoted.id, id);
        assert_eq!(demoted.parent_id, None);
        assert_eq!(demoted.author.role, Role::Mentor);
    }

    #[test]
    fn half_screenshot_reference_is_dropped() {
        let row = DoubtRow {
            id: Uuid::new_v4().to_string(),
            student_id: Uuid::new_v4().to_string(),
            student_name: "Asha".into(),
            student_email: "asha@example.com".into(),
            title: "t".into(),
            description: "d".into(),
            screenshot_url: Some("http://x/y.png".into()),
            screenshot_file_id: None,
            status: "resolved".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        };
        let (doubt, student) = doubt_from_row(row);
        assert!(doubt.screenshot.is_none());
        assert_eq!(doubt.status, DoubtStatus::Resolved);
        assert_eq!(student.id, doubt.student_id);
    }
}
