use std::collections::{HashMap, HashSet};

use crate::models::{CommentRow, DoubtRow, NewComment, NewDoubt, UserRow};
use crate::Database;
use anyhow::Result;
use rusqlite::Connection;
use tracing::warn;

const DOUBT_COLUMNS: &str = "d.id, d.student_id, u.name, u.email, d.title, d.description,
     d.screenshot_url, d.screenshot_file_id, d.status, d.created_at, d.updated_at";

/// Ids bound per `DELETE ... IN (...)` statement.
const DELETE_BATCH: usize = 500;

const COMMENT_COLUMNS: &str = "c.id, c.doubt_id, c.parent_id, c.author_id, u.name, u.role,
     c.text, c.created_at, c.updated_at";

impl Database {
    // -- Users --

    /// Returns false when the email is already registered.
    pub fn create_user(
        &self,
        id: &str,
        name: &str,
        email: &str,
        password_hash: &str,
        role: &str,
        created_at: &str,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, name, email, password, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, name, email, password_hash, role, created_at),
            );
            match inserted {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Doubts --

    pub fn insert_doubt(&self, doubt: &NewDoubt<'_>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO doubts (id, student_id, title, description, screenshot_url,
                                     screenshot_file_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'open', ?7, ?7)",
                rusqlite::params![
                    doubt.id,
                    doubt.student_id,
                    doubt.title,
                    doubt.description,
                    doubt.screenshot_url,
                    doubt.screenshot_file_id,
                    doubt.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_doubt(&self, id: &str) -> Result<Option<DoubtRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {DOUBT_COLUMNS} FROM doubts d JOIN users u ON d.student_id = u.id
                 WHERE d.id = ?1"
            );
            conn.query_row(&sql, [id], map_doubt).optional()
        })
    }

    /// Doubts owned by one student, newest first.
    pub fn list_doubts_by_student(&self, student_id: &str) -> Result<Vec<DoubtRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {DOUBT_COLUMNS} FROM doubts d JOIN users u ON d.student_id = u.id
                 WHERE d.student_id = ?1
                 ORDER BY d.created_at DESC, d.rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([student_id], map_doubt)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// All doubts, newest first, optionally restricted to one status.
    pub fn list_doubts(&self, status: Option<&str>) -> Result<Vec<DoubtRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {DOUBT_COLUMNS} FROM doubts d JOIN users u ON d.student_id = u.id
                 WHERE ?1 IS NULL OR d.status = ?1
                 ORDER BY d.created_at DESC, d.rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([status], map_doubt)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Overwrite the editable fields of a doubt. Returns false if it does not exist.
    pub fn update_doubt(
        &self,
        id: &str,
        title: &str,
        description: &str,
        screenshot: Option<(&str, &str)>,
        updated_at: &str,
    ) -> Result<bool> {
        let (url, file_id) = screenshot.unzip();
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE doubts
                 SET title = ?2, description = ?3, screenshot_url = ?4,
                     screenshot_file_id = ?5, updated_at = ?6
                 WHERE id = ?1",
                rusqlite::params![id, title, description, url, file_id, updated_at],
            )?;
            Ok(n > 0)
        })
    }

    pub fn set_doubt_status(&self, id: &str, status: &str, updated_at: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE doubts SET status = ?2, updated_at = ?3 WHERE id = ?1",
                (id, status, updated_at),
            )?;
            Ok(n > 0)
        })
    }

    /// Flip open <-> resolved in a single statement.
    /// Returns the new status, or `None` if the doubt is gone.
    pub fn toggle_doubt_status(&self, id: &str, updated_at: &str) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE doubts
                 SET status = CASE status WHEN 'open' THEN 'resolved' ELSE 'open' END,
                     updated_at = ?2
                 WHERE id = ?1",
                (id, updated_at),
            )?;
            if n == 0 {
                return Ok(None);
            }
            let status = conn.query_row("SELECT status FROM doubts WHERE id = ?1", [id], |row| {
                row.get::<_, String>(0)
            })?;
            Ok(Some(status))
        })
    }

    /// Delete a doubt together with all of its comments. Returns false if it did not exist.
    pub fn delete_doubt(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let comments = conn.execute("DELETE FROM comments WHERE doubt_id = ?1", [id])?;
            let n = conn.execute("DELETE FROM doubts WHERE id = ?1", [id])?;
            if n > 0 && comments > 0 {
                tracing::debug!("Deleted {} comments with doubt {}", comments, id);
            }
            Ok(n > 0)
        })
    }

    // -- Comments --

    pub fn insert_comment(&self, comment: &NewComment<'_>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO comments (id, doubt_id, parent_id, author_id, text, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![
                    comment.id,
                    comment.doubt_id,
                    comment.parent_id,
                    comment.author_id,
                    comment.text,
                    comment.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_comment(&self, id: &str) -> Result<Option<CommentRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {COMMENT_COLUMNS} FROM comments c LEFT JOIN users u ON c.author_id = u.id
                 WHERE c.id = ?1"
            );
            conn.query_row(&sql, [id], map_comment).optional()
        })
    }

    /// Every comment of a doubt, in append order (oldest first).
    pub fn list_comments_for_doubt(&self, doubt_id: &str) -> Result<Vec<CommentRow>> {
        self.with_conn(|conn| {
            // Author name and role come along in the same query
            let sql = format!(
                "SELECT {COMMENT_COLUMNS} FROM comments c LEFT JOIN users u ON c.author_id = u.id
                 WHERE c.doubt_id = ?1
                 ORDER BY c.seq ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([doubt_id], map_comment)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_comment_text(&self, id: &str, text: &str, updated_at: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE comments SET text = ?2, updated_at = ?3 WHERE id = ?1",
                (id, text, updated_at),
            )?;
            Ok(n > 0)
        })
    }

    /// Delete a comment and every reply beneath it in one transaction.
    /// Rows are removed leaves first so no reply outlives its parent.
    /// Returns the number of comments removed (0 if `root` does not exist).
    pub fn delete_comment_subtree(&self, root: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let exists: Option<String> = conn
                .query_row("SELECT id FROM comments WHERE id = ?1", [root], |row| row.get(0))
                .optional()?;
            if exists.is_none() {
                return Ok(0);
            }

            let ids = collect_subtree(conn, root)?;
            let mut removed = 0;
            // Chunks preserve leaves-first order.
            for chunk in ids.chunks(DELETE_BATCH) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!("DELETE FROM comments WHERE id IN ({})", placeholders);
                removed += conn.execute(&sql, rusqlite::params_from_iter(chunk))?;
            }
            Ok(removed)
        })
    }

    pub fn count_comments_for_doubt(&self, doubt_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM comments WHERE doubt_id = ?1",
                [doubt_id],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }

    /// Batch variant of `count_comments_for_doubt`. Every requested id is
    /// present in the result; doubts without comments map to 0.
    pub fn count_comments_for_doubts(&self, doubt_ids: &[String]) -> Result<HashMap<String, u64>> {
        let mut counts: HashMap<String, u64> =
            doubt_ids.iter().map(|id| (id.clone(), 0)).collect();
        if doubt_ids.is_empty() {
            return Ok(counts);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=doubt_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT doubt_id, COUNT(*) FROM comments WHERE doubt_id IN ({}) GROUP BY doubt_id",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = doubt_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for (doubt_id, n) in rows {
                counts.insert(doubt_id, n as u64);
            }
            Ok(counts)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, name, email, password, role, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                role: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_doubt(row: &rusqlite::Row<'_>) -> rusqlite::Result<DoubtRow> {
    Ok(DoubtRow {
        id: row.get(0)?,
        student_id: row.get(1)?,
        student_name: row.get(2)?,
        student_email: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        screenshot_url: row.get(6)?,
        screenshot_file_id: row.get(7)?,
        status: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn map_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        doubt_id: row.get(1)?,
        parent_id: row.get(2)?,
        author_id: row.get(3)?,
        author_name: row.get::<_, Option<String>>(4)?.unwrap_or_else(|| "unknown".to_string()),
        author_role: row.get::<_, Option<String>>(5)?.unwrap_or_else(|| "student".to_string()),
        text: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Ids of `root` and all of its descendants, leaves first, `root` last.
/// One child lookup per node.
fn collect_subtree(conn: &Connection, root: &str) -> Result<Vec<String>> {
    let mut children_of = conn.prepare("SELECT id FROM comments WHERE parent_id = ?1 ORDER BY seq")?;

    let mut order = Vec::new();
    let mut seen = HashSet::new();
    // (id, children already pushed)
    let mut stack = vec![(root.to_string(), false)];

    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(id);
            continue;
        }
        if !seen.insert(id.clone()) {
            warn!("Comment {} reached twice while walking replies; skipping", id);
            continue;
        }

        let children = children_of
            .query_map([&id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        stack.push((id, true));
        for child in children.into_iter().rev() {
            stack.push((child, false));
        }
    }

    Ok(order)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "2026-01-01T00:00:00Z";

    fn seed() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user("s1", "Asha", "asha@example.com", "hash", "student", NOW).unwrap();
        db.create_user("m1", "Ravi", "ravi@example.com", "hash", "mentor", NOW).unwrap();
        for id in ["d1", "d2"] {
            db.insert_doubt(&NewDoubt {
                id,
                student_id: "s1",
                title: "Borrow checker",
                description: "Why does this not compile?",
                screenshot_url: None,
                screenshot_file_id: None,
                created_at: NOW,
            })
            .unwrap();
        }
        db
    }

    fn comment(db: &Database, id: &str, doubt: &str, parent: Option<&str>) {
        db.insert_comment(&NewComment {
            id,
            doubt_id: doubt,
            parent_id: parent,
            author_id: "m1",
            text: "look at the lifetimes",
            created_at: NOW,
        })
        .unwrap();
    }

    #[test]
    fn comments_list_in_append_order_with_author() {
        let db = seed();
        comment(&db, "c1", "d1", None);
        comment(&db, "c2", "d1", Some("c1"));
        comment(&db, "c3", "d1", None);
        comment(&db, "x1", "d2", None);

        let rows = db.list_comments_for_doubt("d1").unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(rows[0].author_name, "Ravi");
        assert_eq!(rows[0].author_role, "mentor");
        assert_eq!(rows[1].parent_id.as_deref(), Some("c1"));
    }

    #[test]
    fn duplicate_email_is_reported_not_raised() {
        let db = seed();
        assert!(!db.create_user("s2", "Imposter", "asha@example.com", "hash", "student", NOW).unwrap());
        assert!(db.get_user_by_id("s2").unwrap().is_none());
        assert!(db.create_user("s3", "Bo", "bo@example.com", "hash", "student", NOW).unwrap());
    }

    #[test]
    fn parent_must_exist() {
        let db = seed();
        let result = db.insert_comment(&NewComment {
            id: "c1",
            doubt_id: "d1",
            parent_id: Some("missing"),
            author_id: "m1",
            text: "orphan",
            created_at: NOW,
        });
        assert!(result.is_err());
    }

    #[test]
    fn subtree_is_collected_leaves_first() {
        let db = seed();
        comment(&db, "a", "d1", None);
        comment(&db, "b", "d1", Some("a"));
        comment(&db, "c", "d1", Some("b"));
        comment(&db, "d", "d1", Some("a"));
        comment(&db, "e", "d1", None);

        let order = db.with_conn(|conn| collect_subtree(conn, "a")).unwrap();
        assert_eq!(order, vec!["c", "b", "d", "a"]);

        let position = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(position("c") < position("b"));
        assert!(position("b") < position("a"));
    }

    #[test]
    fn delete_subtree_removes_descendants_only() {
        let db = seed();
        comment(&db, "a", "d1", None);
        comment(&db, "b", "d1", Some("a"));
        comment(&db, "c", "d1", Some("b"));
        comment(&db, "e", "d1", None);

        assert_eq!(db.delete_comment_subtree("b").unwrap(), 2);
        let ids: Vec<String> = db
            .list_comments_for_doubt("d1")
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a", "e"]);

        assert_eq!(db.delete_comment_subtree("missing").unwrap(), 0);
    }

    #[test]
    fn deep_chain_deletes_across_batches() {
        let db = seed();
        let depth = DELETE_BATCH * 2 + 7;
        comment(&db, "n0", "d1", None);
        for i in 1..depth {
            comment(&db, &format!("n{}", i), "d1", Some(format!("n{}", i - 1).as_str()));
        }

        assert_eq!(db.with_conn(|conn| collect_subtree(conn, "n0")).unwrap().len(), depth);
        assert_eq!(db.delete_comment_subtree("n0").unwrap(), depth);
        assert_eq!(db.count_comments_for_doubt("d1").unwrap(), 0);
    }

    #[test]
    fn batch_counts_match_single_counts() {
        let db = seed();
        comment(&db, "c1", "d1", None);
        comment(&db, "c2", "d1", Some("c1"));
        comment(&db, "c3", "d1", Some("c2"));

        let ids = vec!["d1".to_string(), "d2".to_string(), "nope".to_string()];
        let counts = db.count_comments_for_doubts(&ids).unwrap();
        for id in &ids {
            assert_eq!(counts[id], db.count_comments_for_doubt(id).unwrap());
        }
        assert_eq!(counts["d1"], 3);
        assert_eq!(counts["d2"], 0);
        assert!(db.count_comments_for_doubts(&[]).unwrap().is_empty());
    }

    #[test]
    fn toggle_flips_and_reports_missing() {
        let db = seed();
        assert_eq!(db.toggle_doubt_status("d1", NOW).unwrap().as_deref(), Some("resolved"));
        assert_eq!(db.toggle_doubt_status("d1", NOW).unwrap().as_deref(), Some("open"));
        assert_eq!(db.toggle_doubt_status("missing", NOW).unwrap(), None);
    }

    #[test]
    fn deleting_doubt_removes_its_comments() {
        let db = seed();
        comment(&db, "c1", "d1", None);
        comment(&db, "c2", "d1", Some("c1"));
        comment(&db, "x1", "d2", None);

        assert!(db.delete_doubt("d1").unwrap());
        assert!(db.get_doubt("d1").unwrap().is_none());
        assert_eq!(db.count_comments_for_doubt("d1").unwrap(), 0);
        assert_eq!(db.count_comments_for_doubt("d2").unwrap(), 1);
        assert!(!db.delete_doubt("d1").unwrap());
    }

    #[test]
    fn list_doubts_filters_by_status() {
        let db = seed();
        db.set_doubt_status("d2", "resolved", NOW).unwrap();

        assert_eq!(db.list_doubts(None).unwrap().len(), 2);
        let resolved = db.list_doubts(Some("resolved")).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, "d2");
        assert_eq!(resolved[0].student_name, "Asha");
        assert_eq!(db.list_doubts_by_student("m1").unwrap().len(), 0);
    }
}
