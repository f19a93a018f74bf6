use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                role        TEXT NOT NULL CHECK (role IN ('student', 'mentor')),
                created_at  TEXT NOT NULL
            );

            CREATE TABLE doubts (
                id                  TEXT PRIMARY KEY,
                student_id          TEXT NOT NULL REFERENCES users(id),
                title               TEXT NOT NULL,
                description         TEXT NOT NULL,
                screenshot_url      TEXT,
                screenshot_file_id  TEXT,
                status              TEXT NOT NULL DEFAULT 'open'
                                    CHECK (status IN ('open', 'resolved')),
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE INDEX idx_doubts_student ON doubts(student_id, created_at);

            -- seq is the append order; listing sorts on it so a parent always
            -- precedes its replies even if wall clocks disagree.
            CREATE TABLE comments (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                id          TEXT NOT NULL UNIQUE,
                doubt_id    TEXT NOT NULL REFERENCES doubts(id),
                parent_id   TEXT REFERENCES comments(id),
                author_id   TEXT NOT NULL REFERENCES users(id),
                text        TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_comments_doubt ON comments(doubt_id, seq);
            CREATE INDEX idx_comments_parent ON comments(parent_id);

            INSERT INTO schema_version (version) VALUES (1);
            "
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
