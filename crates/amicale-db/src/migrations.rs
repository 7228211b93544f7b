use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL UNIQUE,
                name        TEXT NOT NULL,
                password    TEXT NOT NULL,
                role        TEXT NOT NULL DEFAULT 'user',
                orgs        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE memberships (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id),
                org         TEXT NOT NULL,
                year        INTEGER NOT NULL,
                status      TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                UNIQUE(user_id, org, year)
            );

            CREATE INDEX idx_memberships_org_year
                ON memberships(org, year, status);
            CREATE INDEX idx_memberships_user
                ON memberships(user_id);

            CREATE TABLE preferences (
                user_id        TEXT PRIMARY KEY REFERENCES users(id),
                own_group      INTEGER NOT NULL,
                other_group    INTEGER NOT NULL,
                health_alerts  INTEGER NOT NULL
            );

            CREATE TABLE parameters (
                org              TEXT NOT NULL,
                year             INTEGER NOT NULL,
                fees             TEXT NOT NULL,
                membership_open  INTEGER NOT NULL DEFAULT 0,
                close_date       TEXT,
                created_at       TEXT NOT NULL,
                PRIMARY KEY (org, year)
            );

            CREATE TABLE communications (
                id            TEXT PRIMARY KEY,
                org           TEXT NOT NULL,
                author_id     TEXT NOT NULL REFERENCES users(id),
                subject       TEXT NOT NULL,
                body_html     TEXT NOT NULL,
                audience      TEXT NOT NULL,
                status        TEXT NOT NULL DEFAULT 'draft',
                scheduled_at  TEXT,
                sent_count    INTEGER NOT NULL DEFAULT 0,
                failed_count  INTEGER NOT NULL DEFAULT 0,
                errors        TEXT NOT NULL DEFAULT '[]',
                sent_at       TEXT,
                created_at    TEXT NOT NULL
            );

            CREATE INDEX idx_communications_due
                ON communications(status, scheduled_at);

            CREATE TABLE articles (
                id          TEXT PRIMARY KEY,
                org         TEXT NOT NULL,
                author_id   TEXT NOT NULL REFERENCES users(id),
                title       TEXT NOT NULL,
                body_html   TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'draft',
                visibility  TEXT NOT NULL,
                publish_at  TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_articles_due
                ON articles(status, publish_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
