use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};

use amicale_types::models::{
    Article, Communication, FeeItem, Membership, MembershipStatus, Org, Parameter, Preference,
};

use crate::models::{
    ArticleRow, CommunicationRow, MembershipRow, ParameterRow, PreferenceRow, UserRow,
};
use crate::Database;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        name: &str,
        password_hash: &str,
        role: &str,
        orgs: &[Org],
    ) -> Result<()> {
        let orgs_json = serde_json::to_string(orgs)?;
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, name, password, role, orgs, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id,
                    email,
                    name,
                    password_hash,
                    role,
                    orgs_json,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{USER_SELECT} WHERE email = ?1"))?;
            let row = stmt.query_row([email], map_user_row).optional()?;
            Ok(row)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{USER_SELECT} WHERE id = ?1"))?;
            let row = stmt.query_row([id], map_user_row).optional()?;
            Ok(row)
        })
    }

    // -- Memberships --

    pub fn insert_membership(&self, m: &Membership) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO memberships (id, user_id, org, year, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    m.id.to_string(),
                    m.user_id.to_string(),
                    m.org.as_str(),
                    m.year,
                    m.status.as_str(),
                    m.created_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    pub fn memberships_for_user(&self, user_id: &str) -> Result<Vec<MembershipRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MEMBERSHIP_SELECT} WHERE user_id = ?1 ORDER BY year DESC"
            ))?;
            let rows = stmt
                .query_map([user_id], map_membership_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Filtered membership listing. Every filter is optional; the admin
    /// endpoint and the criteria resolver both go through here.
    pub fn list_memberships(
        &self,
        org: Option<Org>,
        year: Option<i32>,
        status: Option<MembershipStatus>,
    ) -> Result<Vec<MembershipRow>> {
        self.with_conn(|conn| {
            let mut clauses: Vec<String> = Vec::new();
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(org) = org {
                params.push(Box::new(org.as_str().to_string()));
                clauses.push(format!("org = ?{}", params.len()));
            }
            if let Some(year) = year {
                params.push(Box::new(year));
                clauses.push(format!("year = ?{}", params.len()));
            }
            if let Some(status) = status {
                params.push(Box::new(status.as_str().to_string()));
                clauses.push(format!("status = ?{}", params.len()));
            }

            let where_sql = if clauses.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", clauses.join(" AND "))
            };

            let mut stmt = conn.prepare(&format!(
                "{MEMBERSHIP_SELECT}{where_sql} ORDER BY year DESC, created_at DESC"
            ))?;
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let rows = stmt
                .query_map(param_refs.as_slice(), map_membership_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Distinct users holding at least one membership in any of the given
    /// statuses, across all orgs and years.
    pub fn users_with_membership_status(
        &self,
        statuses: &[MembershipStatus],
    ) -> Result<Vec<UserRow>> {
        if statuses.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=statuses.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT DISTINCT u.id, u.email, u.name, u.password, u.role, u.orgs, u.created_at
                 FROM users u
                 JOIN memberships m ON m.user_id = u.id
                 WHERE m.status IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let values: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
            let params: Vec<&dyn rusqlite::types::ToSql> = values
                .iter()
                .map(|s| s as &dyn rusqlite::types::ToSql)
                .collect();
            let rows = stmt
                .query_map(params.as_slice(), map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Distinct users with an active membership in the given year.
    pub fn users_with_active_membership_in_year(&self, year: i32) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT u.id, u.email, u.name, u.password, u.role, u.orgs, u.created_at
                 FROM users u
                 JOIN memberships m ON m.user_id = u.id
                 WHERE m.status = 'active' AND m.year = ?1",
            )?;
            let rows = stmt
                .query_map([year], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Flip active memberships of past years to expired. Returns the number
    /// of rows touched.
    pub fn expire_memberships_before(&self, year: i32) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE memberships SET status = 'expired'
                 WHERE status = 'active' AND year < ?1",
                [year],
            )?;
            Ok(n)
        })
    }

    // -- Preferences --

    pub fn get_preference(&self, user_id: &str) -> Result<Option<PreferenceRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, own_group, other_group, health_alerts
                 FROM preferences WHERE user_id = ?1",
            )?;
            let row = stmt
                .query_row([user_id], |row| {
                    Ok(PreferenceRow {
                        user_id: row.get(0)?,
                        own_group: row.get(1)?,
                        other_group: row.get(2)?,
                        health_alerts: row.get(3)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    pub fn upsert_preference(&self, p: &Preference) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO preferences (user_id, own_group, other_group, health_alerts)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                    own_group = excluded.own_group,
                    other_group = excluded.other_group,
                    health_alerts = excluded.health_alerts",
                rusqlite::params![
                    p.user_id.to_string(),
                    p.own_group,
                    p.other_group,
                    p.health_alerts
                ],
            )?;
            Ok(())
        })
    }

    // -- Parameters --

    pub fn insert_parameter(&self, p: &Parameter) -> Result<()> {
        let fees_json = serde_json::to_string(&p.fees)?;
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO parameters (org, year, fees, membership_open, close_date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    p.org.as_str(),
                    p.year,
                    fees_json,
                    p.membership_open,
                    p.close_date.map(|d| d.to_string()),
                    p.created_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_parameter(&self, org: Org, year: i32) -> Result<Option<ParameterRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{PARAMETER_SELECT} WHERE org = ?1 AND year = ?2"
            ))?;
            let row = stmt
                .query_row(rusqlite::params![org.as_str(), year], map_parameter_row)
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_parameters(&self, org: Option<Org>, year: Option<i32>) -> Result<Vec<ParameterRow>> {
        self.with_conn(|conn| {
            let mut clauses: Vec<String> = Vec::new();
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(org) = org {
                params.push(Box::new(org.as_str().to_string()));
                clauses.push(format!("org = ?{}", params.len()));
            }
            if let Some(year) = year {
                params.push(Box::new(year));
                clauses.push(format!("year = ?{}", params.len()));
            }

            let where_sql = if clauses.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", clauses.join(" AND "))
            };

            let mut stmt = conn.prepare(&format!(
                "{PARAMETER_SELECT}{where_sql} ORDER BY year DESC, org"
            ))?;
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let rows = stmt
                .query_map(param_refs.as_slice(), map_parameter_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_parameter_fees(&self, org: Org, year: i32, fees: &[FeeItem]) -> Result<bool> {
        let fees_json = serde_json::to_string(fees)?;
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE parameters SET fees = ?1 WHERE org = ?2 AND year = ?3",
                rusqlite::params![fees_json, org.as_str(), year],
            )?;
            Ok(n > 0)
        })
    }

    pub fn update_parameter_window(
        &self,
        org: Org,
        year: i32,
        open: bool,
        close_date: Option<NaiveDate>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE parameters SET membership_open = ?1, close_date = ?2
                 WHERE org = ?3 AND year = ?4",
                rusqlite::params![
                    open,
                    close_date.map(|d| d.to_string()),
                    org.as_str(),
                    year
                ],
            )?;
            Ok(n > 0)
        })
    }

    /// Fee schedule of the most recent year strictly before `year`, used by
    /// the rollover sweep to seed the new year's row.
    pub fn latest_fees_before(&self, org: Org, year: i32) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let fees = conn
                .query_row(
                    "SELECT fees FROM parameters WHERE org = ?1 AND year < ?2
                     ORDER BY year DESC LIMIT 1",
                    rusqlite::params![org.as_str(), year],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(fees)
        })
    }

    /// Close membership windows whose close date has passed. ISO dates
    /// compare lexically.
    pub fn close_due_windows(&self, today: NaiveDate) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE parameters SET membership_open = 0
                 WHERE membership_open = 1
                   AND close_date IS NOT NULL
                   AND close_date <= ?1",
                [today.to_string()],
            )?;
            Ok(n)
        })
    }

    // -- Communications --

    pub fn insert_communication(&self, c: &Communication) -> Result<()> {
        let audience_json = serde_json::to_string(&c.audience)?;
        let errors_json = serde_json::to_string(&c.errors)?;
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO communications
                    (id, org, author_id, subject, body_html, audience, status,
                     scheduled_at, sent_count, failed_count, errors, sent_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    c.id.to_string(),
                    c.org.as_str(),
                    c.author_id.to_string(),
                    c.subject,
                    c.body_html,
                    audience_json,
                    c.status.as_str(),
                    c.scheduled_at.map(|t| t.to_rfc3339()),
                    c.sent_count,
                    c.failed_count,
                    errors_json,
                    c.sent_at.map(|t| t.to_rfc3339()),
                    c.created_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_communication(&self, id: &str) -> Result<Option<CommunicationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{COMMUNICATION_SELECT} WHERE id = ?1"))?;
            let row = stmt.query_row([id], map_communication_row).optional()?;
            Ok(row)
        })
    }

    pub fn list_communications(&self, org: Option<Org>) -> Result<Vec<CommunicationRow>> {
        self.with_conn(|conn| {
            let (sql, param): (String, Option<String>) = match org {
                Some(org) => (
                    format!("{COMMUNICATION_SELECT} WHERE org = ?1 ORDER BY created_at DESC"),
                    Some(org.as_str().to_string()),
                ),
                None => (
                    format!("{COMMUNICATION_SELECT} ORDER BY created_at DESC"),
                    None,
                ),
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = match param {
                Some(p) => stmt
                    .query_map([p], map_communication_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                None => stmt
                    .query_map([], map_communication_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            };
            Ok(rows)
        })
    }

    /// Overwrite the editable fields of a draft. The status guard lives in
    /// SQL so a concurrent send cannot interleave with an edit.
    pub fn update_communication_draft(
        &self,
        id: &str,
        subject: &str,
        body_html: &str,
        audience_json: &str,
        scheduled_at: Option<DateTime<Utc>>,
        status: &str,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE communications
                 SET subject = ?1, body_html = ?2, audience = ?3, scheduled_at = ?4, status = ?5
                 WHERE id = ?6 AND status = 'draft'",
                rusqlite::params![
                    subject,
                    body_html,
                    audience_json,
                    scheduled_at.map(|t| t.to_rfc3339()),
                    status,
                    id
                ],
            )?;
            Ok(n > 0)
        })
    }

    pub fn delete_communication_draft(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "DELETE FROM communications WHERE id = ?1 AND status = 'draft'",
                [id],
            )?;
            Ok(n > 0)
        })
    }

    /// Conditional claim before resolving recipients: exactly one of any
    /// number of concurrent triggers flips the row to 'sending'.
    pub fn claim_communication(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE communications SET status = 'sending'
                 WHERE id = ?1 AND status IN ('draft', 'scheduled', 'sent')",
                [id],
            )?;
            Ok(n > 0)
        })
    }

    /// Roll a claim back after a failed send attempt (e.g. no recipients).
    pub fn release_communication_claim(&self, id: &str, status: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE communications SET status = ?1
                 WHERE id = ?2 AND status = 'sending'",
                rusqlite::params![status, id],
            )?;
            Ok(n > 0)
        })
    }

    /// Persist a dispatch outcome. Counters are replaced wholesale; a
    /// re-send never accumulates.
    pub fn record_dispatch(
        &self,
        id: &str,
        sent: u32,
        failed: u32,
        errors_json: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE communications
                 SET status = 'sent', sent_count = ?1, failed_count = ?2,
                     errors = ?3, sent_at = ?4
                 WHERE id = ?5 AND status = 'sending'",
                rusqlite::params![sent, failed, errors_json, sent_at.to_rfc3339(), id],
            )?;
            Ok(n > 0)
        })
    }

    pub fn due_communications(&self, now: DateTime<Utc>) -> Result<Vec<CommunicationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{COMMUNICATION_SELECT}
                 WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ?1"
            ))?;
            let rows = stmt
                .query_map([now.to_rfc3339()], map_communication_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Articles --

    pub fn insert_article(&self, a: &Article) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO articles
                    (id, org, author_id, title, body_html, status, visibility,
                     publish_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    a.id.to_string(),
                    a.org.as_str(),
                    a.author_id.to_string(),
                    a.title,
                    a.body_html,
                    a.status.as_str(),
                    a.visibility.as_str(),
                    a.publish_at.map(|t| t.to_rfc3339()),
                    a.created_at.to_rfc3339(),
                    a.updated_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_article(&self, id: &str) -> Result<Option<ArticleRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{ARTICLE_SELECT} WHERE id = ?1"))?;
            let row = stmt.query_row([id], map_article_row).optional()?;
            Ok(row)
        })
    }

    pub fn list_articles(&self) -> Result<Vec<ArticleRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{ARTICLE_SELECT} ORDER BY created_at DESC"))?;
            let rows = stmt
                .query_map([], map_article_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_article(&self, a: &Article) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE articles
                 SET title = ?1, body_html = ?2, status = ?3, visibility = ?4,
                     publish_at = ?5, updated_at = ?6
                 WHERE id = ?7",
                rusqlite::params![
                    a.title,
                    a.body_html,
                    a.status.as_str(),
                    a.visibility.as_str(),
                    a.publish_at.map(|t| t.to_rfc3339()),
                    a.updated_at.to_rfc3339(),
                    a.id.to_string()
                ],
            )?;
            Ok(n > 0)
        })
    }

    pub fn delete_article(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute("DELETE FROM articles WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    /// Flip due scheduled articles to published. Published rows stop
    /// matching, so running the sweep twice is harmless.
    pub fn publish_due_articles(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE articles SET status = 'published', updated_at = ?1
                 WHERE status = 'scheduled' AND publish_at IS NOT NULL AND publish_at <= ?1",
                [now.to_rfc3339()],
            )?;
            Ok(n)
        })
    }
}

// -- Row mappers --

const USER_SELECT: &str =
    "SELECT id, email, name, password, role, orgs, created_at FROM users";
const MEMBERSHIP_SELECT: &str =
    "SELECT id, user_id, org, year, status, created_at FROM memberships";
const PARAMETER_SELECT: &str =
    "SELECT org, year, fees, membership_open, close_date, created_at FROM parameters";
const COMMUNICATION_SELECT: &str =
    "SELECT id, org, author_id, subject, body_html, audience, status, scheduled_at,
            sent_count, failed_count, errors, sent_at, created_at
     FROM communications";
const ARTICLE_SELECT: &str =
    "SELECT id, org, author_id, title, body_html, status, visibility, publish_at,
            created_at, updated_at
     FROM articles";

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        password: row.get(3)?,
        role: row.get(4)?,
        orgs: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn map_membership_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MembershipRow> {
    Ok(MembershipRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        org: row.get(2)?,
        year: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_parameter_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ParameterRow> {
    Ok(ParameterRow {
        org: row.get(0)?,
        year: row.get(1)?,
        fees: row.get(2)?,
        membership_open: row.get(3)?,
        close_date: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_communication_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommunicationRow> {
    Ok(CommunicationRow {
        id: row.get(0)?,
        org: row.get(1)?,
        author_id: row.get(2)?,
        subject: row.get(3)?,
        body_html: row.get(4)?,
        audience: row.get(5)?,
        status: row.get(6)?,
        scheduled_at: row.get(7)?,
        sent_count: row.get(8)?,
        failed_count: row.get(9)?,
        errors: row.get(10)?,
        sent_at: row.get(11)?,
        created_at: row.get(12)?,
    })
}

fn map_article_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArticleRow> {
    Ok(ArticleRow {
        id: row.get(0)?,
        org: row.get(1)?,
        author_id: row.get(2)?,
        title: row.get(3)?,
        body_html: row.get(4)?,
        status: row.get(5)?,
        visibility: row.get(6)?,
        publish_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use amicale_types::models::{
        ArticleStatus, ArticleVisibility, Audience, CommunicationStatus, Role,
    };
    use chrono::Duration;
    use uuid::Uuid;

    fn seed_user(db: &Database, orgs: &[Org]) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(
            &id.to_string(),
            &format!("{id}@example.org"),
            "Test User",
            "hash",
            Role::User.as_str(),
            orgs,
        )
        .unwrap();
        id
    }

    fn seed_membership(db: &Database, user_id: Uuid, org: Org, year: i32, status: MembershipStatus) {
        db.insert_membership(&Membership {
            id: Uuid::new_v4(),
            user_id,
            org,
            year,
            status,
            created_at: Utc::now(),
        })
        .unwrap();
    }

    fn seed_communication(db: &Database, status: CommunicationStatus) -> Communication {
        let author = seed_user(db, &[Org::A]);
        let c = Communication {
            id: Uuid::new_v4(),
            org: Org::A,
            author_id: author,
            subject: "subject".into(),
            body_html: "<p>body</p>".into(),
            audience: Audience::HealthAlert,
            status,
            scheduled_at: None,
            sent_count: 0,
            failed_count: 0,
            errors: vec![],
            sent_at: None,
            created_at: Utc::now(),
        };
        db.insert_communication(&c).unwrap();
        c
    }

    #[test]
    fn claim_is_single_winner() {
        let db = Database::open_in_memory().unwrap();
        let c = seed_communication(&db, CommunicationStatus::Draft);

        assert!(db.claim_communication(&c.id.to_string()).unwrap());
        // Second trigger racing on the same record loses.
        assert!(!db.claim_communication(&c.id.to_string()).unwrap());

        // After recording the dispatch the record can be claimed again
        // (manual re-send).
        assert!(db
            .record_dispatch(&c.id.to_string(), 5, 1, "[]", Utc::now())
            .unwrap());
        assert!(db.claim_communication(&c.id.to_string()).unwrap());
    }

    #[test]
    fn draft_guards_hold_for_sent_records() {
        let db = Database::open_in_memory().unwrap();
        let c = seed_communication(&db, CommunicationStatus::Sent);
        let id = c.id.to_string();

        assert!(!db
            .update_communication_draft(&id, "s", "b", "{\"kind\":\"health-alert\"}", None, "draft")
            .unwrap());
        assert!(!db.delete_communication_draft(&id).unwrap());
    }

    #[test]
    fn record_dispatch_overwrites_counters() {
        let db = Database::open_in_memory().unwrap();
        let c = seed_communication(&db, CommunicationStatus::Draft);
        let id = c.id.to_string();

        db.claim_communication(&id).unwrap();
        db.record_dispatch(&id, 10, 2, "[]", Utc::now()).unwrap();
        db.claim_communication(&id).unwrap();
        db.record_dispatch(&id, 3, 0, "[]", Utc::now()).unwrap();

        let row = db.get_communication(&id).unwrap().unwrap();
        assert_eq!(row.sent_count, 3);
        assert_eq!(row.failed_count, 0);
    }

    #[test]
    fn publish_sweep_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let author = seed_user(&db, &[Org::A]);
        let now = Utc::now();

        db.insert_article(&Article {
            id: Uuid::new_v4(),
            org: Org::A,
            author_id: author,
            title: "t".into(),
            body_html: "b".into(),
            status: ArticleStatus::Scheduled,
            visibility: ArticleVisibility::All,
            publish_at: Some(now - Duration::minutes(1)),
            created_at: now,
            updated_at: now,
        })
        .unwrap();

        assert_eq!(db.publish_due_articles(now).unwrap(), 1);
        assert_eq!(db.publish_due_articles(now).unwrap(), 0);
    }

    #[test]
    fn expire_only_touches_past_active_rows() {
        let db = Database::open_in_memory().unwrap();
        let u = seed_user(&db, &[Org::A]);
        seed_membership(&db, u, Org::A, 2024, MembershipStatus::Active);
        seed_membership(&db, u, Org::A, 2025, MembershipStatus::Active);
        seed_membership(&db, u, Org::B, 2024, MembershipStatus::Pending);

        assert_eq!(db.expire_memberships_before(2025).unwrap(), 1);

        let rows = db
            .list_memberships(Some(Org::A), Some(2025), Some(MembershipStatus::Active))
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn distinct_users_across_orgs_and_years() {
        let db = Database::open_in_memory().unwrap();
        let u = seed_user(&db, &[Org::A, Org::B]);
        seed_membership(&db, u, Org::A, 2024, MembershipStatus::Active);
        seed_membership(&db, u, Org::B, 2024, MembershipStatus::Expired);
        seed_membership(&db, u, Org::A, 2025, MembershipStatus::Active);

        let users = db
            .users_with_membership_status(&[MembershipStatus::Active, MembershipStatus::Expired])
            .unwrap();
        assert_eq!(users.len(), 1);
    }

    #[test]
    fn window_close_sweep_uses_date() {
        let db = Database::open_in_memory().unwrap();
        let today: NaiveDate = "2026-01-15".parse().unwrap();

        db.insert_parameter(&Parameter {
            org: Org::A,
            year: 2026,
            fees: vec![],
            membership_open: true,
            close_date: Some("2026-01-10".parse().unwrap()),
            created_at: Utc::now(),
        })
        .unwrap();
        db.insert_parameter(&Parameter {
            org: Org::B,
            year: 2026,
            fees: vec![],
            membership_open: true,
            close_date: Some("2026-02-01".parse().unwrap()),
            created_at: Utc::now(),
        })
        .unwrap();

        assert_eq!(db.close_due_windows(today).unwrap(), 1);
        let row = db.get_parameter(Org::A, 2026).unwrap().unwrap();
        assert!(!row.membership_open);
        let row = db.get_parameter(Org::B, 2026).unwrap().unwrap();
        assert!(row.membership_open);
    }
}
