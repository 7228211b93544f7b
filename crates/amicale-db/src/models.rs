//! Database row types — these map directly to SQLite rows.
//! Distinct from the amicale-types API models to keep the DB layer
//! independent; `into_*` converters parse text columns into typed values.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use amicale_types::models::{
    parse_org_list, Article, Communication, Membership, Parameter, Preference, User,
};

/// SQLite stores timestamps either as RFC 3339 (inserted by us) or as
/// "YYYY-MM-DD HH:MM:SS" (datetime('now') defaults). Accept both.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("bad timestamp: {raw}"))
}

fn parse_opt_timestamp(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_timestamp).transpose()
}

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: String,
    pub orgs: String,
    pub created_at: String,
}

impl UserRow {
    pub fn into_user(self) -> Result<User> {
        Ok(User {
            id: self.id.parse()?,
            email: self.email,
            name: self.name,
            role: self.role.parse().map_err(anyhow::Error::msg)?,
            orgs: parse_org_list(&self.orgs)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct MembershipRow {
    pub id: String,
    pub user_id: String,
    pub org: String,
    pub year: i32,
    pub status: String,
    pub created_at: String,
}

impl MembershipRow {
    pub fn into_membership(self) -> Result<Membership> {
        Ok(Membership {
            id: self.id.parse()?,
            user_id: self.user_id.parse()?,
            org: self.org.parse().map_err(anyhow::Error::msg)?,
            year: self.year,
            status: self.status.parse().map_err(anyhow::Error::msg)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct PreferenceRow {
    pub user_id: String,
    pub own_group: bool,
    pub other_group: bool,
    pub health_alerts: bool,
}

impl PreferenceRow {
    pub fn into_preference(self) -> Result<Preference> {
        Ok(Preference {
            user_id: self.user_id.parse()?,
            own_group: self.own_group,
            other_group: self.other_group,
            health_alerts: self.health_alerts,
        })
    }
}

pub struct ParameterRow {
    pub org: String,
    pub year: i32,
    pub fees: String,
    pub membership_open: bool,
    pub close_date: Option<String>,
    pub created_at: String,
}

impl ParameterRow {
    pub fn into_parameter(self) -> Result<Parameter> {
        Ok(Parameter {
            org: self.org.parse().map_err(anyhow::Error::msg)?,
            year: self.year,
            fees: serde_json::from_str(&self.fees)?,
            membership_open: self.membership_open,
            close_date: self
                .close_date
                .as_deref()
                .map(|d| d.parse::<NaiveDate>())
                .transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct CommunicationRow {
    pub id: String,
    pub org: String,
    pub author_id: String,
    pub subject: String,
    pub body_html: String,
    pub audience: String,
    pub status: String,
    pub scheduled_at: Option<String>,
    pub sent_count: u32,
    pub failed_count: u32,
    pub errors: String,
    pub sent_at: Option<String>,
    pub created_at: String,
}

impl CommunicationRow {
    pub fn into_communication(self) -> Result<Communication> {
        Ok(Communication {
            id: self.id.parse()?,
            org: self.org.parse().map_err(anyhow::Error::msg)?,
            author_id: self.author_id.parse()?,
            subject: self.subject,
            body_html: self.body_html,
            audience: serde_json::from_str(&self.audience)?,
            status: self.status.parse().map_err(anyhow::Error::msg)?,
            scheduled_at: parse_opt_timestamp(self.scheduled_at.as_deref())?,
            sent_count: self.sent_count,
            failed_count: self.failed_count,
            errors: serde_json::from_str(&self.errors)?,
            sent_at: parse_opt_timestamp(self.sent_at.as_deref())?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct ArticleRow {
    pub id: String,
    pub org: String,
    pub author_id: String,
    pub title: String,
    pub body_html: String,
    pub status: String,
    pub visibility: String,
    pub publish_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ArticleRow {
    pub fn into_article(self) -> Result<Article> {
        Ok(Article {
            id: self.id.parse()?,
            org: self.org.parse().map_err(anyhow::Error::msg)?,
            author_id: self.author_id.parse()?,
            title: self.title,
            body_html: self.body_html,
            status: self.status.parse().map_err(anyhow::Error::msg)?,
            visibility: self.visibility.parse().map_err(anyhow::Error::msg)?,
            publish_at: parse_opt_timestamp(self.publish_at.as_deref())?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}
