use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Organizations --

/// The two sponsoring organizations. Members and admins are affiliated with
/// one or both; a super admin implicitly covers both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Org {
    #[serde(rename = "org-a")]
    A,
    #[serde(rename = "org-b")]
    B,
}

impl Org {
    pub fn as_str(&self) -> &'static str {
        match self {
            Org::A => "org-a",
            Org::B => "org-b",
        }
    }
}

impl fmt::Display for Org {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Org {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "org-a" => Ok(Org::A),
            "org-b" => Ok(Org::B),
            other => Err(format!("unknown org: {other}")),
        }
    }
}

/// Historical records stored the org affiliation as a single string; current
/// records store a JSON array. Both shapes are widened to a list on read.
pub fn parse_org_list(raw: &str) -> Result<Vec<Org>, serde_json::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Compat {
        One(Org),
        Many(Vec<Org>),
    }

    Ok(match serde_json::from_str::<Compat>(raw)? {
        Compat::One(org) => vec![org],
        Compat::Many(orgs) => orgs,
    })
}

// -- Users --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub orgs: Vec<Org>,
    pub created_at: DateTime<Utc>,
}

// -- Memberships --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MembershipStatus {
    Active,
    Expired,
    Pending,
    PaymentRequested,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Expired => "expired",
            MembershipStatus::Pending => "pending",
            MembershipStatus::PaymentRequested => "payment-requested",
        }
    }
}

impl FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MembershipStatus::Active),
            "expired" => Ok(MembershipStatus::Expired),
            "pending" => Ok(MembershipStatus::Pending),
            "payment-requested" => Ok(MembershipStatus::PaymentRequested),
            other => Err(format!("unknown membership status: {other}")),
        }
    }
}

/// A yearly membership record tying a user to an org. Created by the payment
/// flow outside this service; this service only reads and expires them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub user_id: Uuid,
    pub org: Org,
    pub year: i32,
    pub status: MembershipStatus,
    pub created_at: DateTime<Utc>,
}

// -- Preferences --

/// Per-user opt-in flags for the three communication categories.
/// At most one row per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preference {
    pub user_id: Uuid,
    pub own_group: bool,
    pub other_group: bool,
    pub health_alerts: bool,
}

impl Preference {
    /// Defaults applied when a user's preferences are first read without a
    /// stored row.
    pub fn with_defaults(user_id: Uuid) -> Self {
        Self {
            user_id,
            own_group: true,
            other_group: false,
            health_alerts: true,
        }
    }
}

// -- Parameters --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeItem {
    pub label: String,
    pub amount_cents: i64,
}

/// Per-org, per-year fee schedule and membership-window state.
/// One row per (org, year).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub org: Org,
    pub year: i32,
    pub fees: Vec<FeeItem>,
    pub membership_open: bool,
    /// When set, the daily sweep closes the membership window once this date
    /// has passed.
    pub close_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

// -- Communications --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LegacyAudience {
    OwnGroup,
    AllGroups,
    OrgA,
    OrgB,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipCriterion {
    pub org: Org,
    pub year: i32,
    pub status: MembershipStatus,
}

/// Targeting rule for a communication. The variants are mutually exclusive
/// by construction; resolution order is health alert, then criteria, then
/// the legacy single-value rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Audience {
    HealthAlert,
    Criteria { criteria: Vec<MembershipCriterion> },
    Legacy { rule: LegacyAudience },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommunicationStatus {
    Draft,
    Scheduled,
    /// Transient: a trigger has claimed the record and is resolving and
    /// dispatching. At most one concurrent trigger can hold this.
    Sending,
    Sent,
}

impl CommunicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicationStatus::Draft => "draft",
            CommunicationStatus::Scheduled => "scheduled",
            CommunicationStatus::Sending => "sending",
            CommunicationStatus::Sent => "sent",
        }
    }
}

impl FromStr for CommunicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CommunicationStatus::Draft),
            "scheduled" => Ok(CommunicationStatus::Scheduled),
            "sending" => Ok(CommunicationStatus::Sending),
            "sent" => Ok(CommunicationStatus::Sent),
            other => Err(format!("unknown communication status: {other}")),
        }
    }
}

/// One recipient's failed delivery, kept on the communication record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendFailure {
    pub email: String,
    pub error: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Communication {
    pub id: Uuid,
    pub org: Org,
    pub author_id: Uuid,
    pub subject: String,
    pub body_html: String,
    pub audience: Audience,
    pub status: CommunicationStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Delivery counters. Overwritten wholesale on each send attempt;
    /// a re-send replaces, never accumulates.
    pub sent_count: u32,
    pub failed_count: u32,
    pub errors: Vec<SendFailure>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// -- Articles --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArticleStatus {
    Draft,
    Scheduled,
    Published,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Draft => "draft",
            ArticleStatus::Scheduled => "scheduled",
            ArticleStatus::Published => "published",
        }
    }
}

impl FromStr for ArticleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ArticleStatus::Draft),
            "scheduled" => Ok(ArticleStatus::Scheduled),
            "published" => Ok(ArticleStatus::Published),
            other => Err(format!("unknown article status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArticleVisibility {
    #[serde(rename = "all")]
    All,
    #[serde(rename = "organization-only")]
    OrgOnly,
}

impl ArticleVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleVisibility::All => "all",
            ArticleVisibility::OrgOnly => "organization-only",
        }
    }
}

impl FromStr for ArticleVisibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(ArticleVisibility::All),
            "organization-only" => Ok(ArticleVisibility::OrgOnly),
            other => Err(format!("unknown visibility: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub org: Org,
    pub author_id: Uuid,
    pub title: String,
    pub body_html: String,
    pub status: ArticleStatus,
    pub visibility: ArticleVisibility,
    pub publish_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Article {
    /// Read-time visibility check. Keys off the stored status only: a
    /// scheduled article whose publish time has passed but which the sweep
    /// has not flipped yet stays restricted.
    pub fn is_visible_for(&self, viewer_id: Uuid, role: Role, viewer_orgs: &[Org]) -> bool {
        if role == Role::SuperAdmin {
            return true;
        }
        match self.status {
            ArticleStatus::Draft | ArticleStatus::Scheduled => {
                self.author_id == viewer_id
                    || (role == Role::Admin && viewer_orgs.contains(&self.org))
            }
            ArticleStatus::Published => match self.visibility {
                ArticleVisibility::All => true,
                ArticleVisibility::OrgOnly => viewer_orgs.contains(&self.org),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(status: ArticleStatus, visibility: ArticleVisibility) -> Article {
        Article {
            id: Uuid::new_v4(),
            org: Org::A,
            author_id: Uuid::new_v4(),
            title: "t".into(),
            body_html: "<p>b</p>".into(),
            status,
            visibility,
            publish_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn draft_visible_only_to_author_and_same_org_admin() {
        let a = article(ArticleStatus::Draft, ArticleVisibility::All);

        assert!(a.is_visible_for(a.author_id, Role::User, &[Org::A]));
        assert!(a.is_visible_for(Uuid::new_v4(), Role::Admin, &[Org::A]));
        assert!(!a.is_visible_for(Uuid::new_v4(), Role::Admin, &[Org::B]));
        assert!(!a.is_visible_for(Uuid::new_v4(), Role::User, &[Org::A]));
        assert!(a.is_visible_for(Uuid::new_v4(), Role::SuperAdmin, &[]));
    }

    #[test]
    fn scheduled_stays_restricted_until_status_flips() {
        let mut a = article(ArticleStatus::Scheduled, ArticleVisibility::All);
        // Publish time in the past, but the sweep has not run yet.
        a.publish_at = Some(Utc::now() - chrono::Duration::minutes(5));

        assert!(!a.is_visible_for(Uuid::new_v4(), Role::User, &[Org::A]));

        a.status = ArticleStatus::Published;
        assert!(a.is_visible_for(Uuid::new_v4(), Role::User, &[Org::B]));
    }

    #[test]
    fn published_org_only_restricted_to_same_org() {
        let a = article(ArticleStatus::Published, ArticleVisibility::OrgOnly);

        assert!(a.is_visible_for(Uuid::new_v4(), Role::User, &[Org::A]));
        assert!(a.is_visible_for(Uuid::new_v4(), Role::User, &[Org::A, Org::B]));
        assert!(!a.is_visible_for(Uuid::new_v4(), Role::User, &[Org::B]));
        assert!(a.is_visible_for(Uuid::new_v4(), Role::SuperAdmin, &[Org::B]));
    }

    #[test]
    fn preference_defaults_opt_into_own_group_and_alerts() {
        let p = Preference::with_defaults(Uuid::new_v4());
        assert!(p.own_group);
        assert!(!p.other_group);
        assert!(p.health_alerts);
    }

    #[test]
    fn org_list_accepts_legacy_single_value() {
        assert_eq!(parse_org_list("\"org-a\"").unwrap(), vec![Org::A]);
        assert_eq!(
            parse_org_list("[\"org-a\",\"org-b\"]").unwrap(),
            vec![Org::A, Org::B]
        );
        assert!(parse_org_list("\"org-c\"").is_err());
    }

    #[test]
    fn audience_wire_format() {
        let json = serde_json::to_string(&Audience::Legacy {
            rule: LegacyAudience::AllGroups,
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"legacy","rule":"all-groups"}"#);

        let back: Audience = serde_json::from_str(r#"{"kind":"health-alert"}"#).unwrap();
        assert_eq!(back, Audience::HealthAlert);
    }
}
