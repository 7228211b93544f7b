use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    ArticleVisibility, Audience, FeeItem, Org, Role, SendFailure,
};

// -- JWT Claims --

/// JWT claims shared across the REST middleware and the scheduler (which
/// impersonates no one but reuses the role helpers). Canonical definition
/// lives here in amicale-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub orgs: Vec<Org>,
    pub exp: usize,
}

impl Claims {
    /// Org admins administer their own orgs; a super admin administers all.
    pub fn is_admin_of(&self, org: Org) -> bool {
        match self.role {
            Role::SuperAdmin => true,
            Role::Admin => self.orgs.contains(&org),
            Role::User => false,
        }
    }

    pub fn is_any_admin(&self) -> bool {
        matches!(self.role, Role::Admin | Role::SuperAdmin)
    }
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub orgs: Vec<Org>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub token: String,
}

// -- Preferences --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePreferencesRequest {
    pub own_group: bool,
    pub other_group: bool,
    pub health_alerts: bool,
}

// -- Parameters --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateParameterRequest {
    pub org: Org,
    pub year: i32,
    pub fees: Vec<FeeItem>,
    #[serde(default)]
    pub membership_open: bool,
    #[serde(default)]
    pub close_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateFeesRequest {
    pub fees: Vec<FeeItem>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateWindowRequest {
    pub membership_open: bool,
    #[serde(default)]
    pub close_date: Option<NaiveDate>,
}

// -- Articles --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateArticleRequest {
    pub org: Org,
    pub title: String,
    pub body_html: String,
    pub visibility: ArticleVisibility,
    /// When set, the article is created as scheduled and the sweep publishes
    /// it once due. Must be in the future.
    #[serde(default)]
    pub publish_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateArticleRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub visibility: Option<ArticleVisibility>,
    #[serde(default)]
    pub publish_at: Option<DateTime<Utc>>,
    /// Requested status transition. Only forward moves are accepted
    /// (draft -> scheduled -> published, or draft -> published).
    #[serde(default)]
    pub publish_now: bool,
}

// -- Communications --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCommunicationRequest {
    pub org: Org,
    pub subject: String,
    pub body_html: String,
    pub audience: Audience,
    /// When set, the communication is created as scheduled and the sweep
    /// sends it once due. Must be strictly in the future.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateCommunicationRequest {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub audience: Option<Audience>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub sent: u32,
    pub failed: u32,
    pub errors: Vec<SendFailure>,
}
