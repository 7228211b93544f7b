use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;

use amicale_types::api::Claims;
use amicale_types::models::{Membership, MembershipStatus, Org};

use crate::error::ApiError;
use crate::AppState;

/// The caller's own membership history, newest first.
pub async fn my_memberships(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state.db.memberships_for_user(&claims.sub.to_string())?;
    let memberships = rows
        .into_iter()
        .map(|r| r.into_membership())
        .collect::<anyhow::Result<Vec<Membership>>>()?;
    Ok(Json(memberships))
}

#[derive(Debug, Deserialize)]
pub struct MembershipQuery {
    pub org: Option<Org>,
    pub year: Option<i32>,
    pub status: Option<MembershipStatus>,
}

/// Admin listing of the membership ledger. Org admins are confined to their
/// own orgs; a super admin may query anything.
pub async fn list_memberships(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<MembershipQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !claims.is_any_admin() {
        return Err(ApiError::Forbidden("admin access required".into()));
    }
    match query.org {
        Some(org) if !claims.is_admin_of(org) => {
            return Err(ApiError::Forbidden(format!(
                "not an administrator of {org}"
            )));
        }
        None if claims.role != amicale_types::models::Role::SuperAdmin => {
            return Err(ApiError::Forbidden(
                "org filter required for org administrators".into(),
            ));
        }
        _ => {}
    }

    let rows = state
        .db
        .list_memberships(query.org, query.year, query.status)?;
    let memberships = rows
        .into_iter()
        .map(|r| r.into_membership())
        .collect::<anyhow::Result<Vec<Membership>>>()?;
    Ok(Json(memberships))
}
