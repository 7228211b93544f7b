use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;

use amicale_types::api::{Claims, CreateParameterRequest, UpdateFeesRequest, UpdateWindowRequest};
use amicale_types::models::{Org, Parameter};

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ParameterQuery {
    pub org: Option<Org>,
    pub year: Option<i32>,
}

/// Fee schedules are public to members (the dues page shows them), so any
/// authenticated caller may list.
pub async fn list_parameters(
    State(state): State<AppState>,
    Query(query): Query<ParameterQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state.db.list_parameters(query.org, query.year)?;
    let parameters = rows
        .into_iter()
        .map(|r| r.into_parameter())
        .collect::<anyhow::Result<Vec<Parameter>>>()?;
    Ok(Json(parameters))
}

pub async fn create_parameter(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateParameterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !claims.is_admin_of(req.org) {
        return Err(ApiError::Forbidden(format!(
            "not an administrator of {}",
            req.org
        )));
    }
    if state.db.get_parameter(req.org, req.year)?.is_some() {
        return Err(ApiError::Conflict(format!(
            "parameters for {} / {} already exist",
            req.org, req.year
        )));
    }

    let parameter = Parameter {
        org: req.org,
        year: req.year,
        fees: req.fees,
        membership_open: req.membership_open,
        close_date: req.close_date,
        created_at: chrono::Utc::now(),
    };
    state.db.insert_parameter(&parameter)?;
    Ok((StatusCode::CREATED, Json(parameter)))
}

pub async fn update_fees(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((org, year)): Path<(Org, i32)>,
    Json(req): Json<UpdateFeesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !claims.is_admin_of(org) {
        return Err(ApiError::Forbidden(format!("not an administrator of {org}")));
    }
    if !state.db.update_parameter_fees(org, year, &req.fees)? {
        return Err(ApiError::NotFound);
    }

    let parameter = state
        .db
        .get_parameter(org, year)?
        .ok_or(ApiError::NotFound)?
        .into_parameter()?;
    Ok(Json(parameter))
}

/// Open or close the membership window, optionally setting the date at
/// which the daily sweep closes it automatically.
pub async fn update_window(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((org, year)): Path<(Org, i32)>,
    Json(req): Json<UpdateWindowRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !claims.is_admin_of(org) {
        return Err(ApiError::Forbidden(format!("not an administrator of {org}")));
    }
    if !state
        .db
        .update_parameter_window(org, year, req.membership_open, req.close_date)?
    {
        return Err(ApiError::NotFound);
    }

    let parameter = state
        .db
        .get_parameter(org, year)?
        .ok_or(ApiError::NotFound)?
        .into_parameter()?;
    Ok(Json(parameter))
}
