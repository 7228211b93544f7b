use axum::{extract::State, response::IntoResponse, Extension, Json};

use amicale_types::api::{Claims, UpdatePreferencesRequest};
use amicale_types::models::Preference;

use crate::error::ApiError;
use crate::AppState;

/// Read the caller's preferences. A user without a stored row gets the
/// defaults created on the spot — unlike recipient resolution, which treats
/// the missing row as fully opted out.
pub async fn get_preferences(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let stored = state.db.get_preference(&claims.sub.to_string())?;

    let preference = match stored {
        Some(row) => row.into_preference()?,
        None => {
            let defaults = Preference::with_defaults(claims.sub);
            state.db.upsert_preference(&defaults)?;
            defaults
        }
    };

    Ok(Json(preference))
}

pub async fn update_preferences(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdatePreferencesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let preference = Preference {
        user_id: claims.sub,
        own_group: req.own_group,
        other_group: req.other_group,
        health_alerts: req.health_alerts,
    };
    state.db.upsert_preference(&preference)?;
    Ok(Json(preference))
}
