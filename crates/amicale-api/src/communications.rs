use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use uuid::Uuid;

use amicale_mailer::{run_send, SendError};
use amicale_types::api::{
    Claims, CreateCommunicationRequest, SendResponse, UpdateCommunicationRequest,
};
use amicale_types::models::{Communication, CommunicationStatus};

use crate::error::ApiError;
use crate::AppState;

pub async fn list_communications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    if !claims.is_any_admin() {
        return Err(ApiError::Forbidden("admin access required".into()));
    }

    let rows = state.db.list_communications(None)?;
    let mut communications = Vec::new();
    for row in rows {
        let communication = row.into_communication()?;
        if claims.is_admin_of(communication.org) {
            communications.push(communication);
        }
    }
    Ok(Json(communications))
}

pub async fn get_communication(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let communication = state
        .db
        .get_communication(&id.to_string())?
        .ok_or(ApiError::NotFound)?
        .into_communication()?;
    if !claims.is_admin_of(communication.org) {
        return Err(ApiError::Forbidden(format!(
            "not an administrator of {}",
            communication.org
        )));
    }
    Ok(Json(communication))
}

pub async fn create_communication(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCommunicationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !claims.is_admin_of(req.org) {
        return Err(ApiError::Forbidden(format!(
            "not an administrator of {}",
            req.org
        )));
    }
    if req.subject.trim().is_empty() {
        return Err(ApiError::BadRequest("subject is required".into()));
    }
    if req.body_html.trim().is_empty() {
        return Err(ApiError::BadRequest("body is required".into()));
    }

    let now = Utc::now();
    let status = match req.scheduled_at {
        Some(at) => {
            // Strictly future: a date equal to now would be due immediately.
            if at <= now {
                return Err(ApiError::BadRequest(
                    "scheduled date must be in the future".into(),
                ));
            }
            CommunicationStatus::Scheduled
        }
        None => CommunicationStatus::Draft,
    };

    let communication = Communication {
        id: Uuid::new_v4(),
        org: req.org,
        author_id: claims.sub,
        subject: req.subject.trim().to_string(),
        body_html: req.body_html,
        audience: req.audience,
        status,
        scheduled_at: req.scheduled_at,
        sent_count: 0,
        failed_count: 0,
        errors: vec![],
        sent_at: None,
        created_at: now,
    };
    state.db.insert_communication(&communication)?;
    Ok((StatusCode::CREATED, Json(communication)))
}

pub async fn update_communication(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCommunicationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut communication = state
        .db
        .get_communication(&id.to_string())?
        .ok_or(ApiError::NotFound)?
        .into_communication()?;

    // Author-only, draft-only: a sent communication is immutable for
    // everyone including its author.
    if communication.author_id != claims.sub {
        return Err(ApiError::Forbidden(
            "only the author may edit a communication".into(),
        ));
    }
    if communication.status != CommunicationStatus::Draft {
        return Err(ApiError::BadRequest(
            "only draft communications can be edited".into(),
        ));
    }

    if let Some(subject) = req.subject {
        if subject.trim().is_empty() {
            return Err(ApiError::BadRequest("subject is required".into()));
        }
        communication.subject = subject.trim().to_string();
    }
    if let Some(body_html) = req.body_html {
        if body_html.trim().is_empty() {
            return Err(ApiError::BadRequest("body is required".into()));
        }
        communication.body_html = body_html;
    }
    if let Some(audience) = req.audience {
        communication.audience = audience;
    }
    if let Some(at) = req.scheduled_at {
        if at <= Utc::now() {
            return Err(ApiError::BadRequest(
                "scheduled date must be in the future".into(),
            ));
        }
        communication.scheduled_at = Some(at);
        communication.status = CommunicationStatus::Scheduled;
    }

    let audience_json =
        serde_json::to_string(&communication.audience).map_err(anyhow::Error::from)?;
    // The draft guard repeats in SQL so an edit cannot interleave with a
    // concurrent send claim.
    if !state.db.update_communication_draft(
        &id.to_string(),
        &communication.subject,
        &communication.body_html,
        &audience_json,
        communication.scheduled_at,
        communication.status.as_str(),
    )? {
        return Err(ApiError::Conflict(
            "communication is no longer a draft".into(),
        ));
    }
    Ok(Json(communication))
}

pub async fn delete_communication(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let communication = state
        .db
        .get_communication(&id.to_string())?
        .ok_or(ApiError::NotFound)?
        .into_communication()?;

    if communication.author_id != claims.sub {
        return Err(ApiError::Forbidden(
            "only the author may delete a communication".into(),
        ));
    }
    if communication.status != CommunicationStatus::Draft {
        return Err(ApiError::BadRequest(
            "only draft communications can be deleted".into(),
        ));
    }

    if !state.db.delete_communication_draft(&id.to_string())? {
        return Err(ApiError::Conflict(
            "communication is no longer a draft".into(),
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Trigger a send. Provider failures are per-recipient data in the
/// response, never a request failure; the only hard errors are validation
/// and the claim race.
pub async fn send_communication(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let communication = state
        .db
        .get_communication(&id.to_string())?
        .ok_or(ApiError::NotFound)?
        .into_communication()?;
    if !claims.is_admin_of(communication.org) {
        return Err(ApiError::Forbidden(format!(
            "not an administrator of {}",
            communication.org
        )));
    }

    let report = run_send(
        &state.db,
        state.mailer.as_ref(),
        &state.mail,
        &state.dispatch,
        &id.to_string(),
    )
    .await
    .map_err(|e| match e {
        SendError::NotFound => ApiError::NotFound,
        SendError::AlreadySending => ApiError::Conflict("a send is already in progress".into()),
        SendError::NoRecipients => ApiError::BadRequest("no recipients found".into()),
        SendError::Internal(inner) => ApiError::Internal(inner),
    })?;

    Ok(Json(SendResponse {
        sent: report.sent,
        failed: report.failed,
        errors: report.errors,
    }))
}
