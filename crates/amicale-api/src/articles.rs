use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use uuid::Uuid;

use amicale_types::api::{Claims, CreateArticleRequest, UpdateArticleRequest};
use amicale_types::models::{Article, ArticleStatus};

use crate::error::ApiError;
use crate::AppState;

pub async fn list_articles(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state.db.list_articles()?;
    let mut articles = Vec::new();
    for row in rows {
        let article = row.into_article()?;
        if article.is_visible_for(claims.sub, claims.role, &claims.orgs) {
            articles.push(article);
        }
    }
    Ok(Json(articles))
}

/// Invisible articles read as missing rather than forbidden.
pub async fn get_article(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let article = state
        .db
        .get_article(&id.to_string())?
        .ok_or(ApiError::NotFound)?
        .into_article()?;
    if !article.is_visible_for(claims.sub, claims.role, &claims.orgs) {
        return Err(ApiError::NotFound);
    }
    Ok(Json(article))
}

pub async fn create_article(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateArticleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !claims.is_admin_of(req.org) {
        return Err(ApiError::Forbidden(format!(
            "not an administrator of {}",
            req.org
        )));
    }
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".into()));
    }

    let now = Utc::now();
    let status = match req.publish_at {
        Some(at) => {
            if at <= now {
                return Err(ApiError::BadRequest(
                    "publication date must be in the future".into(),
                ));
            }
            ArticleStatus::Scheduled
        }
        None => ArticleStatus::Draft,
    };

    let article = Article {
        id: Uuid::new_v4(),
        org: req.org,
        author_id: claims.sub,
        title: req.title.trim().to_string(),
        body_html: req.body_html,
        status,
        visibility: req.visibility,
        publish_at: req.publish_at,
        created_at: now,
        updated_at: now,
    };
    state.db.insert_article(&article)?;
    Ok((StatusCode::CREATED, Json(article)))
}

fn can_manage(claims: &Claims, article: &Article) -> bool {
    article.author_id == claims.sub || claims.is_admin_of(article.org)
}

pub async fn update_article(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateArticleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut article = state
        .db
        .get_article(&id.to_string())?
        .ok_or(ApiError::NotFound)?
        .into_article()?;
    if !can_manage(&claims, &article) {
        return Err(ApiError::Forbidden(
            "only the author or an organization admin may edit this article".into(),
        ));
    }

    if let Some(title) = req.title {
        if title.trim().is_empty() {
            return Err(ApiError::BadRequest("title is required".into()));
        }
        article.title = title.trim().to_string();
    }
    if let Some(body_html) = req.body_html {
        article.body_html = body_html;
    }
    if let Some(visibility) = req.visibility {
        article.visibility = visibility;
    }

    // Status moves are one-way: draft -> scheduled -> published, with
    // scheduled optional.
    if req.publish_now {
        if article.status == ArticleStatus::Published {
            return Err(ApiError::BadRequest("article is already published".into()));
        }
        article.status = ArticleStatus::Published;
    } else if let Some(at) = req.publish_at {
        if article.status == ArticleStatus::Published {
            return Err(ApiError::BadRequest(
                "a published article cannot be rescheduled".into(),
            ));
        }
        if at <= Utc::now() {
            return Err(ApiError::BadRequest(
                "publication date must be in the future".into(),
            ));
        }
        article.status = ArticleStatus::Scheduled;
        article.publish_at = Some(at);
    }

    article.updated_at = Utc::now();
    if !state.db.update_article(&article)? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(article))
}

pub async fn delete_article(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let article = state
        .db
        .get_article(&id.to_string())?
        .ok_or(ApiError::NotFound)?
        .into_article()?;
    if !can_manage(&claims, &article) {
        return Err(ApiError::Forbidden(
            "only the author or an organization admin may delete this article".into(),
        ));
    }

    state.db.delete_article(&id.to_string())?;
    Ok(StatusCode::NO_CONTENT)
}
