use crate::api::{parse_id, AppState};
use crate::auth::Role;
use crate::domain::SettlementBatch;
use crate::engine::PostingPreview;
use crate::error::AppError;
use crate::orchestration::PostOutcome;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub ok: bool,
    pub batch: SettlementBatch,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub ok: bool,
    pub balanced: bool,
    #[serde(flatten)]
    pub preview: PostingPreview,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub outcome: PostOutcome,
}

pub async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BatchResponse>, AppError> {
    let batch_id = parse_id(&id, "batch id")?;
    state.authorize(&headers, Role::FinanceReader).await?;

    let batch = state
        .batches
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Settlement batch {} not found", batch_id)))?;
    Ok(Json(BatchResponse { ok: true, batch }))
}

pub async fn get_preview(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<PreviewResponse>, AppError> {
    let batch_id = parse_id(&id, "batch id")?;
    state.authorize(&headers, Role::FinanceReader).await?;

    let preview = state.posting.preview(batch_id).await?;
    Ok(Json(PreviewResponse {
        ok: true,
        balanced: preview.is_balanced(),
        preview,
    }))
}

pub async fn post_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<PostResponse>, AppError> {
    let batch_id = parse_id(&id, "batch id")?;
    let actor = state.authorize(&headers, Role::FinanceWriter).await?;

    let outcome = state.posting.post(batch_id, &actor).await?;
    Ok(Json(PostResponse { ok: true, outcome }))
}

pub async fn exclude_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BatchResponse>, AppError> {
    let batch_id = parse_id(&id, "batch id")?;
    let actor = state.authorize(&headers, Role::FinanceWriter).await?;

    let batch = state.posting.exclude(batch_id, &actor).await?;
    Ok(Json(BatchResponse { ok: true, batch }))
}

pub async fn void_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BatchResponse>, AppError> {
    let batch_id = parse_id(&id, "batch id")?;
    let actor = state.authorize(&headers, Role::FinanceWriter).await?;

    let batch = state.posting.void(batch_id, &actor).await?;
    Ok(Json(BatchResponse { ok: true, batch }))
}
