use crate::api::{parse_id, AppState};
use crate::auth::Role;
use crate::error::AppError;
use crate::orchestration::IngestOutcome;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
}

/// Parse a settlement event into its batch. Repeating the call inserts nothing new.
pub async fn ingest_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<IngestResponse>, AppError> {
    let event_id = parse_id(&id, "event id")?;
    let actor = state.authorize(&headers, Role::FinanceWriter).await?;

    let outcome = state.batches.ingest_event(event_id).await?;
    tracing::debug!(event_id, actor = %actor.id, parsed = outcome.parsed, "Ingest requested");

    Ok(Json(IngestResponse { ok: true, outcome }))
}
