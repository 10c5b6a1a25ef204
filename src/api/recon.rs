use crate::api::{parse_id, AppState};
use crate::auth::Role;
use crate::domain::{EntityType, ReconLink};
use crate::error::AppError;
use crate::orchestration::{BankCandidates, ConfirmOutcome, MatchRequest, PayoutCandidates};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use std::str::FromStr;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BankCandidatesResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub result: BankCandidates,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutCandidatesResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub result: PayoutCandidates,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResponse {
    pub ok: bool,
    pub link: ReconLink,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub outcome: ConfirmOutcome,
}

fn match_body(body: Result<Json<MatchRequest>, JsonRejection>) -> Result<MatchRequest, AppError> {
    body.map(|Json(request)| request)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

pub async fn get_bank_candidates(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BankCandidatesResponse>, AppError> {
    let bank_txn_id = parse_id(&id, "bank transaction id")?;
    state.authorize(&headers, Role::FinanceReader).await?;

    let result = state.recon.candidates_for_bank_txn(bank_txn_id).await?;
    Ok(Json(BankCandidatesResponse { ok: true, result }))
}

pub async fn get_payout_candidates(
    State(state): State<AppState>,
    Path((entity_type, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<PayoutCandidatesResponse>, AppError> {
    let entity_type = EntityType::from_str(&entity_type).map_err(AppError::BadRequest)?;
    let entity_id = parse_id(&id, "entity id")?;
    state.authorize(&headers, Role::FinanceReader).await?;

    let result = state
        .recon
        .candidates_for_payout(entity_type, entity_id)
        .await?;
    Ok(Json(PayoutCandidatesResponse { ok: true, result }))
}

pub async fn propose_match(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<MatchRequest>, JsonRejection>,
) -> Result<Json<LinkResponse>, AppError> {
    let request = match_body(body)?;
    let actor = state.authorize(&headers, Role::FinanceWriter).await?;

    let link = state.recon.propose_match(&request, &actor).await?;
    Ok(Json(LinkResponse { ok: true, link }))
}

pub async fn confirm_match(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<MatchRequest>, JsonRejection>,
) -> Result<Json<ConfirmResponse>, AppError> {
    let request = match_body(body)?;
    let actor = state.authorize(&headers, Role::FinanceWriter).await?;

    let outcome = state.recon.confirm_match(&request, &actor).await?;
    Ok(Json(ConfirmResponse { ok: true, outcome }))
}

pub async fn get_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<LinkResponse>, AppError> {
    let link_id = parse_id(&id, "link id")?;
    state.authorize(&headers, Role::FinanceReader).await?;

    let link = state.recon.get_link(link_id).await?;
    Ok(Json(LinkResponse { ok: true, link }))
}

pub async fn void_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<LinkResponse>, AppError> {
    let link_id = parse_id(&id, "link id")?;
    let actor = state.authorize(&headers, Role::FinanceWriter).await?;

    let link = state.recon.void_link(link_id, &actor).await?;
    Ok(Json(LinkResponse { ok: true, link }))
}
