pub mod batches;
pub mod events;
pub mod health;
pub mod recon;

use crate::auth::{Actor, AuthProvider, Role};
use crate::config::Config;
use crate::db::Repository;
use crate::error::AppError;
use crate::ledger::LedgerClient;
use crate::normalize::HeaderRules;
use crate::orchestration::{BatchManager, PostingGate, ReconService};
use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::map_response,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Config,
    pub auth: Arc<dyn AuthProvider>,
    pub batches: BatchManager,
    pub posting: PostingGate,
    pub recon: ReconService,
}

impl AppState {
    pub fn new(
        repo: Arc<Repository>,
        config: Config,
        ledger: Arc<dyn LedgerClient>,
        auth: Arc<dyn AuthProvider>,
        rules: HeaderRules,
    ) -> Self {
        let batches = BatchManager::new(repo.clone(), Arc::new(rules));
        let posting = PostingGate::new(
            repo.clone(),
            ledger,
            config.posting_accounts.clone(),
            config.posting_lease_secs,
        );
        let mut recon = ReconService::new(repo.clone(), config.matching);
        if config.auto_post_on_match {
            recon = recon.with_auto_post(posting.clone());
        }

        Self {
            repo,
            config,
            auth,
            batches,
            posting,
            recon,
        }
    }

    /// Resolve the bearer token and check the caller holds `role`.
    pub async fn authorize(&self, headers: &HeaderMap, role: Role) -> Result<Actor, AppError> {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default();
        let actor = self.auth.resolve(token).await?;
        actor.require(role)?;
        Ok(actor)
    }
}

/// Parse a numeric path id, rejecting zero and negatives.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<i64, AppError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::BadRequest(format!("Invalid {}: {}", what, raw)))
}

/// `TimeoutLayer` answers an expired deadline with an empty 408; no handler returns 408.
async fn render_timeout(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT {
        return AppError::Timeout("request deadline exceeded".to_string()).into_response();
    }
    response
}

fn with_deadline<S>(router: Router<S>, deadline: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(TimeoutLayer::new(deadline))
        .layer(map_response(render_timeout))
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let deadline = Duration::from_millis(state.config.request_timeout_ms);

    let routes = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/events/:id/ingest", post(events::ingest_event))
        .route("/v1/batches/:id", get(batches::get_batch))
        .route("/v1/batches/:id/preview", get(batches::get_preview))
        .route("/v1/batches/:id/post", post(batches::post_batch))
        .route("/v1/batches/:id/exclude", post(batches::exclude_batch))
        .route("/v1/batches/:id/void", post(batches::void_batch))
        .route(
            "/v1/recon/bank/:id/candidates",
            get(recon::get_bank_candidates),
        )
        .route(
            "/v1/recon/payouts/:entity_type/:id/candidates",
            get(recon::get_payout_candidates),
        )
        .route("/v1/recon/candidates", post(recon::propose_match))
        .route("/v1/recon/links", post(recon::confirm_match))
        .route("/v1/recon/links/:id", get(recon::get_link))
        .route("/v1/recon/links/:id/void", post(recon::void_link));

    with_deadline(routes, deadline)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
