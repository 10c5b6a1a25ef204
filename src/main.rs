use anyhow::Context;
use settlerecon::domain::LedgerAccount;
use settlerecon::{api, config::Config, db::init_db, Repository, SqliteLedger, StaticTokenAuth};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;
    let rules = config.header_rules().context("failed to load header rules")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("failed to initialize database at {}", config.database_path))?;

    let ledger = SqliteLedger::new(pool.clone());
    let accounts: Vec<LedgerAccount> = config.posting_accounts.accounts().cloned().collect();
    ledger
        .register_accounts(&accounts)
        .await
        .context("failed to register posting accounts")?;
    if accounts.is_empty() {
        tracing::warn!("No posting accounts configured, every post will be blocked as missing");
    }

    let auth = StaticTokenAuth::new(&config.api_tokens);
    if auth.is_empty() {
        tracing::warn!("No API tokens configured, every request will be rejected");
    }

    let repo = Arc::new(Repository::new(pool));
    let state = api::AppState::new(repo, config, Arc::new(ledger), Arc::new(auth), rules);
    let app = api::create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
