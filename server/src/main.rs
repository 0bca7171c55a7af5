//! schema-api server: loads metadata, serves the data API and runs the retention task.
//!
//! Run from repo root: `cargo run -p schema-api-server`

use schema_api::{
    app, load, spawn_cleanup, AppState, Bruteforce, PgStore, RetentionSettings, SchemaSource, Settings, TokenTable,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("schema_api=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.database_url)
        .await?;

    let source = match &settings.schema_path {
        Some(path) => SchemaSource::File(path.clone()),
        None => SchemaSource::Tables(pool.clone()),
    };
    let schema = load(&source).await?;
    tracing::info!(apis = schema.api_count(), "schema loaded");
    let schema = schema.shared();

    let tokens = TokenTable::parse(&settings.api_tokens, &settings.default_language)?;
    if tokens.is_empty() {
        tracing::warn!("API_TOKENS is empty, every API call will be rejected");
    }

    let bruteforce = Arc::new(Bruteforce::new(settings.bruteforce_max_attempts, settings.bruteforce_window));
    {
        let bruteforce = bruteforce.clone();
        let window = settings.bruteforce_window;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window);
            loop {
                ticker.tick().await;
                bruteforce.cleanup_expired();
            }
        });
    }

    let state = AppState {
        store: Arc::new(PgStore::new(pool.clone())),
        schema: schema.clone(),
        schema_source: Some(source),
        auth: Arc::new(tokens),
        bruteforce,
        db_timeout: settings.db_timeout,
        body_limit: settings.body_limit_bytes,
    };
    spawn_cleanup(pool, schema, RetentionSettings::from(&settings));

    let listener = TcpListener::bind(settings.bind_addr).await?;
    tracing::info!("schema-api listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app(state).into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
