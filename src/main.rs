use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

use eventbook::config::AppConfig;
use eventbook::db;
use eventbook::services::payment::esewa::EsewaClient;
use eventbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    if config.admin_token == "changeme" {
        tracing::warn!("ADMIN_TOKEN is not set; admin endpoints use the development token");
    }
    tracing::info!(
        product_code = %config.esewa.product_code,
        form_url = %config.esewa.form_url,
        "eSewa gateway configured"
    );

    let gateway = EsewaClient::new(config.esewa.status_url.clone());

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        gateway: Box::new(gateway),
    });

    let app = eventbook::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
