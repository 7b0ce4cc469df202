//! Brandcast API server

use brandcast_api::{routes::create_router, AppState, Config};
use brandcast_shared::db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,brandcast_api=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let bind_address = config.bind_address.clone();

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations applied");

    let state = AppState::new(pool, config)?;

    // Sweep expired limiter windows so the in-memory map stays bounded
    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            limiter.cleanup().await;
        }
    });

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %bind_address, "Brandcast API listening");
    axum::serve(listener, app).await?;

    Ok(())
}
