mod adjust;
mod api;
mod auth;
mod config;
mod db;
mod error;
mod models;
mod syllabus;

use api::{app_router, ApiState};
use config::Config;
use db::Db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    log::info!(
        "starting study planner ({:?}, adjust policy {:?})",
        config.environment,
        config.adjust_policy
    );

    let db = Db::new(&config.database_url).await?;
    let state = ApiState {
        db,
        adjust_policy: config.adjust_policy,
        token_ttl_hours: config.token_ttl_hours,
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    log::info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for ctrl-c: {}", e);
    }
}
