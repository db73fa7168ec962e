use rockfeed::{config::Config, make_router, run_app, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> rockfeed::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "rockfeed=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let address = config.address;
    let state = AppState::new(config).await?;
    let router = make_router(state)?;

    if let Err(error) = run_app(router, address).await {
        tracing::error!("Server error: {:#}", error);
        return Err(error);
    }
    Ok(())
}
