/*
 * Proteus - Uniswap V3 swap and liquidity position service
 * Main entry point for the application
 */

use proteus::{api, config::Config, service::TradingService};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting Proteus trading service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Configuration loaded successfully");

    let service = TradingService::new(config.clone()).await?;

    let api_state = api::ApiState {
        config: config.clone(),
        service,
    };

    info!(
        "Starting API server on {}:{}",
        config.server.host, config.server.port
    );

    let rocket = api::create_rocket(api_state);
    rocket.launch().await?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proteus=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
