use tracing_subscriber::EnvFilter;

use airwave_lib::config::Config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    if let Err(e) = airwave_lib::run(config).await {
        tracing::error!("Fatal: {}", e);
        std::process::exit(1);
    }
}
