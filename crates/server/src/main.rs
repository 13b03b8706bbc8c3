mod api;
mod cli;
mod router;
mod startup;
mod state;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    synergia_core::config::load_dotenv();
    let config = synergia_core::Config::from_env();
    let args: Vec<String> = std::env::args().collect();

    cli::dispatch(config, &args).await
}
