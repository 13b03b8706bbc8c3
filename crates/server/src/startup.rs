//! Wiring: upstream client, encoder, pipeline and scheduler.

use std::sync::Arc;

use synergia_core::{Config, SystemClock};
use synergia_gateway::{Credentials, LibrusClient};
use synergia_ics::IcsEncoder;
use synergia_refresh::{RefreshPipeline, RefreshScheduler};
use tracing::info;

use crate::router;
use crate::state::AppState;

pub fn build_app_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    let gateway = Arc::new(LibrusClient::from_config(&config.upstream)?);
    let encoder = Arc::new(IcsEncoder::from_config(&config.calendar));
    let credentials = Credentials::new(
        config.upstream.login.clone().unwrap_or_default(),
        config.upstream.password.clone().unwrap_or_default(),
    );

    let pipeline = Arc::new(RefreshPipeline::new(
        gateway,
        encoder,
        credentials,
        &config.refresh,
    ));
    let scheduler = Arc::new(RefreshScheduler::new(
        pipeline,
        Arc::new(SystemClock),
        &config.refresh,
    ));
    Ok(Arc::new(AppState::new(config, scheduler)))
}

pub async fn serve(config: Config) -> anyhow::Result<()> {
    config.log_summary();
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = build_app_state(config)?;

    // Readers never wait for startup; cold lessons reads refresh on demand.
    let _refresh = Arc::clone(&state.scheduler).spawn();

    let app = router::build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
