use std::net::SocketAddr;

use anyhow::Context;
use checkout_service::app::{build_router, AppState, EXPIRED_GRACE, SWEEP_EVERY};
use checkout_service::session::spawn_session_sweeper;
use checkout_service::CheckoutConfig;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = CheckoutConfig::from_env()?;
    let ip: std::net::IpAddr = config.host.parse().context("HOST must be an IP address")?;
    let addr = SocketAddr::from((ip, config.port));
    info!(
        backend = %config.backend_base_url,
        service_charge_bps = config.service_charge_bps,
        hold_ttl_secs = config.hold_ttl.as_secs(),
        "checkout-service configured"
    );

    let state = AppState::from_config(config).context("failed to build backend client")?;
    spawn_session_sweeper(state.sessions.clone(), SWEEP_EVERY, EXPIRED_GRACE);
    let app = build_router(state);

    info!(%addr, "starting checkout-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
