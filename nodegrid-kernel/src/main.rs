/**
 * NODEGRID KERNEL - Point d'entrée du serveur de dashboard
 *
 * RÔLE : Orchestration des modules : config, message log, lookup d'adresses,
 * sondes de nœuds, bootstrap SSH et API HTTP.
 *
 * ARCHITECTURE : le message log externe est la source de vérité ; le kernel
 * réconcilie INSTANCE/FORGET et projette les instances sur une grille de cartes
 * par session de wallet.
 */

mod config;
mod configure;
mod dashboard;
mod grid;
mod health;
mod http;
mod keygen;
mod log_client;
mod models;
mod probe;
mod prompts;
mod reconcile;
mod resolver;
mod resources;
mod session;
mod view_model;

#[cfg(test)]
mod testing;

use crate::config::{load_config, GridConfig};
use crate::configure::{NodeConfigurator, SshExecutor};
use crate::dashboard::{Dashboard, DashboardSettings};
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::log_client::HttpMessageLog;
use crate::probe::StatusProbe;
use crate::resolver::SchedulerResolver;
use crate::session::SessionRegistry;

use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn build_dashboard(cfg: &GridConfig) -> anyhow::Result<Dashboard> {
    let log = HttpMessageLog::new(&cfg.log.api_url, &cfg.log.bridge_url, cfg.log.timeout())
        .context("message log client")?;
    let resolver = SchedulerResolver::new(&cfg.scheduler.allocation_url, cfg.scheduler.timeout())
        .context("scheduler client")?;
    let probe = StatusProbe::new(cfg.probe.port, cfg.probe.timeout()).context("status probe client")?;
    let executor = SshExecutor::new(&cfg.ssh.binary, cfg.ssh.timeout());

    Ok(Dashboard::new(
        Arc::new(log),
        Arc::new(resolver),
        probe,
        NodeConfigurator::new(Arc::new(executor), &cfg.ssh),
        HealthTracker::new(),
        DashboardSettings::from_config(cfg),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("nodegrid_kernel=info,tower_http=info")),
        )
        .init();

    let cfg = load_config().await;
    let api_key = std::env::var("NODEGRID_API_KEY").ok().filter(|key| !key.is_empty());
    if api_key.is_none() {
        info!("NODEGRID_API_KEY not set, API routes are open");
    }

    let app_state = AppState {
        dashboard: Arc::new(build_dashboard(&cfg)?),
        sessions: Arc::new(SessionRegistry::new()),
        public_dir: PathBuf::from(&cfg.server.public_dir),
        api_key,
    };
    let app = http::build_router(app_state);

    let addr = SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, cfg.server.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Server is running on port {} and accessible via IPv6", cfg.server.port);
    axum::serve(listener, app).await?;
    Ok(())
}
