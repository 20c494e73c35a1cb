mod api;
mod artifacts;
mod compiler;
mod datasets;
mod dispatch;
mod housekeeping;
mod jobs;
mod manager;
mod nodes;
mod reconcile;
mod session;
mod templates;
#[cfg(test)]
mod testutil;
mod ui;

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use reef_core::config::ManagerConfig;

use crate::api::auth::AuthService;
use crate::manager::Manager;
use crate::ui::UiBus;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ManagerConfig::from_env().context("configuration")?;
    let port = config.port;

    let auth = web::Data::new(AuthService::new(
        config.admin_token.clone(),
        config.session_secret.clone(),
    ));

    let (bus, ui, refresh_rx) = UiBus::new();
    let manager = Arc::new(
        Manager::bootstrap(config, ui)
            .await
            .context("manager startup")?,
    );

    tokio::spawn(bus.run());
    tokio::spawn(manager.clone().run_refresh_worker(refresh_rx));

    {
        let manager = manager.clone();
        tokio::spawn(async move {
            // Housekeeping only fails on store/system faults; nothing useful
            // survives those.
            if let Err(e) = housekeeping::run(manager).await {
                error!("housekeeper failed: {e}");
                std::process::exit(1);
            }
        });
    }

    let manager_data = web::Data::from(manager);

    info!(port, "manager listening");
    HttpServer::new(move || {
        App::new()
            .app_data(manager_data.clone())
            .app_data(auth.clone())
            .configure(api::routes)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
    .context("http server")
}
