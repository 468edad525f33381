//! Fabric provisioning server binary: wires `Config` → `PgPool` → kernel
//! deps, starts the per-replica expiration sweeper (§4.5), and serves a
//! minimal health-check router. The provisioning RPC surface itself is out
//! of scope for this core (§1) and is not mounted here.

use std::sync::Arc;

use anyhow::Result;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use server_core::config::Config;
use server_core::kernel::{spawn_sweeper, ServerKernel};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = Config::from_env()?;
    let port = config.port;
    let sweep_interval = config.sweep_interval;

    tracing::info!(fabric = %config.fabric, vrf = %config.vrf, "starting fabric provisioning server");

    let kernel = ServerKernel::from_config(config).await?;

    let sweeper = spawn_sweeper(
        kernel.db.clone(),
        kernel.job_service.clone(),
        sweep_interval,
    );

    let app = Router::new()
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(kernel));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "health-check server listening");

    let serve = axum::serve(listener, app);
    tokio::select! {
        result = serve => result.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            sweeper.abort();
            Ok(())
        }
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
