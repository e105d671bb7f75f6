use anyhow::{Context, Result};
use clap::Parser;

use api::config::AppConfig;
use api::services::Services;
use api::{AppState, router, telemetry};

#[derive(Parser, Debug)]
#[command(name = "api", about = "HTTP front door for fraud-call analysis")]
struct Args {
    /// Address to bind the HTTP server to (host:port). Overrides `BIND_ADDR`.
    #[arg(long)]
    bind: Option<String>,

    /// Skip building the knowledge base at startup.
    #[arg(long)]
    no_init_kb: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init("info,tower_http=info");

    let mut config = AppConfig::from_env();
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    let bind_addr = config.server.bind_addr.clone();

    let services = Services::from_config(config)?;
    if !args.no_init_kb {
        // The service still answers without a knowledge base; profiling just finds no cases.
        if let Err(e) = services.ensure_knowledge().await {
            tracing::error!(error = %format!("{e:#}"), "knowledge base unavailable at startup");
        }
    }

    let app = router(AppState::new(services));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
