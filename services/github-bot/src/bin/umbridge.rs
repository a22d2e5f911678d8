//! Umbridge
//!
//! Serves the GitHub webhook endpoint and runs the reaction poll loop.
//!
//! ## Usage
//!
//! ```bash
//! # Run the webhook server and poll loop
//! umbridge --org acme --app-id 123456 --app-name Umbridge \
//!   --private-key-path ./key.pem --reaction-threshold 2 ...
//!
//! # Run a single poll cycle and exit
//! umbridge --once ...
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use umbridge::webhook::{router, WebhookState};
use umbridge::{
    Config, GatewaySettings, GitHubGateway, NotionGuidelines, PollOrchestrator, Reconciler,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .json()
        .init();

    let config = Config::parse();
    let bot_login = config.bot_login();

    info!(
        org = %config.org,
        bot_login = %bot_login,
        threshold = config.reaction_threshold,
        interval_ms = config.poll_interval_ms,
        "Starting Umbridge"
    );

    let credentials = config.app_credentials()?;
    let gateway = Arc::new(
        GitHubGateway::new(GatewaySettings::from_config(&config, credentials))
            .context("Failed to create GitHub client")?,
    );
    let poller = Arc::new(PollOrchestrator::new(
        gateway.clone(),
        Reconciler::new(config.reaction_threshold, bot_login),
    ));

    if config.once {
        let report = poller.run_cycle().await?;
        info!(
            repositories = report.repositories,
            approved = report.approved,
            dismissed = report.dismissed,
            failed = report.failed,
            requests = report.requests,
            "Single cycle complete"
        );
        return Ok(());
    }

    let guidelines = Arc::new(NotionGuidelines::new(
        &config.notion_api_url,
        &config.notion_page_id,
        &config.notion_token,
    )?);

    let period = config.poll_interval();
    tokio::spawn(async move { poller.run(period).await });

    let app = router(WebhookState::new(
        config.webhook_secret.as_bytes(),
        gateway,
        guidelines,
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Webhook listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
