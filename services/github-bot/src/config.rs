//! Configuration
//!
//! Every setting comes from the environment, and each can be overridden on the
//! command line.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::AppCredentials;

/// Prefix on every review the bot writes.
pub const BOT_PREFIX: &str = "UMBRIDGE";

/// Body of the approving review.
pub const APPROVAL_BODY: &str = "UMBRIDGE: You know, I really love rules.";

/// Message attached when the bot dismisses its own approval.
pub const DISMISSAL_MESSAGE: &str = "UMBRIDGE: I must not ignore rules.";

/// Reaction-moderated PR approval bot
#[derive(Parser, Debug, Clone)]
#[command(name = "umbridge")]
#[command(about = "Posts review guidelines on new PRs and approves them once enough people react")]
#[command(version)]
pub struct Config {
    /// GitHub organization login
    #[arg(long, env = "GITHUB_ORG_NAME")]
    pub org: String,

    /// GitHub App ID
    #[arg(long, env = "GITHUB_APP_ID")]
    pub app_id: String,

    /// GitHub App display name (used to derive the bot login)
    #[arg(long, env = "GITHUB_APP_NAME")]
    pub app_name: String,

    /// Path to the private key PEM file
    #[arg(long, env = "GITHUB_APP_PRIVATE_KEY_PATH")]
    pub private_key_path: PathBuf,

    /// Secret used to sign webhook deliveries
    #[arg(long, env = "GITHUB_WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: String,

    /// Number of "+1" reactions required to approve a PR
    #[arg(long, env = "REACTION_THRESHOLD", value_parser = clap::value_parser!(u32).range(1..))]
    pub reaction_threshold: u32,

    /// Poll interval in milliseconds
    #[arg(
        long,
        env = "POLL_INTERVAL_MS",
        default_value = "7000",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval_ms: u64,

    /// Webhook listen port
    #[arg(long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// GitHub REST API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub github_api_url: String,

    /// Notion page holding the review guidelines
    #[arg(long, env = "NOTION_PAGE_ID")]
    pub notion_page_id: String,

    /// Notion integration token
    #[arg(long, env = "NOTION_INTEGRATION_TOKEN", hide_env_values = true)]
    pub notion_token: String,

    /// Notion API base URL
    #[arg(long, env = "NOTION_API_URL", default_value = "https://api.notion.com")]
    pub notion_api_url: String,

    /// Delay between installation lookups while the App is not yet installed
    #[arg(long, env = "INSTALLATION_RETRY_SECS", default_value = "5")]
    pub installation_retry_secs: u64,

    /// Give up the installation lookup after this many attempts (retries forever if unset)
    #[arg(long, env = "INSTALLATION_MAX_ATTEMPTS")]
    pub installation_max_attempts: Option<u32>,

    /// Run a single poll cycle and exit
    #[arg(long)]
    pub once: bool,
}

impl Config {
    /// Login GitHub shows for the App, e.g. "Umbridge Bot" -> "umbridge-bot[bot]"
    pub fn bot_login(&self) -> String {
        bot_login_for(&self.app_name)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn installation_retry_delay(&self) -> Duration {
        Duration::from_secs(self.installation_retry_secs)
    }

    /// Read and parse the App's private key
    pub fn app_credentials(&self) -> Result<AppCredentials> {
        let key_data = fs::read(&self.private_key_path).with_context(|| {
            format!(
                "Please save a private key at: {}",
                self.private_key_path.display()
            )
        })?;

        AppCredentials::from_pem(self.app_id.clone(), &key_data)
    }
}

pub fn bot_login_for(app_name: &str) -> String {
    format!("{}[bot]", app_name.to_lowercase().split(' ').collect::<Vec<_>>().join("-"))
}
