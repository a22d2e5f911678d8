//! Umbridge
//!
//! GitHub App that moderates pull-request approvals through reactions.
//!
//! ## Responsibilities
//!
//! - When a pull request is opened, post the team's review guidelines as a comment.
//! - On a fixed interval, count "+1" reactions on the bot's own comments across every
//!   repository in the organization. Approve pull requests whose comment reaches the
//!   reaction threshold, and dismiss the approval again once it drops below.
//!
//! Nothing is persisted between poll cycles: review state is rebuilt from the GitHub API
//! each time, so a cycle that fails half way is repaired by the next one.
//!
//! ## Binary
//!
//! ```bash
//! GITHUB_ORG_NAME=acme \
//! GITHUB_APP_ID=123456 \
//! GITHUB_APP_NAME="Umbridge" \
//! GITHUB_APP_PRIVATE_KEY_PATH=./key.pem \
//! GITHUB_WEBHOOK_SECRET=... \
//! REACTION_THRESHOLD=2 \
//! NOTION_PAGE_ID=... \
//! NOTION_INTEGRATION_TOKEN=... \
//! umbridge
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod github;
pub mod guidelines;
pub mod metrics;
pub mod poller;
pub mod pr;
pub mod reconcile;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::GatewayError;
pub use gateway::RepositoryGateway;
pub use github::{GatewaySettings, GitHubGateway};
pub use guidelines::{GuidelineSource, NotionGuidelines};
pub use poller::{CycleReport, PollOrchestrator};
pub use reconcile::{ReconcilePlan, Reconciler};
