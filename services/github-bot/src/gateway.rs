//! Repository Gateway
//!
//! The operations the reconciler, poll loop and webhook handler need from the
//! code-hosting API. `GitHubGateway` is the production implementation.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::metrics::RequestCounter;
use crate::pr::{AnnotatedComment, PrRef, Repository, Review};

#[async_trait]
pub trait RepositoryGateway: Send + Sync {
    /// Repositories visible to the installation and owned by the organization
    async fn list_org_repositories(&self) -> Result<Vec<Repository>, GatewayError>;

    /// Every issue/PR comment in `repo` authored by the bot, with its "+1" count
    async fn list_bot_comments(&self, repo: &Repository)
        -> Result<Vec<AnnotatedComment>, GatewayError>;

    /// Reviews on a pull request, oldest first
    async fn list_reviews(&self, pr: &PrRef) -> Result<Vec<Review>, GatewayError>;

    async fn create_approval_review(&self, pr: &PrRef, body: &str) -> Result<(), GatewayError>;

    async fn dismiss_review(
        &self,
        pr: &PrRef,
        review_id: u64,
        message: &str,
    ) -> Result<(), GatewayError>;

    async fn post_issue_comment(&self, pr: &PrRef, body: &str) -> Result<(), GatewayError>;

    /// Calls made so far
    fn requests(&self) -> &RequestCounter;
}
