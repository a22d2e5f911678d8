//! GitHub Gateway
//!
//! `RepositoryGateway` over the GitHub REST API, authenticated as a GitHub App
//! installation. The installation is looked up once, lazily, on first use;
//! installation tokens are cached and refreshed shortly before they expire.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::auth::{AppCredentials, InstallationToken};
use crate::config::Config;
use crate::error::GatewayError;
use crate::gateway::RepositoryGateway;
use crate::metrics::RequestCounter;
use crate::pr::{AnnotatedComment, PrRef, Repository, Review, ReviewState};

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "umbridge";
const PER_PAGE: usize = 100;

/// Everything `GitHubGateway` needs to talk to GitHub
pub struct GatewaySettings {
    pub api_url: String,
    pub org: String,
    pub bot_login: String,
    pub credentials: AppCredentials,
    /// Delay between installation lookups
    pub retry_delay: Duration,
    /// Bound on installation lookups, `None` retries forever
    pub max_attempts: Option<u32>,
}

impl GatewaySettings {
    pub fn from_config(config: &Config, credentials: AppCredentials) -> Self {
        Self {
            api_url: config.github_api_url.trim_end_matches('/').to_string(),
            org: config.org.clone(),
            bot_login: config.bot_login(),
            credentials,
            retry_delay: config.installation_retry_delay(),
            max_attempts: config.installation_max_attempts,
        }
    }
}

/// GitHub App client scoped to a single organization installation
pub struct GitHubGateway {
    http: Client,
    api_url: String,
    org: String,
    bot_login: String,
    credentials: AppCredentials,
    retry_delay: Duration,
    max_attempts: Option<u32>,
    installation: OnceCell<u64>,
    token: Mutex<Option<InstallationToken>>,
    requests: RequestCounter,
}

// ============================================================
// API Types
// ============================================================

#[derive(Debug, Deserialize)]
struct Account {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Installation {
    id: u64,
    account: Option<Account>,
}

#[derive(Debug, Deserialize)]
struct InstallationRepositories {
    repositories: Vec<RepositoryPayload>,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    name: String,
    owner: Account,
}

#[derive(Debug, Deserialize)]
struct IssueComment {
    id: u64,
    user: Option<Account>,
    issue_url: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    reactions: Option<Reactions>,
}

#[derive(Debug, Deserialize)]
struct Reactions {
    #[serde(rename = "+1", default)]
    plus_one: u32,
}

#[derive(Debug, Deserialize)]
struct ReviewPayload {
    id: u64,
    user: Option<Account>,
    state: ReviewState,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct CreateReviewRequest<'a> {
    event: &'static str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct DismissReviewRequest<'a> {
    message: &'a str,
    event: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateCommentRequest<'a> {
    body: &'a str,
}

/// Outcome of matching installations against the organization login
#[derive(Debug, PartialEq, Eq)]
enum InstallationMatch {
    Found(u64),
    Missing,
    Ambiguous(usize),
}

// ============================================================
// Client Implementation
// ============================================================

impl GitHubGateway {
    pub fn new(settings: GatewaySettings) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            api_url: settings.api_url,
            org: settings.org,
            bot_login: settings.bot_login,
            credentials: settings.credentials,
            retry_delay: settings.retry_delay,
            max_attempts: settings.max_attempts,
            installation: OnceCell::new(),
            token: Mutex::new(None),
            requests: RequestCounter::new(),
        })
    }

    /// Installation ID for the organization, resolved on first call.
    ///
    /// Concurrent callers share one in-flight lookup. A failed lookup leaves the
    /// cell empty, so the next call starts over.
    pub async fn installation_id(&self) -> Result<u64, GatewayError> {
        self.installation
            .get_or_try_init(|| self.resolve_installation())
            .await
            .copied()
    }

    async fn resolve_installation(&self) -> Result<u64, GatewayError> {
        let mut attempt: u32 = 1;

        loop {
            let installations = self.list_installations().await?;

            match select_installation(&installations, &self.org) {
                InstallationMatch::Found(id) => {
                    info!(
                        org = %self.org,
                        installation_id = id,
                        "Resolved GitHub App installation"
                    );
                    return Ok(id);
                }
                unmatched => {
                    if self.max_attempts.is_some_and(|max| attempt >= max) {
                        return Err(GatewayError::InstallationUnresolved {
                            org: self.org.clone(),
                            attempts: attempt,
                        });
                    }

                    warn!(
                        org = %self.org,
                        attempt,
                        found = ?unmatched,
                        retry_in_secs = self.retry_delay.as_secs(),
                        "No unique installation for organization, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Every installation of the App, authenticated with the App JWT
    async fn list_installations(&self) -> Result<Vec<Installation>, GatewayError> {
        let jwt = self.jwt()?;
        let mut all = Vec::new();
        let mut page: u32 = 1;

        loop {
            let response = self
                .http
                .get(format!("{}/app/installations", self.api_url))
                .bearer_auth(&jwt)
                .header(ACCEPT, GITHUB_ACCEPT)
                .header("X-GitHub-Api-Version", API_VERSION)
                .query(&[("per_page", PER_PAGE as u32), ("page", page)])
                .send()
                .await?;

            let batch: Vec<Installation> = check_status(response).await?.json().await?;
            let last = batch.len() < PER_PAGE;
            all.extend(batch);

            if last {
                return Ok(all);
            }
            page += 1;
        }
    }

    fn jwt(&self) -> Result<String, GatewayError> {
        self.credentials
            .generate_jwt()
            .map_err(|e| GatewayError::Auth(format!("{e:#}")))
    }

    /// Exchange JWT for an installation access token, reusing the cached one while fresh
    async fn access_token(&self) -> Result<String, GatewayError> {
        let installation_id = self.installation_id().await?;
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh_at(Utc::now())) {
            return Ok(token.token.clone());
        }

        debug!(installation_id, "Exchanging JWT for installation token");

        let response = self
            .http
            .post(format!(
                "{}/app/installations/{}/access_tokens",
                self.api_url, installation_id
            ))
            .bearer_auth(self.jwt()?)
            .header(ACCEPT, GITHUB_ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await?;

        let token: InstallationToken = check_status(response).await?.json().await?;
        let value = token.token.clone();
        *cached = Some(token);

        Ok(value)
    }

    /// Build a request authenticated as the installation, counting it
    async fn authorized(&self, method: Method, path: &str) -> Result<RequestBuilder, GatewayError> {
        let token = self.access_token().await?;
        self.requests.increment();

        Ok(self
            .http
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(token)
            .header(ACCEPT, GITHUB_ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION))
    }

    /// GET every page of a listing endpoint
    async fn get_pages<P, T, F>(&self, path: &str, items: F) -> Result<Vec<T>, GatewayError>
    where
        P: DeserializeOwned + Send,
        T: Send,
        F: Fn(P) -> Vec<T> + Send + Sync,
    {
        let mut all = Vec::new();
        let mut page: u32 = 1;

        loop {
            let response = self
                .authorized(Method::GET, path)
                .await?
                .query(&[("per_page", PER_PAGE as u32), ("page", page)])
                .send()
                .await?;

            let batch = items(check_status(response).await?.json::<P>().await?);
            let last = batch.len() < PER_PAGE;
            all.extend(batch);

            if last {
                return Ok(all);
            }
            page += 1;
        }
    }
}

#[async_trait]
impl RepositoryGateway for GitHubGateway {
    async fn list_org_repositories(&self) -> Result<Vec<Repository>, GatewayError> {
        let payloads = self
            .get_pages("/installation/repositories", |p: InstallationRepositories| {
                p.repositories
            })
            .await?;

        let repos = org_repositories(payloads, &self.org);
        debug!(org = %self.org, count = repos.len(), "Listed organization repositories");
        Ok(repos)
    }

    async fn list_bot_comments(
        &self,
        repo: &Repository,
    ) -> Result<Vec<AnnotatedComment>, GatewayError> {
        let path = format!("/repos/{}/{}/issues/comments", self.org, repo.name);
        let comments = self.get_pages(&path, |p: Vec<IssueComment>| p).await?;

        Ok(bot_comments(comments, repo, &self.bot_login))
    }

    async fn list_reviews(&self, pr: &PrRef) -> Result<Vec<Review>, GatewayError> {
        let path = format!("/repos/{}/{}/pulls/{}/reviews", self.org, pr.repo, pr.number);
        let reviews = self.get_pages(&path, |p: Vec<ReviewPayload>| p).await?;

        Ok(reviews.into_iter().map(Review::from).collect())
    }

    async fn create_approval_review(&self, pr: &PrRef, body: &str) -> Result<(), GatewayError> {
        let path = format!("/repos/{}/{}/pulls/{}/reviews", self.org, pr.repo, pr.number);
        let response = self
            .authorized(Method::POST, &path)
            .await?
            .json(&CreateReviewRequest {
                event: "APPROVE",
                body,
            })
            .send()
            .await?;

        check_status(response).await?;
        info!(repo = %pr.repo, pr = pr.number, "Approved pull request");
        Ok(())
    }

    async fn dismiss_review(
        &self,
        pr: &PrRef,
        review_id: u64,
        message: &str,
    ) -> Result<(), GatewayError> {
        let path = format!(
            "/repos/{}/{}/pulls/{}/reviews/{}/dismissals",
            self.org, pr.repo, pr.number, review_id
        );
        let response = self
            .authorized(Method::PUT, &path)
            .await?
            .json(&DismissReviewRequest {
                message,
                event: "DISMISS",
            })
            .send()
            .await?;

        check_status(response).await?;
        info!(repo = %pr.repo, pr = pr.number, review_id, "Dismissed approval");
        Ok(())
    }

    async fn post_issue_comment(&self, pr: &PrRef, body: &str) -> Result<(), GatewayError> {
        let path = format!("/repos/{}/{}/issues/{}/comments", self.org, pr.repo, pr.number);
        let response = self
            .authorized(Method::POST, &path)
            .await?
            .json(&CreateCommentRequest { body })
            .send()
            .await?;

        check_status(response).await?;
        info!(repo = %pr.repo, pr = pr.number, "Posted comment");
        Ok(())
    }

    fn requests(&self) -> &RequestCounter {
        &self.requests
    }
}

impl From<ReviewPayload> for Review {
    fn from(payload: ReviewPayload) -> Self {
        Review {
            id: payload.id,
            author: payload.user.map(|u| u.login),
            state: payload.state,
        }
    }
}

/// Turn a non-success response into `GatewayError::Api`, keeping GitHub's message
async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or(body);

    Err(GatewayError::Api {
        status: status.as_u16(),
        message,
    })
}

fn select_installation(installations: &[Installation], org: &str) -> InstallationMatch {
    let matching: Vec<u64> = installations
        .iter()
        .filter(|i| i.account.as_ref().is_some_and(|a| a.login == org))
        .map(|i| i.id)
        .collect();

    match matching.as_slice() {
        [id] => InstallationMatch::Found(*id),
        [] => InstallationMatch::Missing,
        many => InstallationMatch::Ambiguous(many.len()),
    }
}

fn org_repositories(payloads: Vec<RepositoryPayload>, org: &str) -> Vec<Repository> {
    payloads
        .into_iter()
        .filter(|r| r.owner.login == org)
        .map(|r| Repository::new(r.name))
        .collect()
}

fn bot_comments(
    comments: Vec<IssueComment>,
    repo: &Repository,
    bot_login: &str,
) -> Vec<AnnotatedComment> {
    comments
        .into_iter()
        .filter(|c| c.user.as_ref().is_some_and(|u| u.login == bot_login))
        .filter_map(|c| {
            let Some(number) = issue_number(&c.issue_url) else {
                warn!(
                    repo = %repo.name,
                    comment_id = c.id,
                    issue_url = %c.issue_url,
                    "Comment does not reference an issue number"
                );
                return None;
            };

            Some(AnnotatedComment {
                id: c.id,
                pr: PrRef::new(repo.name.clone(), number),
                plus_one: c.reactions.map(|r| r.plus_one).unwrap_or(0),
                created_at: c.created_at,
            })
        })
        .collect()
}

/// Issue number from the trailing segment of an `issue_url`
fn issue_number(issue_url: &str) -> Option<u64> {
    issue_url.rsplit('/').next()?.parse().ok()
}
