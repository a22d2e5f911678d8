//! In-memory gateway and guideline source for tests

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::error::GatewayError;
use crate::gateway::RepositoryGateway;
use crate::guidelines::GuidelineSource;
use crate::metrics::RequestCounter;
use crate::pr::{AnnotatedComment, PrRef, Repository, Review, ReviewState};

pub(crate) const BOT: &str = "umbridge[bot]";

pub(crate) fn comment(id: u64, pr: PrRef, plus_one: u32, created_at: &str) -> AnnotatedComment {
    AnnotatedComment {
        id,
        pr,
        plus_one,
        created_at: DateTime::parse_from_rfc3339(created_at).unwrap().with_timezone(&Utc),
    }
}

#[derive(Default)]
struct FakeState {
    repos: Vec<Repository>,
    comments: HashMap<String, Vec<AnnotatedComment>>,
    reviews: HashMap<PrRef, Vec<Review>>,
    next_review_id: u64,
    posted: Vec<(PrRef, String)>,
    failing_reviews: HashSet<PrRef>,
    failing_approvals: HashSet<PrRef>,
    failing_listing: bool,
}

/// Gateway backed by in-memory state. Approvals and dismissals mutate the
/// review history the way GitHub does.
#[derive(Default)]
pub(crate) struct FakeGateway {
    state: Mutex<FakeState>,
    requests: RequestCounter,
    hold_listing: Mutex<Option<Arc<Notify>>>,
    pub listing_started: Notify,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_repo(&self, name: &str) {
        self.state.lock().unwrap().repos.push(Repository::new(name));
    }

    /// Insert or update a bot comment. Higher IDs are newer.
    pub fn set_comment(&self, id: u64, pr: &PrRef, plus_one: u32) {
        let mut state = self.state.lock().unwrap();
        let comments = state.comments.entry(pr.repo.clone()).or_default();
        comments.retain(|c| c.id != id);
        comments.push(AnnotatedComment {
            id,
            pr: pr.clone(),
            plus_one,
            created_at: Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap(),
        });
    }

    pub fn push_review(&self, pr: &PrRef, author: &str, state: ReviewState) -> u64 {
        let mut inner = self.state.lock().unwrap();
        inner.next_review_id += 1;
        let id = inner.next_review_id;
        inner.reviews.entry(pr.clone()).or_default().push(Review {
            id,
            author: Some(author.to_string()),
            state,
        });
        id
    }

    pub fn reviews(&self, pr: &PrRef) -> Vec<Review> {
        self.state
            .lock()
            .unwrap()
            .reviews
            .get(pr)
            .cloned()
            .unwrap_or_default()
    }

    pub fn posted_comments(&self) -> Vec<(PrRef, String)> {
        self.state.lock().unwrap().posted.clone()
    }

    pub fn fail_reviews_for(&self, pr: &PrRef) {
        self.state.lock().unwrap().failing_reviews.insert(pr.clone());
    }

    pub fn fail_approvals_for(&self, pr: &PrRef) {
        self.state.lock().unwrap().failing_approvals.insert(pr.clone());
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().failing_listing = true;
    }

    /// Make `list_org_repositories` wait until the returned handle is notified
    pub fn hold_listing(&self) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        *self.hold_listing.lock().unwrap() = Some(release.clone());
        release
    }
}

fn server_error() -> GatewayError {
    GatewayError::Api {
        status: 500,
        message: "Server Error".to_string(),
    }
}

#[async_trait]
impl RepositoryGateway for FakeGateway {
    async fn list_org_repositories(&self) -> Result<Vec<Repository>, GatewayError> {
        self.requests.increment();
        self.listing_started.notify_one();

        let hold = self.hold_listing.lock().unwrap().take();
        if let Some(release) = hold {
            release.notified().await;
        }

        let state = self.state.lock().unwrap();
        if state.failing_listing {
            return Err(server_error());
        }
        Ok(state.repos.clone())
    }

    async fn list_bot_comments(
        &self,
        repo: &Repository,
    ) -> Result<Vec<AnnotatedComment>, GatewayError> {
        self.requests.increment();
        Ok(self
            .state
            .lock()
            .unwrap()
            .comments
            .get(&repo.name)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_reviews(&self, pr: &PrRef) -> Result<Vec<Review>, GatewayError> {
        self.requests.increment();
        let state = self.state.lock().unwrap();
        if state.failing_reviews.contains(pr) {
            return Err(server_error());
        }
        Ok(state.reviews.get(pr).cloned().unwrap_or_default())
    }

    async fn create_approval_review(&self, pr: &PrRef, _body: &str) -> Result<(), GatewayError> {
        self.requests.increment();
        if self.state.lock().unwrap().failing_approvals.contains(pr) {
            return Err(GatewayError::Api {
                status: 422,
                message: "Can not approve your own pull request".to_string(),
            });
        }
        self.push_review(pr, BOT, ReviewState::Approved);
        Ok(())
    }

    async fn dismiss_review(
        &self,
        pr: &PrRef,
        review_id: u64,
        _message: &str,
    ) -> Result<(), GatewayError> {
        self.requests.increment();
        let mut state = self.state.lock().unwrap();
        let review = state
            .reviews
            .get_mut(pr)
            .and_then(|reviews| reviews.iter_mut().find(|r| r.id == review_id))
            .ok_or(GatewayError::Api {
                status: 404,
                message: "Not Found".to_string(),
            })?;
        review.state = ReviewState::Dismissed;
        Ok(())
    }

    async fn post_issue_comment(&self, pr: &PrRef, body: &str) -> Result<(), GatewayError> {
        self.requests.increment();
        self.state
            .lock()
            .unwrap()
            .posted
            .push((pr.clone(), body.to_string()));
        Ok(())
    }

    fn requests(&self) -> &RequestCounter {
        &self.requests
    }
}

/// Guideline source returning fixed markdown, or failing
pub(crate) struct StaticGuidelines(pub Option<String>);

#[async_trait]
impl GuidelineSource for StaticGuidelines {
    async fn fetch_markdown(&self) -> anyhow::Result<String> {
        self.0
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Notion API error (401): API token is invalid."))
    }
}
