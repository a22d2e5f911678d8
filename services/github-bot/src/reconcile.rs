//! Approval Reconciler
//!
//! Converges each pull request's review state with the reactions on the bot's
//! comment: approve once "+1" reactions reach the threshold, dismiss the
//! approval once they fall below it.
//!
//! Reconciliation happens in two phases:
//! 1. `snapshot` reads comments and reviews from the gateway, concurrently per
//!    repository and per pull request.
//! 2. `plan` is a pure function of that snapshot. Re-planning an unchanged
//!    snapshot after its actions were applied yields no actions.

use futures::future::try_join_all;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::GatewayError;
use crate::gateway::RepositoryGateway;
use crate::pr::{Action, AnnotatedComment, PrRef, Repository, Review, ReviewState};

/// Reaction count and review history for one pull request
#[derive(Debug, Clone)]
pub struct PullRequestSnapshot {
    pub pr: PrRef,
    /// "+1" reactions on the bot's comment
    pub plus_one: u32,
    /// Reviews, oldest first
    pub reviews: Vec<Review>,
}

/// Everything `plan` needs, read in one pass
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub pull_requests: Vec<PullRequestSnapshot>,
}

/// Desired vs. current approval state of a pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewDecision {
    pub should_approve: bool,
    /// Whether the bot's most recent review is an approval
    pub is_approved: bool,
    /// ID of the bot's most recent review
    pub approval_review_id: Option<u64>,
}

impl ReviewDecision {
    pub fn evaluate(plus_one: u32, threshold: u32, reviews: &[Review], bot_login: &str) -> Self {
        let latest = latest_review_by(reviews, bot_login);

        Self {
            should_approve: plus_one >= threshold,
            is_approved: latest.is_some_and(|r| r.state == ReviewState::Approved),
            approval_review_id: latest.map(|r| r.id),
        }
    }

    /// The action that brings the pull request in line, if any
    pub fn action(&self, pr: &PrRef) -> Option<Action> {
        match (self.should_approve, self.is_approved) {
            (true, false) => Some(Action::Approve(pr.clone())),
            (false, true) => self.approval_review_id.map(|review_id| Action::Dismiss {
                pr: pr.clone(),
                review_id,
            }),
            _ => None,
        }
    }
}

/// An approval to retract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dismissal {
    pub pr: PrRef,
    pub review_id: u64,
}

/// Actions for one poll cycle. A pull request appears in at most one list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub to_approve: Vec<PrRef>,
    pub to_dismiss: Vec<Dismissal>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_approve.is_empty() && self.to_dismiss.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_approve.len() + self.to_dismiss.len()
    }

    pub fn actions(&self) -> impl Iterator<Item = Action> + '_ {
        let approvals = self.to_approve.iter().cloned().map(Action::Approve);
        let dismissals = self.to_dismiss.iter().map(|d| Action::Dismiss {
            pr: d.pr.clone(),
            review_id: d.review_id,
        });
        approvals.chain(dismissals)
    }
}

/// Computes approve/dismiss actions from reactions and reviews
#[derive(Debug, Clone)]
pub struct Reconciler {
    threshold: u32,
    bot_login: String,
}

impl Reconciler {
    pub fn new(threshold: u32, bot_login: impl Into<String>) -> Self {
        Self {
            threshold,
            bot_login: bot_login.into(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Read comments and reviews for every pull request the bot has commented on
    pub async fn snapshot<G>(
        &self,
        gateway: &G,
        repos: &[Repository],
    ) -> Result<Snapshot, GatewayError>
    where
        G: RepositoryGateway + ?Sized,
    {
        let per_repo =
            try_join_all(repos.iter().map(|repo| gateway.list_bot_comments(repo))).await?;
        let comments = latest_comment_per_pr(per_repo.into_iter().flatten());

        let pull_requests = try_join_all(comments.into_iter().map(|comment| async move {
            let reviews = gateway.list_reviews(&comment.pr).await?;
            Ok::<_, GatewayError>(PullRequestSnapshot {
                pr: comment.pr,
                plus_one: comment.plus_one,
                reviews,
            })
        }))
        .await?;

        Ok(Snapshot { pull_requests })
    }

    /// Decide what to do for each pull request in the snapshot
    pub fn plan(&self, snapshot: &Snapshot) -> ReconcilePlan {
        let mut plan = ReconcilePlan::default();

        for pr in &snapshot.pull_requests {
            let decision =
                ReviewDecision::evaluate(pr.plus_one, self.threshold, &pr.reviews, &self.bot_login);
            debug!(
                pr = %pr.pr,
                plus_one = pr.plus_one,
                should_approve = decision.should_approve,
                is_approved = decision.is_approved,
                "Evaluated pull request"
            );

            match decision.action(&pr.pr) {
                Some(Action::Approve(pr)) => plan.to_approve.push(pr),
                Some(Action::Dismiss { pr, review_id }) => {
                    plan.to_dismiss.push(Dismissal { pr, review_id })
                }
                None => {}
            }
        }

        plan
    }

    pub async fn reconcile<G>(
        &self,
        gateway: &G,
        repos: &[Repository],
    ) -> Result<ReconcilePlan, GatewayError>
    where
        G: RepositoryGateway + ?Sized,
    {
        let snapshot = self.snapshot(gateway, repos).await?;
        Ok(self.plan(&snapshot))
    }
}

/// The bot's most recent review in a chronologically ordered list
pub fn latest_review_by<'a>(reviews: &'a [Review], login: &str) -> Option<&'a Review> {
    reviews.iter().rev().find(|r| r.is_by(login))
}

/// Keep one comment per pull request: the newest, ties broken by the higher ID.
pub fn latest_comment_per_pr(
    comments: impl IntoIterator<Item = AnnotatedComment>,
) -> Vec<AnnotatedComment> {
    let mut latest: BTreeMap<PrRef, AnnotatedComment> = BTreeMap::new();

    for comment in comments {
        let newer = latest
            .get(&comment.pr)
            .map_or(true, |existing| {
                (comment.created_at, comment.id) > (existing.created_at, existing.id)
            });
        if newer {
            latest.insert(comment.pr.clone(), comment);
        }
    }

    latest.into_values().collect()
}
