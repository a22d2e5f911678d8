//! Pull Request Operations
//!
//! Types describing repositories, the bot's comments, reviews, and the actions
//! the reconciler can take on a pull request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A repository owned by the configured organization
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repository {
    pub name: String,
}

impl Repository {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A pull request within the organization, addressed by repository name and number
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrRef {
    pub repo: String,
    pub number: u64,
}

impl PrRef {
    pub fn new(repo: impl Into<String>, number: u64) -> Self {
        Self {
            repo: repo.into(),
            number,
        }
    }
}

impl fmt::Display for PrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

/// A comment authored by the bot, with its "+1" reaction count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedComment {
    /// Comment ID
    pub id: u64,
    /// Pull request the comment was posted on
    pub pr: PrRef,
    /// Number of "+1" reactions
    pub plus_one: u32,
    pub created_at: DateTime<Utc>,
}

/// State of a pull request review as reported by GitHub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
    #[serde(other)]
    Unknown,
}

/// A pull request review
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Review {
    pub id: u64,
    /// Login of the reviewer, if the account still exists
    pub author: Option<String>,
    pub state: ReviewState,
}

impl Review {
    pub fn is_by(&self, login: &str) -> bool {
        self.author.as_deref() == Some(login)
    }
}

/// A state-changing action on a pull request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Approve(PrRef),
    Dismiss { pr: PrRef, review_id: u64 },
}

impl Action {
    pub fn pr(&self) -> &PrRef {
        match self {
            Action::Approve(pr) => pr,
            Action::Dismiss { pr, .. } => pr,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Approve(pr) => write!(f, "approve {}", pr),
            Action::Dismiss { pr, review_id } => {
                write!(f, "dismiss review {} on {}", review_id, pr)
            }
        }
    }
}

/// Result of applying an action
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub action: Action,
    /// Whether the action succeeded
    pub success: bool,
    /// Error message if failed
    pub error: Option<String>,
}

impl ActionOutcome {
    /// Create a successful outcome
    pub fn success(action: Action) -> Self {
        Self {
            action,
            success: true,
            error: None,
        }
    }

    /// Create a failed outcome
    pub fn failure(action: Action, error: impl Into<String>) -> Self {
        Self {
            action,
            success: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_state_from_github() {
        let state: ReviewState = serde_json::from_str("\"APPROVED\"").unwrap();
        assert_eq!(state, ReviewState::Approved);

        let state: ReviewState = serde_json::from_str("\"CHANGES_REQUESTED\"").unwrap();
        assert_eq!(state, ReviewState::ChangesRequested);

        let state: ReviewState = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(state, ReviewState::Unknown);
    }

    #[test]
    fn test_action_display() {
        let approve = Action::Approve(PrRef::new("api", 7));
        assert_eq!(approve.to_string(), "approve api#7");

        let dismiss = Action::Dismiss {
            pr: PrRef::new("api", 7),
            review_id: 99,
        };
        assert_eq!(dismiss.to_string(), "dismiss review 99 on api#7");
        assert_eq!(dismiss.pr().number, 7);
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = ActionOutcome::success(Action::Approve(PrRef::new("web", 1)));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = ActionOutcome::failure(Action::Approve(PrRef::new("web", 1)), "boom");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }
}
