//! Poll Orchestrator
//!
//! Runs one reconciliation cycle per interval tick and applies the resulting
//! actions concurrently. A tick that fires while the previous cycle is still
//! running is skipped.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::{APPROVAL_BODY, DISMISSAL_MESSAGE};
use crate::error::GatewayError;
use crate::gateway::RepositoryGateway;
use crate::pr::{Action, ActionOutcome};
use crate::reconcile::Reconciler;

/// Summary of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub repositories: usize,
    pub approved: usize,
    pub dismissed: usize,
    pub failed: usize,
    /// GitHub API requests issued since the previous cycle
    pub requests: u64,
}

impl CycleReport {
    fn record(&mut self, outcome: &ActionOutcome) {
        match (&outcome.action, outcome.success) {
            (_, false) => self.failed += 1,
            (Action::Approve(_), true) => self.approved += 1,
            (Action::Dismiss { .. }, true) => self.dismissed += 1,
        }
    }
}

pub struct PollOrchestrator<G: RepositoryGateway + ?Sized> {
    gateway: Arc<G>,
    reconciler: Reconciler,
    cycle: Mutex<()>,
}

impl<G: RepositoryGateway + ?Sized> PollOrchestrator<G> {
    pub fn new(gateway: Arc<G>, reconciler: Reconciler) -> Self {
        Self {
            gateway,
            reconciler,
            cycle: Mutex::new(()),
        }
    }

    /// Tick forever. Errors are logged and the next tick retries from scratch.
    pub async fn run(&self, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = period.as_millis() as u64,
            threshold = self.reconciler.threshold(),
            "Starting poll loop"
        );

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// Run a cycle unless one is already in flight
    pub async fn tick(&self) -> Option<CycleReport> {
        let Ok(_guard) = self.cycle.try_lock() else {
            warn!("Previous poll cycle still running, skipping tick");
            return None;
        };

        match self.cycle_unguarded().await {
            Ok(report) => Some(report),
            Err(e) => {
                let status = e.downcast_ref::<GatewayError>().and_then(GatewayError::status);
                error!(status = ?status, error = %format!("{e:#}"), "Poll cycle failed");
                Some(CycleReport::default())
            }
        }
    }

    /// Run one cycle, waiting for any in-flight cycle to finish first
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _guard = self.cycle.lock().await;
        self.cycle_unguarded().await
    }

    async fn cycle_unguarded(&self) -> Result<CycleReport> {
        let result = self.reconcile_and_apply().await;

        // The counter spans exactly one cycle, failed or not
        let requests = self.gateway.requests().reset();
        info!(requests, "GitHub API requests this cycle");

        let mut report = result?;
        report.requests = requests;
        Ok(report)
    }

    async fn reconcile_and_apply(&self) -> Result<CycleReport> {
        let repos = self
            .gateway
            .list_org_repositories()
            .await
            .context("Failed to list organization repositories")?;

        let plan = self
            .reconciler
            .reconcile(self.gateway.as_ref(), &repos)
            .await
            .context("Failed to read pull request state")?;

        if !plan.is_empty() {
            info!(
                approvals = plan.to_approve.len(),
                dismissals = plan.to_dismiss.len(),
                "Applying {} actions",
                plan.len()
            );
        }
        let outcomes = join_all(plan.actions().map(|action| self.apply(action))).await;

        let mut report = CycleReport {
            repositories: repos.len(),
            ..CycleReport::default()
        };
        for outcome in &outcomes {
            report.record(outcome);
            match &outcome.error {
                None => info!(pr = %outcome.action.pr(), action = %outcome.action, "Applied"),
                Some(e) => error!(
                    pr = %outcome.action.pr(),
                    action = %outcome.action,
                    error = %e,
                    "Action failed"
                ),
            }
        }

        info!(
            repositories = report.repositories,
            approved = report.approved,
            dismissed = report.dismissed,
            failed = report.failed,
            "Poll cycle complete"
        );
        Ok(report)
    }

    async fn apply(&self, action: Action) -> ActionOutcome {
        let result = match &action {
            Action::Approve(pr) => self.gateway.create_approval_review(pr, APPROVAL_BODY).await,
            Action::Dismiss { pr, review_id } => {
                self.gateway
                    .dismiss_review(pr, *review_id, DISMISSAL_MESSAGE)
                    .await
            }
        };

        match result {
            Ok(()) => ActionOutcome::success(action),
            Err(e) => ActionOutcome::failure(action, e.to_string()),
        }
    }
}
