//! Investigation event aggregator.
//!
//! Folds the backend's notification stream into run status, an ordered step
//! log and an optional final result. One mutation entry point exists per
//! notification kind; readers only ever get owned snapshots.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::{
    FinalResult, Notification, RunSnapshot, RunStatus, StepPayload, StepRecord,
};

/// Result of applying one notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// State changed
    Applied,

    /// Notification had no effect
    Ignored(IgnoreReason),
}

impl Disposition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    /// Whether the snapshot differs afterwards (skipped payloads are counted)
    pub fn changed_state(&self) -> bool {
        matches!(
            self,
            Self::Applied | Self::Ignored(IgnoreReason::MalformedPayload)
        )
    }
}

/// Why a notification was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Step or finish outside of a streaming run
    NotStreaming,

    /// The run already reached Finished or Errored
    AlreadyTerminal,

    /// A newer start was requested and not yet acknowledged
    StaleRun,

    /// `graph_event` payload was not a non-empty object
    MalformedPayload,
}

/// State machine for the run currently in flight on a channel
#[derive(Debug, Default)]
pub struct InvestigationAggregator {
    state: RunSnapshot,

    /// Start requests sent but not yet acknowledged by `investigation_started`
    pending_starts: u64,
}

impl InvestigationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status
    pub fn status(&self) -> RunStatus {
        self.state.status
    }

    /// Owned projection of the accumulated state
    pub fn snapshot(&self) -> RunSnapshot {
        self.state.clone()
    }

    /// Whether a new start may be issued (no run streaming, none pending)
    pub fn can_start(&self) -> bool {
        !self.state.status.is_streaming() && self.pending_starts == 0
    }

    /// Whether the most recently requested run reached a terminal status
    pub fn is_settled(&self) -> bool {
        self.state.status.is_terminal() && self.pending_starts == 0
    }

    /// Record that a start request was sent.
    ///
    /// Until it is acknowledged, notifications still arriving belong to the
    /// superseded run and are discarded.
    pub fn request_start(&mut self) {
        self.pending_starts += 1;
        debug!(pending = self.pending_starts, "Start requested");
    }

    /// Forget unacknowledged start requests after the channel dropped
    pub fn connection_lost(&mut self) {
        if self.pending_starts > 0 {
            warn!(
                pending = self.pending_starts,
                "Connection lost with unacknowledged start requests"
            );
        }
        self.pending_starts = 0;
    }

    /// Dispatch a notification to its transition
    pub fn apply(&mut self, notification: Notification) -> Disposition {
        match notification {
            Notification::InvestigationStarted => self.on_run_started(),
            Notification::GraphEvent(payload) => self.on_step_produced(payload),
            Notification::GraphFinished => self.on_run_finished(),
            Notification::GraphError { error } => self.on_run_errored(error),
        }
    }

    /// `investigation_started`: reset and begin streaming
    pub fn on_run_started(&mut self) -> Disposition {
        self.pending_starts = self.pending_starts.saturating_sub(1);

        let generation = self.state.generation + 1;
        self.state = RunSnapshot {
            status: RunStatus::Streaming,
            generation,
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        info!(generation, "Investigation started");
        Disposition::Applied
    }

    /// `graph_event`: append a step or record the final result
    pub fn on_step_produced(&mut self, payload: Value) -> Disposition {
        if let Some(reason) = self.gate() {
            debug!(?reason, "Dropping graph event");
            return Disposition::Ignored(reason);
        }

        let (payload, dropped) = match StepPayload::classify(payload) {
            Ok(classified) => classified,
            Err(e) => {
                self.state.skipped += 1;
                warn!(error = %e, skipped = self.state.skipped, "Skipping malformed graph event");
                return Disposition::Ignored(IgnoreReason::MalformedPayload);
            }
        };

        if dropped > 0 {
            warn!(dropped, "Graph event carried extra keys; using one");
        }

        match payload {
            StepPayload::Step { node, output } => {
                let index = self.state.steps.len();
                debug!(index, %node, "Step produced");
                self.state.steps.push(StepRecord {
                    index,
                    node,
                    output,
                    received_at: Utc::now(),
                });
            }
            StepPayload::Final(result) => {
                if self.state.final_result.is_some() {
                    warn!("Final result received twice; keeping the latest");
                }
                debug!("Final result recorded");
                self.state.final_result = Some(FinalResult(result));
            }
        }

        Disposition::Applied
    }

    /// `graph_finished`: normal terminal state
    pub fn on_run_finished(&mut self) -> Disposition {
        if let Some(reason) = self.gate() {
            debug!(?reason, "Dropping graph_finished");
            return Disposition::Ignored(reason);
        }

        self.state.status = RunStatus::Finished;
        self.state.ended_at = Some(Utc::now());
        info!(
            steps = self.state.steps.len(),
            has_final = self.state.final_result.is_some(),
            "Investigation finished"
        );
        Disposition::Applied
    }

    /// `graph_error`: abnormal terminal state, partial progress kept
    pub fn on_run_errored(&mut self, error: String) -> Disposition {
        if self.pending_starts > 0 {
            if self.state.status.is_streaming() {
                debug!(%error, "Dropping graph_error from superseded run");
                return Disposition::Ignored(IgnoreReason::StaleRun);
            }

            // The requested run failed before it was acknowledged
            self.pending_starts -= 1;
            warn!(%error, "Investigation rejected before start");
            self.state = RunSnapshot {
                status: RunStatus::Errored,
                generation: self.state.generation + 1,
                error: Some(error),
                ended_at: Some(Utc::now()),
                ..Default::default()
            };
            return Disposition::Applied;
        }
        if self.state.status.is_terminal() {
            debug!(%error, "Dropping graph_error after terminal status");
            return Disposition::Ignored(IgnoreReason::AlreadyTerminal);
        }

        warn!(%error, steps = self.state.steps.len(), "Investigation errored");
        self.state.status = RunStatus::Errored;
        self.state.error = Some(error);
        self.state.ended_at = Some(Utc::now());
        Disposition::Applied
    }

    /// Precondition shared by step and finish notifications
    fn gate(&self) -> Option<IgnoreReason> {
        if self.pending_starts > 0 && self.state.status.is_streaming() {
            return Some(IgnoreReason::StaleRun);
        }
        match self.state.status {
            RunStatus::Streaming => None,
            RunStatus::Finished | RunStatus::Errored => Some(IgnoreReason::AlreadyTerminal),
            RunStatus::Idle => Some(IgnoreReason::NotStreaming),
        }
    }
}
