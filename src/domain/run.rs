//! Run state as seen by the presentation layer.
//!
//! A run is one investigation, from the start action to a terminal
//! notification. Everything here is plain data; transitions live in
//! `core::aggregator`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse lifecycle of the current run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No run has started on this session yet
    #[default]
    Idle,

    /// The backend acknowledged a start and is streaming steps
    Streaming,

    /// The workflow completed normally
    Finished,

    /// The workflow reported an error
    Errored,
}

impl RunStatus {
    /// Finished and Errored are only left by starting a new run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Errored)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Finished => "finished",
            Self::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Output of one workflow node, in arrival order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Zero-based arrival position within the run
    pub index: usize,

    /// Name of the node that produced this output
    pub node: String,

    /// Node output, stored as received
    pub output: Value,

    /// When the notification was processed
    pub received_at: DateTime<Utc>,
}

/// The workflow's terminal output for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinalResult(pub Value);

impl FinalResult {
    pub fn value(&self) -> &Value {
        &self.0
    }
}

/// Read-only view of the current run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Current lifecycle status
    pub status: RunStatus,

    /// Step log in arrival order (sentinel entries excluded)
    pub steps: Vec<StepRecord>,

    /// Final result, if the sentinel payload arrived
    pub final_result: Option<FinalResult>,

    /// Description carried by `graph_error`
    pub error: Option<String>,

    /// Number of runs acknowledged on this session (0 before the first)
    pub generation: u64,

    /// When the current run was acknowledged
    pub started_at: Option<DateTime<Utc>>,

    /// When the current run reached a terminal status
    pub ended_at: Option<DateTime<Utc>>,

    /// Malformed `graph_event` payloads skipped in this run
    pub skipped: usize,
}

impl RunSnapshot {
    /// Whether anything worth rendering exists
    pub fn has_activity(&self) -> bool {
        !self.steps.is_empty() || self.status.is_streaming() || self.final_result.is_some()
    }
}
