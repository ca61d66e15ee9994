//! Text rendering of run snapshots.
//!
//! Steps render as a numbered line naming the node followed by the output
//! pretty-printed as JSON. The final result renders as a separate report
//! block.

use std::fmt::Write;

use serde_json::Value;

use crate::domain::{FinalResult, RunSnapshot, RunStatus, StepRecord};

/// Shown while a run is streaming and no terminal notification arrived
pub const AWAITING_PLACEHOLDER: &str = "Awaiting next step...";

/// Heading of the final report block
pub const FINAL_REPORT_HEADING: &str = "Final Report";

/// Pretty-print an opaque value
pub fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// One step: header line plus pretty output
pub fn render_step(step: &StepRecord) -> String {
    format!(
        "> Step {}: Running node '{}'...\n{}",
        step.index + 1,
        step.node,
        pretty(&step.output)
    )
}

/// The final report block
pub fn render_final(result: &FinalResult) -> String {
    format!("{}\n{}", FINAL_REPORT_HEADING, pretty(result.value()))
}

/// Full view of a snapshot
pub fn render_snapshot(snapshot: &RunSnapshot) -> String {
    let mut out = String::new();

    if !snapshot.has_activity() && snapshot.error.is_none() {
        return out;
    }

    for step in &snapshot.steps {
        let _ = writeln!(out, "{}", render_step(step));
    }

    match snapshot.status {
        RunStatus::Streaming => {
            let _ = writeln!(out, "{}", AWAITING_PLACEHOLDER);
        }
        RunStatus::Errored => {
            let _ = writeln!(
                out,
                "Investigation failed: {}",
                snapshot.error.as_deref().unwrap_or("unknown error")
            );
        }
        RunStatus::Idle | RunStatus::Finished => {}
    }

    if let Some(result) = &snapshot.final_result {
        let _ = writeln!(out, "{}", render_final(result));
    }

    if snapshot.skipped > 0 {
        let _ = writeln!(out, "({} malformed events skipped)", snapshot.skipped);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn step(index: usize, node: &str, output: Value) -> StepRecord {
        StepRecord {
            index,
            node: node.to_string(),
            output,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_step_is_one_based() {
        let rendered = render_step(&step(0, "triage", json!({"risk": "high"})));
        assert_eq!(
            rendered,
            "> Step 1: Running node 'triage'...\n{\n  \"risk\": \"high\"\n}"
        );
    }

    #[test]
    fn test_idle_renders_nothing() {
        assert_eq!(render_snapshot(&RunSnapshot::default()), "");
    }

    #[test]
    fn test_streaming_shows_placeholder() {
        let snapshot = RunSnapshot {
            status: RunStatus::Streaming,
            steps: vec![step(0, "supervisor", json!({"next_node": "Threat_Analyst"}))],
            ..Default::default()
        };

        let rendered = render_snapshot(&snapshot);
        assert!(rendered.contains("> Step 1: Running node 'supervisor'..."));
        assert!(rendered.ends_with("Awaiting next step...\n"));
    }

    #[test]
    fn test_finished_shows_report_without_placeholder() {
        let snapshot = RunSnapshot {
            status: RunStatus::Finished,
            steps: vec![step(0, "triage", json!(1))],
            final_result: Some(FinalResult(json!({"summary": "malicious"}))),
            ..Default::default()
        };

        let rendered = render_snapshot(&snapshot);
        assert!(!rendered.contains(AWAITING_PLACEHOLDER));
        assert!(rendered.contains("Final Report\n{\n  \"summary\": \"malicious\"\n}"));
    }

    #[test]
    fn test_errored_shows_description() {
        let snapshot = RunSnapshot {
            status: RunStatus::Errored,
            error: Some("timeout".to_string()),
            ..Default::default()
        };

        assert_eq!(render_snapshot(&snapshot), "Investigation failed: timeout\n");
    }
}
