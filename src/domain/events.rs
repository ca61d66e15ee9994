//! Notification types for the investigation event stream.
//!
//! The backend pushes four named notifications per run. Payloads are kept
//! as opaque JSON values; only the top-level key of a `graph_event` payload
//! is ever inspected.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Reserved `graph_event` key carrying the run's final result.
pub const TERMINAL_SENTINEL: &str = "__end__";

/// Outbound event name for starting an investigation.
pub const EVENT_INVESTIGATE: &str = "investigate";

/// Inbound event names.
pub const EVENT_INVESTIGATION_STARTED: &str = "investigation_started";
pub const EVENT_GRAPH_EVENT: &str = "graph_event";
pub const EVENT_GRAPH_FINISHED: &str = "graph_finished";
pub const EVENT_GRAPH_ERROR: &str = "graph_error";

/// A server-to-client notification.
///
/// No run identifier is carried on the wire; every notification belongs to
/// the run currently in flight on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The backend accepted a start request and began streaming
    InvestigationStarted,

    /// One workflow step (or the terminal sentinel) produced output
    GraphEvent(Value),

    /// The workflow completed normally
    GraphFinished,

    /// The workflow failed
    GraphError { error: String },
}

impl Notification {
    /// Build a notification from a named event and its arguments.
    ///
    /// Returns `None` for event names this client does not subscribe to.
    pub fn from_event(name: &str, args: Vec<Value>) -> Option<Self> {
        let first = args.into_iter().next().unwrap_or(Value::Null);

        match name {
            EVENT_INVESTIGATION_STARTED => Some(Self::InvestigationStarted),
            EVENT_GRAPH_EVENT => Some(Self::GraphEvent(first)),
            EVENT_GRAPH_FINISHED => Some(Self::GraphFinished),
            EVENT_GRAPH_ERROR => Some(Self::GraphError {
                error: error_description(&first),
            }),
            _ => None,
        }
    }

    /// Wire name of this notification
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvestigationStarted => EVENT_INVESTIGATION_STARTED,
            Self::GraphEvent(_) => EVENT_GRAPH_EVENT,
            Self::GraphFinished => EVENT_GRAPH_FINISHED,
            Self::GraphError { .. } => EVENT_GRAPH_ERROR,
        }
    }
}

/// Extract a human-readable description from a `graph_error` payload.
fn error_description(data: &Value) -> String {
    match data.get("error") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => match data {
            Value::Null => "unknown error".to_string(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

/// One notification as recorded in a newline-delimited transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedNotification {
    /// Event name as sent by the backend
    pub event: String,

    /// Event payload (absent for payload-less notifications)
    #[serde(default)]
    pub data: Value,
}

impl RecordedNotification {
    /// Convert into a notification, if the event name is known
    pub fn into_notification(self) -> Option<Notification> {
        let args = if self.data.is_null() {
            Vec::new()
        } else {
            vec![self.data]
        };
        Notification::from_event(&self.event, args)
    }
}

/// Outbound start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestigationRequest {
    /// Indicator under investigation (IP, URL, hash, ...)
    pub indicator: String,

    /// Free-text log content
    pub logs: String,
}

impl InvestigationRequest {
    pub fn new(indicator: impl Into<String>, logs: impl Into<String>) -> Self {
        Self {
            indicator: indicator.into(),
            logs: logs.into(),
        }
    }
}

/// Classified `graph_event` payload
#[derive(Debug, Clone, PartialEq)]
pub enum StepPayload {
    /// An ordinary node output
    Step { node: String, output: Value },

    /// The run's final result (sentinel-keyed)
    Final(Value),
}

/// Why a `graph_event` payload could not be classified
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("graph event payload is not an object (got {0})")]
    NotAnObject(&'static str),

    #[error("graph event payload has no keys")]
    Empty,
}

impl StepPayload {
    /// Classify a `graph_event` payload.
    ///
    /// A payload containing the sentinel key is always the final result.
    /// Otherwise the lexicographically smallest key names the node; any
    /// further keys are dropped. The second tuple field reports how many
    /// keys were dropped.
    pub fn classify(payload: Value) -> Result<(Self, usize), PayloadError> {
        let mut map = match payload {
            Value::Object(map) => map,
            other => return Err(PayloadError::NotAnObject(kind_of(&other))),
        };

        if map.is_empty() {
            return Err(PayloadError::Empty);
        }

        let dropped = map.len() - 1;

        if let Some(result) = map.remove(TERMINAL_SENTINEL) {
            return Ok((Self::Final(result), dropped));
        }

        let node = first_key(&map).ok_or(PayloadError::Empty)?;
        let output = map.remove(&node).unwrap_or(Value::Null);

        Ok((Self::Step { node, output }, dropped))
    }
}

fn first_key(map: &Map<String, Value>) -> Option<String> {
    map.keys().min().cloned()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_event_known_names() {
        assert_eq!(
            Notification::from_event("investigation_started", vec![]),
            Some(Notification::InvestigationStarted)
        );
        assert_eq!(
            Notification::from_event("graph_event", vec![json!({"triage": 1})]),
            Some(Notification::GraphEvent(json!({"triage": 1})))
        );
        assert_eq!(
            Notification::from_event("graph_finished", vec![]),
            Some(Notification::GraphFinished)
        );
        assert_eq!(Notification::from_event("connect", vec![]), None);
    }

    #[test]
    fn test_graph_error_description() {
        let n = Notification::from_event("graph_error", vec![json!({"error": "timeout"})]);
        assert_eq!(
            n,
            Some(Notification::GraphError {
                error: "timeout".to_string()
            })
        );

        let n = Notification::from_event("graph_error", vec![]);
        assert_eq!(
            n,
            Some(Notification::GraphError {
                error: "unknown error".to_string()
            })
        );

        let n = Notification::from_event("graph_error", vec![json!({"code": 7})]);
        assert_eq!(
            n,
            Some(Notification::GraphError {
                error: r#"{"code":7}"#.to_string()
            })
        );
    }

    #[test]
    fn test_classify_step() {
        let (payload, dropped) =
            StepPayload::classify(json!({"triage": {"risk": "high"}})).unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(
            payload,
            StepPayload::Step {
                node: "triage".to_string(),
                output: json!({"risk": "high"}),
            }
        );
    }

    #[test]
    fn test_classify_sentinel_wins_over_other_keys() {
        let (payload, dropped) =
            StepPayload::classify(json!({"aaa": 1, "__end__": {"summary": "ok"}})).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(payload, StepPayload::Final(json!({"summary": "ok"})));
    }

    #[test]
    fn test_classify_multi_key_uses_smallest_key() {
        let (payload, dropped) =
            StepPayload::classify(json!({"supervisor": 2, "log_analyst": 1})).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(
            payload,
            StepPayload::Step {
                node: "log_analyst".to_string(),
                output: json!(1),
            }
        );
    }

    #[test]
    fn test_classify_malformed() {
        assert_eq!(StepPayload::classify(json!({})), Err(PayloadError::Empty));
        assert_eq!(
            StepPayload::classify(json!([1, 2])),
            Err(PayloadError::NotAnObject("array"))
        );
        assert_eq!(
            StepPayload::classify(Value::Null),
            Err(PayloadError::NotAnObject("null"))
        );
    }

    #[test]
    fn test_recorded_notification_parsing() {
        let line = r#"{"event":"graph_event","data":{"policy_agent":{"rule":"deny"}}}"#;
        let recorded: RecordedNotification = serde_json::from_str(line).unwrap();
        assert_eq!(
            recorded.into_notification(),
            Some(Notification::GraphEvent(json!({"policy_agent": {"rule": "deny"}})))
        );

        let line = r#"{"event":"graph_finished"}"#;
        let recorded: RecordedNotification = serde_json::from_str(line).unwrap();
        assert_eq!(recorded.into_notification(), Some(Notification::GraphFinished));
    }
}
