//! cypher - Live client for security investigation workflows
//!
//! Submits an indicator and log text to a backend investigation workflow
//! over Socket.IO, then follows the workflow's execution step by step
//! until it reports a final result or an error.
//!
//! # Architecture
//!
//! - The session channel owns the single backend connection and turns
//!   pushed messages into ordered events
//! - The aggregator folds those events into run status, an ordered step
//!   log and an optional final result
//! - Renderers read owned snapshots only
//!
//! # Modules
//!
//! - `adapters`: Session channel (Socket.IO over websocket)
//! - `core`: Aggregator state machine and session driver
//! - `domain`: Data structures (Notification, RunSnapshot, StepRecord)
//! - `render`: Text rendering of snapshots
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Investigate an indicator with inline logs
//! cypher investigate --indicator 8.8.4.4 --logs "User 'admin' executed 'cat /etc/passwd'"
//!
//! # Check the backend is reachable
//! cypher ping
//!
//! # Replay a captured transcript
//! cypher replay run.jsonl
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod render;

// Re-export main types at crate root for convenience
pub use adapters::{ChannelEvent, SessionChannel, SocketIoChannel};
pub use core::{InvestigationAggregator, InvestigationSession, StartOutcome};
pub use domain::{FinalResult, InvestigationRequest, Notification, RunSnapshot, RunStatus, StepRecord};
