//! Core client logic.
//!
//! This module contains:
//! - Aggregator: Run state machine fed by backend notifications
//! - Session: Pumps channel events into the aggregator and gates starts

pub mod aggregator;
pub mod session;

// Re-export commonly used types
pub use aggregator::{Disposition, IgnoreReason, InvestigationAggregator};
pub use session::{InvestigationSession, SessionUpdate, StartOutcome};
