//! Domain types for the investigation client.
//!
//! This module contains the core data structures:
//! - Events: Notifications pushed by the backend and the outbound request
//! - Run: Run status, step records and the snapshot read by renderers

pub mod events;
pub mod run;

// Re-export commonly used types
pub use events::{
    InvestigationRequest, Notification, PayloadError, RecordedNotification, StepPayload,
    TERMINAL_SENTINEL,
};
pub use run::{FinalResult, RunSnapshot, RunStatus, StepRecord};
