//! Investigation session: one channel feeding one aggregator.
//!
//! The session is the single writer of run state. It pulls channel events
//! one at a time, applies them to the aggregator and publishes a fresh
//! snapshot after every change, so readers never observe a half-applied
//! transition.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::adapters::{ChannelError, ChannelEvent, SessionChannel};
use crate::domain::{InvestigationRequest, RunSnapshot, RunStatus};

use super::aggregator::{Disposition, InvestigationAggregator};

/// Result of asking the session to start a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The `investigate` message was handed to the channel
    Sent,

    /// The channel is down; nothing was sent
    NotConnected,

    /// A run is streaming or awaiting acknowledgement; nothing was sent
    AlreadyStreaming,
}

/// What processing one channel event did
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Connected,
    Disconnected { reason: String },
    Notification(Disposition),
}

/// A live investigation view over a session channel
pub struct InvestigationSession<C: SessionChannel> {
    channel: C,
    events: mpsc::Receiver<ChannelEvent>,
    aggregator: InvestigationAggregator,
    snapshots: watch::Sender<RunSnapshot>,
}

impl<C: SessionChannel> InvestigationSession<C> {
    /// Wrap a connected (or connecting) channel and its event stream
    pub fn new(channel: C, events: mpsc::Receiver<ChannelEvent>) -> Self {
        let aggregator = InvestigationAggregator::new();
        let (snapshots, _) = watch::channel(aggregator.snapshot());

        Self {
            channel,
            events,
            aggregator,
            snapshots,
        }
    }

    /// Subscribe to snapshot updates
    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshots.subscribe()
    }

    /// Current snapshot
    pub fn snapshot(&self) -> RunSnapshot {
        self.aggregator.snapshot()
    }

    pub fn status(&self) -> RunStatus {
        self.aggregator.status()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Whether the start control should be enabled
    pub fn can_start(&self) -> bool {
        self.is_connected() && self.aggregator.can_start()
    }

    /// Send a start request unless a run is in flight or the channel is down
    #[instrument(skip(self, request), fields(indicator = %request.indicator))]
    pub async fn start(
        &mut self,
        request: &InvestigationRequest,
    ) -> Result<StartOutcome, ChannelError> {
        if !self.aggregator.can_start() {
            debug!(status = %self.status(), "Start refused while a run is in flight");
            return Ok(StartOutcome::AlreadyStreaming);
        }

        if !self.channel.start_investigation(request).await? {
            return Ok(StartOutcome::NotConnected);
        }

        self.aggregator.request_start();
        Ok(StartOutcome::Sent)
    }

    /// Apply one channel event
    pub fn handle(&mut self, event: ChannelEvent) -> SessionUpdate {
        match event {
            ChannelEvent::Connected => {
                info!("Channel connected");
                SessionUpdate::Connected
            }
            ChannelEvent::Disconnected { reason } => {
                self.aggregator.connection_lost();
                self.publish();
                SessionUpdate::Disconnected { reason }
            }
            ChannelEvent::Notification(notification) => {
                let disposition = self.aggregator.apply(notification);
                if disposition.changed_state() {
                    self.publish();
                }
                SessionUpdate::Notification(disposition)
            }
        }
    }

    /// Wait for and apply the next channel event.
    ///
    /// Returns `None` once the channel has shut down.
    pub async fn process_next(&mut self) -> Option<SessionUpdate> {
        let event = self.events.recv().await?;
        Some(self.handle(event))
    }

    /// Process events until the channel reports a connection
    pub async fn wait_connected(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }

        while let Some(update) = self.process_next().await {
            if update == SessionUpdate::Connected {
                return true;
            }
        }
        false
    }

    /// Process events until the requested run finishes, errors, or the
    /// connection drops mid-run.
    ///
    /// `on_update` sees the snapshot after every processed event.
    /// Returns `None` if the channel shut down first.
    pub async fn run_until_settled<F>(&mut self, mut on_update: F) -> Option<RunSnapshot>
    where
        F: FnMut(&SessionUpdate, &RunSnapshot),
    {
        while !self.aggregator.is_settled() {
            let update = self.process_next().await?;
            on_update(&update, &self.aggregator.snapshot());

            if let SessionUpdate::Disconnected { reason } = &update {
                warn!(%reason, "Channel dropped during run");
                break;
            }
        }

        Some(self.snapshot())
    }

    /// Release the channel
    pub async fn close(mut self) {
        self.channel.disconnect().await;
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.aggregator.snapshot());
    }
}
