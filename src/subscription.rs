use crate::error::{DspError, Result};
use crate::types::{ChannelId, DeviceIdentity, Level, MuteState};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Something that changed on the session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The health monitor moved the device online or offline
    OnlineChanged(bool),

    /// A report changed the device identity; carries the new snapshot
    IdentityChanged(Arc<DeviceIdentity>),

    /// A mute report was applied to a channel
    MuteChanged { channel: ChannelId, muted: MuteState },

    /// A level report was applied to a channel (normalized level)
    LevelChanged { channel: ChannelId, level: Level },

    /// The configured address changed; takes effect after a restart
    RestartRequired { address: String },
}

/// Ordered stream of [`SessionEvent`]s for one subscriber
///
/// A slow subscriber that falls behind the buffer loses the oldest events.
/// The gap is logged and skipped rather than surfaced, since every event
/// describes state the session can be asked for again (faders, identity,
/// online status).
pub struct EventReceiver {
    rx: broadcast::Receiver<SessionEvent>,
}

impl EventReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<SessionEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. Fails with `ConnectionClosed` once the
    /// session has been dropped.
    pub async fn recv(&mut self) -> Result<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Ok(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event subscriber fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(DspError::ConnectionClosed)
                }
            }
        }
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Result<Option<SessionEvent>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Ok(Some(event)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event subscriber fell behind");
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(DspError::ConnectionClosed)
                }
            }
        }
    }
}
