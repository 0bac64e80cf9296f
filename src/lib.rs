//! Rust library for controlling Shure P300 audio conferencing DSPs
//!
//! The P300 speaks a plaintext command protocol over TCP. This library keeps
//! an in-memory model of the device and turns control intents into protocol
//! commands. It supports:
//!
//! - Per-channel mute and gain control for every mixer input and output
//! - Held volume ramps that step the gain while a button is pressed
//! - Preset recall by name
//! - Device identity (firmware, serial number, IP address) tracking
//! - Heartbeat-based online/offline detection with periodic polling
//! - Event subscriptions for state changes
//!
//! # Quick Start
//!
//! ```no_run
//! use shure_p300::{ChannelId, DspConfig, DspSession, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = DspSession::connect(DspConfig::new("192.168.1.50")).await?;
//!
//!     let mut events = session.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         if let SessionEvent::OnlineChanged(true) = event {
//!             break;
//!         }
//!     }
//!
//!     if let Some(fader) = session.fader(ChannelId::DanteMicInput01) {
//!         fader.mute_toggle()?;
//!         fader.set_level(u16::MAX / 2)?;
//!     }
//!     session.recall_preset("preset 02")?;
//!
//!     session.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Custom transports
//!
//! Anything implementing [`Transport`] can carry the commands. Feed inbound
//! lines through the channel handed to [`DspSession::start`], or directly
//! with [`DspSession::handle_line`].
//!
//! # Architecture
//!
//! - **Session**: routes reports, drives polling from the health monitor
//! - **Fader**: per-channel state and commands, ramp loops
//! - **Monitor**: heartbeat and timeout tiers deciding online/offline
//! - **Protocol**: report decoding, command encoding, level scaling
//! - **Connection**: TCP transport framing messages on `>`
//! - **Config**: JSON device configuration and address persistence

mod config;
mod connection;
mod error;
mod fader;
mod monitor;
pub mod protocol;
mod session;
mod subscription;
mod types;

// Public exports
pub use config::{ConfigStore, DspConfig, JsonConfigStore, MonitorSettings, DEFAULT_PORT};
pub use connection::{TcpConnection, Transport};
pub use error::{DspError, Result};
pub use fader::{Fader, DEFAULT_RAMP_TICK};
pub use monitor::{CommunicationMonitor, MonitorConfig, MonitorStatus};
pub use protocol::{Command, Report};
pub use session::{DspSession, IdentitySink, MIN_ADDRESS_LEN};
pub use subscription::{EventReceiver, SessionEvent};
pub use types::{
    default_presets, ChannelId, DeviceIdentity, Level, MuteAction, MuteState, Preset,
    RampDirection,
};
