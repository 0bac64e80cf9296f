//! Heartbeat-driven connectivity monitor.
//!
//! The monitor writes a heartbeat command on a fixed interval and grades the
//! link by how long it has been since the device last said anything:
//!
//! | silence            | status    | online |
//! |--------------------|-----------|--------|
//! | never heard        | `Unknown` | no     |
//! | < `warning_after`  | `Ok`      | yes    |
//! | < `error_after`    | `Warning` | yes    |
//! | < `offline_after`  | `Error`   | yes    |
//! | otherwise          | `Offline` | no     |

use crate::connection::Transport;
use crate::protocol::Command;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Link health as graded by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Unknown,
    Ok,
    Warning,
    Error,
    Offline,
}

impl MonitorStatus {
    pub fn is_online(self) -> bool {
        matches!(self, MonitorStatus::Ok | MonitorStatus::Warning | MonitorStatus::Error)
    }
}

/// Heartbeat command and timeout tiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub heartbeat: String,
    pub heartbeat_interval: Duration,
    pub warning_after: Duration,
    pub error_after: Duration,
    pub offline_after: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat: Command::GetModel.encode(),
            heartbeat_interval: Duration::from_secs(10),
            warning_after: Duration::from_secs(30),
            error_after: Duration::from_secs(60),
            offline_after: Duration::from_secs(120),
        }
    }
}

impl MonitorConfig {
    /// Grade a silence of `elapsed`
    fn classify(&self, elapsed: Duration) -> MonitorStatus {
        if elapsed < self.warning_after {
            MonitorStatus::Ok
        } else if elapsed < self.error_after {
            MonitorStatus::Warning
        } else if elapsed < self.offline_after {
            MonitorStatus::Error
        } else {
            MonitorStatus::Offline
        }
    }
}

struct MonitorShared {
    config: MonitorConfig,
    last_activity: Mutex<Option<Instant>>,
    status: watch::Sender<MonitorStatus>,
    online: watch::Sender<bool>,
}

impl MonitorShared {
    fn set_status(&self, status: MonitorStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        if !changed {
            return;
        }

        tracing::debug!(?status, "Communication status changed");
        self.online.send_if_modified(|online| {
            if *online == status.is_online() {
                return false;
            }
            *online = status.is_online();
            true
        });
    }
}

/// Classifies the device as online or offline
pub struct CommunicationMonitor {
    transport: Arc<dyn Transport>,
    shared: Arc<MonitorShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CommunicationMonitor {
    pub fn new(transport: Arc<dyn Transport>, config: MonitorConfig) -> Self {
        Self {
            transport,
            shared: Arc::new(MonitorShared {
                config,
                last_activity: Mutex::new(None),
                status: watch::channel(MonitorStatus::Unknown).0,
                online: watch::channel(false).0,
            }),
            task: Mutex::new(None),
        }
    }

    /// Start sending heartbeats. Restarts the loop if already running.
    pub fn start(&self) {
        self.stop_task();

        let transport = self.transport.clone();
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(shared.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if let Err(e) = transport.send_line(&shared.config.heartbeat) {
                    tracing::warn!("Failed to send heartbeat: {}", e);
                }

                let last = *shared.last_activity.lock();
                match last {
                    Some(last) => shared.set_status(shared.config.classify(last.elapsed())),
                    None if started.elapsed() >= shared.config.offline_after => {
                        shared.set_status(MonitorStatus::Offline)
                    }
                    None => {}
                }
            }
        });

        *self.task.lock() = Some(handle);
    }

    /// Stop the heartbeat loop and forget the link state
    pub fn stop(&self) {
        self.stop_task();
        *self.shared.last_activity.lock() = None;
        self.shared.set_status(MonitorStatus::Unknown);
    }

    fn stop_task(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    /// Note that the device just sent something
    pub fn record_activity(&self) {
        *self.shared.last_activity.lock() = Some(Instant::now());
        self.shared.set_status(MonitorStatus::Ok);
    }

    pub fn status(&self) -> MonitorStatus {
        *self.shared.status.borrow()
    }

    pub fn is_online(&self) -> bool {
        *self.shared.online.borrow()
    }

    /// Watch the online flag; only real transitions wake the receiver
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shared.online.subscribe()
    }

    /// Watch the full status grade
    pub fn subscribe_status(&self) -> watch::Receiver<MonitorStatus> {
        self.shared.status.subscribe()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }
}

impl Drop for CommunicationMonitor {
    fn drop(&mut self) {
        self.stop_task();
    }
}
