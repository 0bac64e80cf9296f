use crate::config::{ConfigStore, DspConfig};
use crate::connection::{TcpConnection, Transport};
use crate::error::{DspError, Result};
use crate::fader::Fader;
use crate::monitor::{CommunicationMonitor, MonitorStatus};
use crate::protocol::{self, Command, Report};
use crate::subscription::{EventReceiver, SessionEvent};
use crate::types::{ChannelId, DeviceIdentity, Preset};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Shortest address accepted by [`DspSession::set_address`], e.g. `1.1.1.1`
pub const MIN_ADDRESS_LEN: usize = 7;

const EVENT_CAPACITY: usize = 256;

/// Receives every new identity snapshot
pub trait IdentitySink: Send + Sync {
    fn identity_changed(&self, identity: &DeviceIdentity);
}

/// Session with a single P300
///
/// The session owns one fader per mixer channel and keeps them in sync with
/// what the device reports. Once started it polls gain and mute while the
/// health monitor says the device is online, and stops when it goes offline.
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct DspSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    key: String,
    transport: Arc<dyn Transport>,
    faders: BTreeMap<ChannelId, Arc<Fader>>,
    presets: Vec<Preset>,
    poll_interval: Duration,
    config: Mutex<DspConfig>,
    identity: Mutex<Arc<DeviceIdentity>>,
    monitor: CommunicationMonitor,
    events: broadcast::Sender<SessionEvent>,
    identity_sink: Mutex<Option<Arc<dyn IdentitySink>>>,
    config_store: Mutex<Option<Arc<dyn ConfigStore>>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DspSession {
    /// Build a session on top of an existing transport. Nothing is sent until
    /// [`start`](Self::start) is called.
    pub fn new(config: DspConfig, transport: Arc<dyn Transport>) -> Self {
        let faders = ChannelId::CONCRETE
            .into_iter()
            .map(|channel| {
                let fader = Fader::new(
                    &config.key,
                    channel,
                    transport.clone(),
                    config.ramp_tick(),
                    config.ramp_step,
                );
                (channel, Arc::new(fader))
            })
            .collect();

        let monitor = CommunicationMonitor::new(transport.clone(), config.monitor_config());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(SessionInner {
                key: config.key.clone(),
                transport,
                faders,
                presets: config.presets.clone(),
                poll_interval: config.poll_interval(),
                config: Mutex::new(config),
                identity: Mutex::new(DeviceIdentity::empty()),
                monitor,
                events,
                identity_sink: Mutex::new(None),
                config_store: Mutex::new(None),
                poll_task: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Connect to the device named in `config` over TCP and start the session
    ///
    /// # Example
    ///
    /// ```no_run
    /// use shure_p300::{ChannelId, DspConfig, DspSession};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let session = DspSession::connect(DspConfig::new("192.168.1.50")).await?;
    ///     if let Some(fader) = session.fader(ChannelId::DanteMicInput01) {
    ///         fader.mute_on()?;
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(config: DspConfig) -> Result<Self> {
        let (connection, lines) = TcpConnection::connect(&config.host, config.port).await?;
        let session = Self::new(config, Arc::new(connection));
        session.start(lines);
        Ok(session)
    }

    /// Start the health monitor and consume inbound lines from `lines`.
    ///
    /// Must be called from within a tokio runtime. Calling it again replaces
    /// the previous line stream.
    pub fn start(&self, mut lines: mpsc::UnboundedReceiver<String>) {
        self.inner.abort_tasks();

        let weak = Arc::downgrade(&self.inner);
        let dispatch = tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.monitor.record_activity();
                inner.handle_line(&line);
            }
            tracing::debug!("Line stream ended");
        });

        let weak = Arc::downgrade(&self.inner);
        let mut online = self.inner.monitor.subscribe();
        let connectivity = tokio::spawn(async move {
            while online.changed().await.is_ok() {
                let is_online = *online.borrow_and_update();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.on_online_changed(is_online);
            }
        });

        let runtime = Handle::current();
        for fader in self.inner.faders.values() {
            fader.attach_runtime(runtime.clone());
        }

        self.inner.tasks.lock().extend([dispatch, connectivity]);
        self.inner.monitor.start();
    }

    /// Stop polling, heartbeats, ramps and line processing
    pub fn shutdown(&self) {
        tracing::info!(key = %self.inner.key, "Shutting down session");
        self.inner.abort_tasks();
        self.inner.stop_poll();
        self.inner.monitor.stop();
        for fader in self.inner.faders.values() {
            fader.shutdown();
        }
    }

    /// Feed one line received from the device.
    ///
    /// Malformed lines and reports for unknown channels are logged and
    /// dropped.
    pub fn handle_line(&self, line: &str) {
        self.inner.handle_line(line);
    }

    // ========== Accessors ==========

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Fader for `channel`; `None` for [`ChannelId::All`]
    pub fn fader(&self, channel: ChannelId) -> Option<Arc<Fader>> {
        self.inner.faders.get(&channel).cloned()
    }

    /// All faders in channel order
    pub fn faders(&self) -> Vec<Arc<Fader>> {
        self.inner.faders.values().cloned().collect()
    }

    pub fn presets(&self) -> &[Preset] {
        &self.inner.presets
    }

    /// Current identity snapshot
    pub fn identity(&self) -> Arc<DeviceIdentity> {
        self.inner.identity.lock().clone()
    }

    pub fn is_online(&self) -> bool {
        self.inner.monitor.is_online()
    }

    pub fn status(&self) -> MonitorStatus {
        self.inner.monitor.status()
    }

    /// Address currently in the configuration
    pub fn address(&self) -> String {
        self.inner.config.lock().host.clone()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.inner.events.subscribe())
    }

    /// Watch the online flag
    pub fn subscribe_online(&self) -> watch::Receiver<bool> {
        self.inner.monitor.subscribe()
    }

    pub fn set_identity_sink(&self, sink: Arc<dyn IdentitySink>) {
        *self.inner.identity_sink.lock() = Some(sink);
    }

    pub fn set_config_store(&self, store: Arc<dyn ConfigStore>) {
        *self.inner.config_store.lock() = Some(store);
    }

    // ========== Commands ==========

    /// Send raw command text. Surrounding whitespace is trimmed and empty
    /// text is ignored.
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.inner.send_text(text)
    }

    /// Ask the device for its serial number, firmware version and IP address
    pub fn update_device_info(&self) -> Result<()> {
        for command in [Command::GetSerialNumber, Command::GetFirmware, Command::GetIpAddress] {
            self.inner.send_command(&command)?;
        }
        Ok(())
    }

    /// Recall a preset by name, ignoring case
    pub fn recall_preset(&self, name: &str) -> Result<()> {
        let name = name.trim();
        let Some(preset) = self
            .inner
            .presets
            .iter()
            .find(|preset| preset.name.trim().eq_ignore_ascii_case(name))
        else {
            tracing::warn!(preset = name, "No preset with that name");
            return Err(DspError::PresetNotFound(name.to_string()));
        };

        tracing::info!(preset = %preset.name, "Recalling preset");
        self.inner
            .send_command(&Command::RecallPreset(preset.name.clone()))
    }

    /// Point the configuration at a new device address.
    ///
    /// The address is persisted through the config store and a
    /// [`SessionEvent::RestartRequired`] is published. The live connection is
    /// left alone; the new address is used on the next start.
    pub fn set_address(&self, address: &str) -> Result<()> {
        let address = address.trim();
        if address.len() < MIN_ADDRESS_LEN {
            tracing::warn!(address, "Rejected address change, too short");
            return Err(DspError::InvalidAddress(address.to_string()));
        }

        let mut config = self.inner.config.lock();
        if config.host.trim().eq_ignore_ascii_case(address) {
            tracing::warn!(address, "Rejected address change, already configured");
            return Err(DspError::AddressUnchanged(address.to_string()));
        }

        let store = self.inner.config_store.lock().clone();
        match store {
            Some(store) => store.persist_address(address)?,
            None => tracing::debug!("No config store set, address change kept in memory"),
        }
        config.host = address.to_string();
        drop(config);

        tracing::info!(address, "Device address changed, restart required");
        let _ = self.inner.events.send(SessionEvent::RestartRequired {
            address: address.to_string(),
        });
        Ok(())
    }
}

impl SessionInner {
    fn handle_line(&self, line: &str) {
        if let Err(e) = self.process_line(line) {
            tracing::warn!("Dropped report: {}", e);
        }
    }

    fn process_line(&self, line: &str) -> Result<()> {
        let report = protocol::decode(line)?;
        match report {
            Report::Mute { channel, muted } => {
                let fader = self.fader_for(channel)?;
                tracing::debug!(channel = %fader.channel(), muted, "Mute report");
                fader.apply_mute_report(muted);
                let _ = self.events.send(SessionEvent::MuteChanged {
                    channel: fader.channel(),
                    muted,
                });
            }
            Report::Level { channel, raw } => {
                let fader = self.fader_for(channel)?;
                let level = protocol::normalized_from_raw(raw);
                tracing::debug!(channel = %fader.channel(), raw, level, "Level report");
                fader.apply_level_report(level);
                let _ = self.events.send(SessionEvent::LevelChanged {
                    channel: fader.channel(),
                    level,
                });
            }
            Report::Firmware(firmware) => self.update_identity(|id| id.with_firmware(&firmware)),
            Report::SerialNumber(serial) => {
                self.update_identity(|id| id.with_serial_number(&serial))
            }
            Report::IpAddress(ip) => self.update_identity(|id| id.with_ip_address(&ip)),
            Report::Unrecognized => {}
        }
        Ok(())
    }

    fn fader_for(&self, code: u16) -> Result<&Arc<Fader>> {
        u8::try_from(code)
            .ok()
            .and_then(ChannelId::from_code)
            .and_then(|channel| self.faders.get(&channel))
            .ok_or(DspError::UnknownChannel(code))
    }

    fn update_identity(&self, update: impl FnOnce(&Arc<DeviceIdentity>) -> Arc<DeviceIdentity>) {
        let changed = {
            let mut current = self.identity.lock();
            let next = update(&*current);
            if Arc::ptr_eq(&next, &*current) {
                None
            } else {
                *current = next.clone();
                Some(next)
            }
        };

        let Some(identity) = changed else {
            return;
        };

        tracing::info!(
            firmware = %identity.firmware_version,
            serial = %identity.serial_number,
            ip = %identity.ip_address,
            "Device identity changed"
        );
        let sink = self.identity_sink.lock().clone();
        if let Some(sink) = sink {
            sink.identity_changed(&identity);
        }
        let _ = self.events.send(SessionEvent::IdentityChanged(identity));
    }

    fn on_online_changed(self: &Arc<Self>, online: bool) {
        let _ = self.events.send(SessionEvent::OnlineChanged(online));

        if !online {
            tracing::info!(key = %self.key, "Device offline, polling stopped");
            self.stop_poll();
            return;
        }

        tracing::info!(key = %self.key, "Device online, polling started");
        for command in [Command::GetAll, Command::GetLevels, Command::GetMutes] {
            if let Err(e) = self.send_command(&command) {
                tracing::warn!("Failed to send initial poll: {}", e);
            }
        }
        self.start_poll();
    }

    fn start_poll(self: &Arc<Self>) {
        self.stop_poll();

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.poll_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !inner.monitor.is_online() {
                    continue;
                }
                for command in [Command::GetLevels, Command::GetMutes] {
                    if let Err(e) = inner.send_command(&command) {
                        tracing::warn!("Failed to send poll: {}", e);
                    }
                }
            }
        });

        *self.poll_task.lock() = Some(handle);
    }

    fn stop_poll(&self) {
        if let Some(handle) = self.poll_task.lock().take() {
            handle.abort();
        }
    }

    fn abort_tasks(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    fn send_command(&self, command: &Command) -> Result<()> {
        self.send_text(&command.encode())
    }

    fn send_text(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        self.transport.send_line(text)
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.abort_tasks();
        self.stop_poll();
    }
}
