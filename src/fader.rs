use crate::connection::Transport;
use crate::error::{DspError, Result};
use crate::protocol::{raw_from_normalized, Command};
use crate::types::{ChannelId, Level, MuteAction, MuteState, RampDirection};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How often a held ramp resends its step command
pub const DEFAULT_RAMP_TICK: Duration = Duration::from_millis(25);

/// A running ramp loop and the flag that keeps it going
struct RampTask {
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Control point for a single mixer channel
///
/// Commands go straight to the transport and never touch local state; mute
/// and level only change when the device reports them back.
pub struct Fader {
    channel: ChannelId,
    key: String,
    transport: Arc<dyn Transport>,
    muted: watch::Sender<MuteState>,
    level: watch::Sender<Level>,
    ramp_up: Mutex<Option<RampTask>>,
    ramp_down: Mutex<Option<RampTask>>,
    ramp_tick: Duration,
    ramp_step: u16,
    runtime: Mutex<Option<Handle>>,
}

impl Fader {
    pub(crate) fn new(
        parent_key: &str,
        channel: ChannelId,
        transport: Arc<dyn Transport>,
        ramp_tick: Duration,
        ramp_step: u16,
    ) -> Self {
        Self {
            channel,
            key: format!("{}-{}", parent_key, channel),
            transport,
            muted: watch::channel(false).0,
            level: watch::channel(0).0,
            ramp_up: Mutex::new(None),
            ramp_down: Mutex::new(None),
            ramp_tick,
            ramp_step,
            runtime: Mutex::new(Handle::try_current().ok()),
        }
    }

    /// Run ramp loops on `runtime`, so presses may come from any thread
    pub(crate) fn attach_runtime(&self, runtime: Handle) {
        *self.runtime.lock() = Some(runtime);
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Unique key, `<device key>-<channel role>`
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Last reported mute state
    pub fn is_muted(&self) -> MuteState {
        *self.muted.borrow()
    }

    /// Last reported level, normalized
    pub fn level(&self) -> Level {
        *self.level.borrow()
    }

    /// Watch mute reports. Every report wakes the receiver, even a repeat.
    pub fn subscribe_mute(&self) -> watch::Receiver<MuteState> {
        self.muted.subscribe()
    }

    /// Watch level reports. Every report wakes the receiver, even a repeat.
    pub fn subscribe_level(&self) -> watch::Receiver<Level> {
        self.level.subscribe()
    }

    // ========== Commands ==========

    /// Ask the device to move this channel to a normalized level
    pub fn set_level(&self, level: Level) -> Result<()> {
        self.send(Command::SetLevel {
            channel: self.channel,
            raw: raw_from_normalized(level),
        })
    }

    pub fn mute_on(&self) -> Result<()> {
        self.send_mute(MuteAction::On)
    }

    pub fn mute_off(&self) -> Result<()> {
        self.send_mute(MuteAction::Off)
    }

    pub fn mute_toggle(&self) -> Result<()> {
        self.send_mute(MuteAction::Toggle)
    }

    fn send_mute(&self, action: MuteAction) -> Result<()> {
        self.send(Command::SetMute {
            channel: self.channel,
            action,
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.transport.send_line(&command.encode())
    }

    // ========== Ramping ==========

    /// Press (`true`) or release (`false`) volume up.
    ///
    /// A press fails with [`DspError::NoRuntime`] if the fader was built
    /// outside a tokio runtime and no session has started it since.
    pub fn begin_ramp_up(&self, held: bool) -> Result<()> {
        self.ramp(RampDirection::Up, held)
    }

    /// Press (`true`) or release (`false`) volume down.
    pub fn begin_ramp_down(&self, held: bool) -> Result<()> {
        self.ramp(RampDirection::Down, held)
    }

    /// Whether a press is currently held in `direction`
    pub fn is_ramping(&self, direction: RampDirection) -> bool {
        self.ramp_slot(direction)
            .lock()
            .as_ref()
            .is_some_and(|task| task.active.load(Ordering::Acquire))
    }

    fn ramp_slot(&self, direction: RampDirection) -> &Mutex<Option<RampTask>> {
        match direction {
            RampDirection::Up => &self.ramp_up,
            RampDirection::Down => &self.ramp_down,
        }
    }

    fn ramp(&self, direction: RampDirection, held: bool) -> Result<()> {
        let mut slot = self.ramp_slot(direction).lock();

        if !held {
            if let Some(task) = slot.as_ref() {
                task.active.store(false, Ordering::Release);
            }
            return Ok(());
        }

        if slot
            .as_ref()
            .is_some_and(|task| task.active.load(Ordering::Acquire))
        {
            return Ok(());
        }

        let runtime = self
            .runtime
            .lock()
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or(DspError::NoRuntime)?;

        // A released loop may still be waiting out its last tick. Each press
        // gets a fresh flag, so that loop can never be revived.
        if let Some(previous) = slot.take() {
            previous.handle.abort();
        }

        tracing::debug!(channel = %self.channel, ?direction, "Ramp started");

        let active = Arc::new(AtomicBool::new(true));
        let command = Command::StepLevel {
            channel: self.channel,
            direction,
            step: self.ramp_step,
        }
        .encode();
        let handle = runtime.spawn(ramp_loop(
            self.transport.clone(),
            command,
            active.clone(),
            self.ramp_tick,
        ));

        *slot = Some(RampTask { active, handle });
        Ok(())
    }

    // ========== Reports ==========

    pub(crate) fn apply_mute_report(&self, muted: MuteState) {
        self.muted.send_replace(muted);
    }

    pub(crate) fn apply_level_report(&self, level: Level) {
        self.level.send_replace(level);
    }

    /// Stop both ramp loops for good
    pub(crate) fn shutdown(&self) {
        for slot in [&self.ramp_up, &self.ramp_down] {
            if let Some(task) = slot.lock().take() {
                task.active.store(false, Ordering::Release);
                task.handle.abort();
            }
        }
    }
}

impl Drop for Fader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn ramp_loop(
    transport: Arc<dyn Transport>,
    command: String,
    active: Arc<AtomicBool>,
    tick: Duration,
) {
    while active.load(Ordering::Acquire) {
        if let Err(e) = transport.send_line(&command) {
            tracing::warn!("Ramp stopped, failed to send {}: {}", command, e);
            active.store(false, Ordering::Release);
            break;
        }
        tokio::time::sleep(tick).await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::RAMP_STEP;

    /// Transport that records every line written to it
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        lines: Mutex<Vec<String>>,
    }

    impl RecordingTransport {
        pub(crate) fn lines(&self) -> Vec<String> {
            self.lines.lock().clone()
        }

        pub(crate) fn count(&self, line: &str) -> usize {
            self.lines.lock().iter().filter(|l| *l == line).count()
        }

        pub(crate) fn clear(&self) {
            self.lines.lock().clear();
        }
    }

    impl Transport for RecordingTransport {
        fn send_line(&self, line: &str) -> Result<()> {
            self.lines.lock().push(line.to_string());
            Ok(())
        }
    }

    fn fader(channel: ChannelId) -> (Fader, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let fader = Fader::new("dsp1", channel, transport.clone(), DEFAULT_RAMP_TICK, RAMP_STEP);
        (fader, transport)
    }

    #[tokio::test]
    async fn test_commands_do_not_touch_state() {
        let (fader, transport) = fader(ChannelId::DanteMicInput05);

        fader.mute_on().unwrap();
        fader.mute_off().unwrap();
        fader.mute_toggle().unwrap();
        fader.set_level(u16::MAX).unwrap();

        assert_eq!(
            transport.lines(),
            vec![
                "< SET 05 AUDIO_MUTE ON >",
                "< SET 05 AUDIO_MUTE OFF >",
                "< SET 05 AUDIO_MUTE TOGGLE >",
                "< SET 05 AUDIO_GAIN_HI_RES 1400 >",
            ]
        );
        assert!(!fader.is_muted());
        assert_eq!(fader.level(), 0);
    }

    #[tokio::test]
    async fn test_reports_always_notify() {
        let (fader, _) = fader(ChannelId::UsbOutput);
        let mut muted = fader.subscribe_mute();
        let mut level = fader.subscribe_level();

        fader.apply_mute_report(false);
        assert!(muted.has_changed().unwrap());
        muted.borrow_and_update();

        fader.apply_mute_report(false);
        assert!(muted.has_changed().unwrap());

        fader.apply_level_report(1234);
        assert!(level.has_changed().unwrap());
        assert_eq!(*level.borrow_and_update(), 1234);
        assert_eq!(fader.level(), 1234);
    }

    #[test]
    fn test_key_includes_channel_role() {
        let (fader, _) = fader(ChannelId::AecReference);
        assert_eq!(fader.key(), "dsp1-AecReference");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_sends_one_step_per_tick_until_released() {
        let (fader, transport) = fader(ChannelId::DanteMicInput01);
        let step = "< SET 01 AUDIO_GAIN_HI_RES INC 100 >";

        fader.begin_ramp_up(true).unwrap();
        tokio::time::sleep(DEFAULT_RAMP_TICK * 4).await;
        fader.begin_ramp_up(false).unwrap();

        let sent = transport.count(step);
        assert!((4..=5).contains(&sent), "sent {sent}");

        // No trailing command after release
        tokio::time::sleep(DEFAULT_RAMP_TICK * 4).await;
        assert_eq!(transport.count(step), sent);
        assert!(!fader.is_ramping(RampDirection::Up));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_press_does_not_start_another_loop() {
        let (fader, transport) = fader(ChannelId::DanteOutput2);
        let step = "< SET 16 AUDIO_GAIN_HI_RES DEC 100 >";

        fader.begin_ramp_down(true).unwrap();
        tokio::time::sleep(DEFAULT_RAMP_TICK * 2).await;
        fader.begin_ramp_down(true).unwrap();
        tokio::time::sleep(DEFAULT_RAMP_TICK * 2).await;
        fader.begin_ramp_down(false).unwrap();

        let sent = transport.count(step);
        assert!((4..=5).contains(&sent), "sent {sent}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_quick_repress_keeps_a_single_sender() {
        let (fader, transport) = fader(ChannelId::MobileInput);
        let step = "< SET 14 AUDIO_GAIN_HI_RES INC 100 >";

        fader.begin_ramp_up(true).unwrap();
        tokio::task::yield_now().await;
        fader.begin_ramp_up(false).unwrap();
        fader.begin_ramp_up(true).unwrap();
        transport.clear();

        tokio::time::sleep(DEFAULT_RAMP_TICK * 4).await;
        fader.begin_ramp_up(false).unwrap();

        let sent = transport.count(step);
        assert!((4..=5).contains(&sent), "sent {sent}");
    }

    #[test]
    fn test_press_needs_a_runtime() {
        let (fader, transport) = fader(ChannelId::DanteMicInput02);
        let step = "< SET 02 AUDIO_GAIN_HI_RES INC 100 >";

        assert!(matches!(fader.begin_ramp_up(true), Err(DspError::NoRuntime)));
        assert!(!fader.is_ramping(RampDirection::Up));
        fader.begin_ramp_up(false).unwrap();

        // Once attached, presses work from a thread that has no runtime
        let runtime = tokio::runtime::Runtime::new().unwrap();
        fader.attach_runtime(runtime.handle().clone());
        std::thread::scope(|scope| {
            scope.spawn(|| {
                fader.begin_ramp_up(true).unwrap();
                std::thread::sleep(Duration::from_millis(100));
                fader.begin_ramp_up(false).unwrap();
            });
        });
        assert!(transport.count(step) >= 1);
        fader.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_ramps() {
        let (fader, transport) = fader(ChannelId::AnalogInput11);

        fader.begin_ramp_up(true).unwrap();
        fader.begin_ramp_down(true).unwrap();
        tokio::time::sleep(DEFAULT_RAMP_TICK).await;
        fader.shutdown();
        let sent = transport.lines().len();

        tokio::time::sleep(DEFAULT_RAMP_TICK * 4).await;
        assert_eq!(transport.lines().len(), sent);
        assert!(!fader.is_ramping(RampDirection::Up));
        assert!(!fader.is_ramping(RampDirection::Down));
    }
}
