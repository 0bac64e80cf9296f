use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Normalized fader level (0 = bottom of travel, 65535 = top)
pub type Level = u16;

/// Mute state
pub type MuteState = bool;

/// Mixer channel role, numbered the way the P300 command protocol numbers them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelId {
    All = 0,
    DanteMicInput01 = 1,
    DanteMicInput02 = 2,
    DanteMicInput03 = 3,
    DanteMicInput04 = 4,
    DanteMicInput05 = 5,
    DanteMicInput06 = 6,
    DanteMicInput07 = 7,
    DanteMicInput08 = 8,
    DanteInput09 = 9,
    DanteInput10 = 10,
    AnalogInput11 = 11,
    AnalogInput12 = 12,
    UsbInput = 13,
    MobileInput = 14,
    DanteOutput1 = 15,
    DanteOutput2 = 16,
    AnalogOutput1 = 17,
    AnalogOutput2 = 18,
    UsbOutput = 19,
    MobileOutput = 20,
    AutomixerOutput = 21,
    AecReference = 22,
}

impl ChannelId {
    /// Every concrete channel, in protocol order. `All` is excluded.
    pub const CONCRETE: [ChannelId; 22] = [
        ChannelId::DanteMicInput01,
        ChannelId::DanteMicInput02,
        ChannelId::DanteMicInput03,
        ChannelId::DanteMicInput04,
        ChannelId::DanteMicInput05,
        ChannelId::DanteMicInput06,
        ChannelId::DanteMicInput07,
        ChannelId::DanteMicInput08,
        ChannelId::DanteInput09,
        ChannelId::DanteInput10,
        ChannelId::AnalogInput11,
        ChannelId::AnalogInput12,
        ChannelId::UsbInput,
        ChannelId::MobileInput,
        ChannelId::DanteOutput1,
        ChannelId::DanteOutput2,
        ChannelId::AnalogOutput1,
        ChannelId::AnalogOutput2,
        ChannelId::UsbOutput,
        ChannelId::MobileOutput,
        ChannelId::AutomixerOutput,
        ChannelId::AecReference,
    ];

    /// Look up a channel by its protocol code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ChannelId::All),
            1..=22 => Some(Self::CONCRETE[usize::from(code) - 1]),
            _ => None,
        }
    }

    /// Protocol code for this channel
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Role name, e.g. `DanteMicInput01`
    pub fn name(self) -> &'static str {
        match self {
            ChannelId::All => "All",
            ChannelId::DanteMicInput01 => "DanteMicInput01",
            ChannelId::DanteMicInput02 => "DanteMicInput02",
            ChannelId::DanteMicInput03 => "DanteMicInput03",
            ChannelId::DanteMicInput04 => "DanteMicInput04",
            ChannelId::DanteMicInput05 => "DanteMicInput05",
            ChannelId::DanteMicInput06 => "DanteMicInput06",
            ChannelId::DanteMicInput07 => "DanteMicInput07",
            ChannelId::DanteMicInput08 => "DanteMicInput08",
            ChannelId::DanteInput09 => "DanteInput09",
            ChannelId::DanteInput10 => "DanteInput10",
            ChannelId::AnalogInput11 => "AnalogInput11",
            ChannelId::AnalogInput12 => "AnalogInput12",
            ChannelId::UsbInput => "UsbInput",
            ChannelId::MobileInput => "MobileInput",
            ChannelId::DanteOutput1 => "DanteOutput1",
            ChannelId::DanteOutput2 => "DanteOutput2",
            ChannelId::AnalogOutput1 => "AnalogOutput1",
            ChannelId::AnalogOutput2 => "AnalogOutput2",
            ChannelId::UsbOutput => "UsbOutput",
            ChannelId::MobileOutput => "MobileOutput",
            ChannelId::AutomixerOutput => "AutomixerOutput",
            ChannelId::AecReference => "AecReference",
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Direction of a held volume ramp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RampDirection {
    Up,
    Down,
}

/// Mute operation carried by a `SET ... AUDIO_MUTE` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteAction {
    On,
    Off,
    Toggle,
}

/// A recallable preset slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    /// Name as sent on the wire, e.g. `PRESET 01`
    pub name: String,
}

impl Preset {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// The ten preset slots a P300 exposes
pub fn default_presets() -> Vec<Preset> {
    (1..=10).map(|n| Preset::new(format!("PRESET {n:02}"))).collect()
}

/// Immutable snapshot of what the device has told us about itself.
///
/// Snapshots are shared behind an `Arc` and never edited in place. The
/// `with_*` builders hand back the very same `Arc` when the field already
/// holds the value, so `Arc::ptr_eq` tells whether anything changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub firmware_version: Arc<str>,
    pub host_name: Arc<str>,
    pub mac_address: Arc<str>,
    pub serial_number: Arc<str>,
    pub ip_address: Arc<str>,
}

impl DeviceIdentity {
    /// Empty snapshot used before the device has reported anything
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_firmware(self: &Arc<Self>, firmware: &str) -> Arc<Self> {
        if &*self.firmware_version == firmware {
            return Arc::clone(self);
        }
        Arc::new(Self {
            firmware_version: firmware.into(),
            ..(**self).clone()
        })
    }

    pub fn with_serial_number(self: &Arc<Self>, serial_number: &str) -> Arc<Self> {
        if &*self.serial_number == serial_number {
            return Arc::clone(self);
        }
        Arc::new(Self {
            serial_number: serial_number.into(),
            ..(**self).clone()
        })
    }

    pub fn with_ip_address(self: &Arc<Self>, ip_address: &str) -> Arc<Self> {
        if &*self.ip_address == ip_address {
            return Arc::clone(self);
        }
        Arc::new(Self {
            ip_address: ip_address.into(),
            ..(**self).clone()
        })
    }
}
