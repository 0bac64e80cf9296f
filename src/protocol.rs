//! P300 ASCII command protocol.
//!
//! Every message is framed as `< TOKEN TOKEN ... >`. Reports from the device
//! use the `REP` verb, e.g.
//!
//! ```text
//! < REP 05 AUDIO_MUTE ON >
//! < REP 17 AUDIO_GAIN_HI_RES 0700 >
//! < REP FW_VER {1.6.2.0} >
//! ```
//!
//! Gain is carried in tenths of a dB from `0000` to `1400`. Consumers see a
//! normalized 16-bit level instead; see [`normalized_from_raw`].

use crate::error::{DspError, Result};
use crate::types::{ChannelId, Level, MuteAction, RampDirection};
use std::fmt;

/// Highest raw gain value the device reports (140.0 dB of travel)
pub const RAW_LEVEL_MAX: u16 = 1400;

/// Highest normalized level
pub const LEVEL_MAX: Level = u16::MAX;

/// Step sent per ramp tick, in tenths of a dB
pub const RAMP_STEP: u16 = 100;

const MUTE_TOKEN: &str = "AUDIO_MUTE";
const GAIN_TOKEN: &str = "AUDIO_GAIN";
const FIRMWARE_TOKEN: &str = "FW_VER";
const SERIAL_TOKEN: &str = "SERIAL_NUM";
const IP_TOKEN: &str = "IP_ADDR_NET_AUDIO_PRIMARY";

/// Convert a raw protocol gain to a normalized level, rounding half up.
///
/// Raw values outside `0..=1400` are clamped first.
pub fn normalized_from_raw(raw: u16) -> Level {
    let raw = u32::from(raw.min(RAW_LEVEL_MAX));
    let max = u32::from(RAW_LEVEL_MAX);
    let scaled = (raw * u32::from(LEVEL_MAX) * 2 + max) / (max * 2);
    scaled as Level
}

/// Convert a normalized level back to raw protocol gain, rounding half up.
///
/// Exact inverse of [`normalized_from_raw`] over the raw range.
pub fn raw_from_normalized(level: Level) -> u16 {
    let level = u32::from(level);
    let max = u32::from(LEVEL_MAX);
    let raw = (level * u32::from(RAW_LEVEL_MAX) * 2 + max) / (max * 2);
    (raw as u16).min(RAW_LEVEL_MAX)
}

/// A decoded device report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// `< REP xx AUDIO_MUTE ON|OFF >`
    Mute { channel: u16, muted: bool },

    /// `< REP xx AUDIO_GAIN_HI_RES yyyy >`, level already clamped to `0..=1400`
    Level { channel: u16, raw: u16 },

    /// `< REP FW_VER {...} >`
    Firmware(String),

    /// `< REP SERIAL_NUM {...} >`
    SerialNumber(String),

    /// `< REP IP_ADDR_NET_AUDIO_PRIMARY {...} >`
    IpAddress(String),

    /// Anything we don't track
    Unrecognized,
}

impl Report {
    /// Normalized level for a level report
    pub fn level(&self) -> Option<Level> {
        match self {
            Report::Level { raw, .. } => Some(normalized_from_raw(*raw)),
            _ => None,
        }
    }
}

/// Report kinds in the order they are tried
#[derive(Debug, Clone, Copy)]
enum ReportKind {
    Mute,
    Level,
    Firmware,
    SerialNumber,
    IpAddress,
}

impl ReportKind {
    const ORDERED: [ReportKind; 5] = [
        ReportKind::Mute,
        ReportKind::Level,
        ReportKind::Firmware,
        ReportKind::SerialNumber,
        ReportKind::IpAddress,
    ];

    fn matches(self, token: &str) -> bool {
        match self {
            ReportKind::Mute => token == MUTE_TOKEN,
            ReportKind::Level => token.starts_with(GAIN_TOKEN),
            ReportKind::Firmware => token == FIRMWARE_TOKEN,
            ReportKind::SerialNumber => token == SERIAL_TOKEN,
            ReportKind::IpAddress => token == IP_TOKEN,
        }
    }

    /// Tokens needed before the fields of this kind can be read
    fn min_tokens(self) -> usize {
        match self {
            ReportKind::Mute => 3,
            ReportKind::Level => 5,
            ReportKind::Firmware | ReportKind::SerialNumber | ReportKind::IpAddress => 4,
        }
    }
}

/// Decode one line received from the device.
///
/// The closing `>` is optional and may touch the last token (`ON>`). Lines
/// that don't carry a known report decode to [`Report::Unrecognized`];
/// known reports with missing or non-numeric fields are errors. Channel
/// numbers are not checked against the registry here.
pub fn decode(line: &str) -> Result<Report> {
    let body = line.trim().trim_end_matches('>');
    let tokens: Vec<&str> = body.split_whitespace().collect();

    let Some(kind) = ReportKind::ORDERED
        .into_iter()
        .find(|kind| tokens.iter().any(|token| kind.matches(token)))
    else {
        return Ok(Report::Unrecognized);
    };

    if tokens.len() < kind.min_tokens() {
        return Err(DspError::malformed(
            line,
            format!("expected at least {} tokens, got {}", kind.min_tokens(), tokens.len()),
        ));
    }

    let report = match kind {
        ReportKind::Mute => Report::Mute {
            channel: parse_channel(line, tokens[2])?,
            muted: tokens.contains(&"ON"),
        },
        ReportKind::Level => {
            let channel = parse_channel(line, tokens[2])?;
            let raw: i64 = tokens[4]
                .parse()
                .map_err(|_| DspError::malformed(line, format!("level {:?} is not a number", tokens[4])))?;
            Report::Level {
                channel,
                raw: raw.clamp(0, i64::from(RAW_LEVEL_MAX)) as u16,
            }
        }
        ReportKind::Firmware => Report::Firmware(string_value(&tokens[3..])),
        ReportKind::SerialNumber => Report::SerialNumber(string_value(&tokens[3..])),
        ReportKind::IpAddress => Report::IpAddress(string_value(&tokens[3..])),
    };

    Ok(report)
}

fn parse_channel(line: &str, token: &str) -> Result<u16> {
    token
        .parse()
        .map_err(|_| DspError::malformed(line, format!("channel {token:?} is not a number")))
}

/// The device wraps string values in braces, padded with spaces
fn string_value(tokens: &[&str]) -> String {
    tokens
        .join(" ")
        .trim_matches(|c| c == '{' || c == '}')
        .trim()
        .to_string()
}

/// A command to send to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask for every parameter on every channel
    GetAll,
    /// Ask for the gain of every channel
    GetLevels,
    /// Ask for the mute state of every channel
    GetMutes,
    /// Heartbeat
    GetModel,
    GetSerialNumber,
    GetFirmware,
    GetIpAddress,
    SetMute { channel: ChannelId, action: MuteAction },
    /// Absolute gain in raw protocol units
    SetLevel { channel: ChannelId, raw: u16 },
    /// Relative gain change in tenths of a dB
    StepLevel { channel: ChannelId, direction: RampDirection, step: u16 },
    /// Recall a preset by its wire name, e.g. `PRESET 01`
    RecallPreset(String),
}

impl Command {
    /// Render the command as wire text
    pub fn encode(&self) -> String {
        self.to_string().trim().to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::GetAll => write!(f, "< GET 00 ALL >"),
            Command::GetLevels => write!(f, "< GET 00 AUDIO_GAIN_HI_RES >"),
            Command::GetMutes => write!(f, "< GET 00 AUDIO_MUTE >"),
            Command::GetModel => write!(f, "< GET MODEL >"),
            Command::GetSerialNumber => write!(f, "< GET SERIAL_NUM >"),
            Command::GetFirmware => write!(f, "< GET FW_VER >"),
            Command::GetIpAddress => write!(f, "< GET IP_ADDR_NET_AUDIO_PRIMARY >"),
            Command::SetMute { channel, action } => {
                let action = match action {
                    MuteAction::On => "ON",
                    MuteAction::Off => "OFF",
                    MuteAction::Toggle => "TOGGLE",
                };
                write!(f, "< SET {:02} AUDIO_MUTE {} >", channel.code(), action)
            }
            Command::SetLevel { channel, raw } => {
                write!(f, "< SET {:02} AUDIO_GAIN_HI_RES {:04} >", channel.code(), raw)
            }
            Command::StepLevel { channel, direction, step } => {
                let direction = match direction {
                    RampDirection::Up => "INC",
                    RampDirection::Down => "DEC",
                };
                write!(f, "< SET {:02} AUDIO_GAIN_HI_RES {} {} >", channel.code(), direction, step)
            }
            Command::RecallPreset(name) => write!(f, "< SET {} >", name.trim()),
        }
    }
}
