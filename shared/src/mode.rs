use crate::DecodeError;
use serde::{Deserialize, Serialize};

const MODE_MASK: u8 = 0xF0;
const FORCED_BIT: u8 = 0x01;

/// Labels for the watchdog radio group, indexed by the forced flag.
pub const WATCHDOG_LABELS: [&str; 2] = ["Regular reboot", "Forced reboot"];

/// Power path selected by the high nibble of `program_version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum UpsMode {
    Bypass = 0,
    Supercapacitor = 16,
    Battery = 32,
}

impl UpsMode {
    pub const ALL: [UpsMode; 3] = [UpsMode::Bypass, UpsMode::Supercapacitor, UpsMode::Battery];

    pub fn label(self) -> &'static str {
        match self {
            UpsMode::Bypass => "Bypass",
            UpsMode::Supercapacitor => "Supercapacitor",
            UpsMode::Battery => "External battery",
        }
    }
}

impl TryFrom<u8> for UpsMode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(UpsMode::Bypass),
            16 => Ok(UpsMode::Supercapacitor),
            32 => Ok(UpsMode::Battery),
            other => Err(DecodeError::UnknownMode(other)),
        }
    }
}

/// Decoded `program_version` byte: `mode | forced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeFlag {
    pub mode: UpsMode,
    /// Watchdog performs a forced reboot instead of a regular one.
    pub forced: bool,
}

impl ModeFlag {
    pub fn decode(raw: u8) -> Result<Self, DecodeError> {
        Ok(Self {
            mode: UpsMode::try_from(raw & MODE_MASK)?,
            forced: raw & FORCED_BIT != 0,
        })
    }

    pub fn encode(&self) -> u8 {
        self.mode as u8 | if self.forced { FORCED_BIT } else { 0 }
    }

    pub fn with_mode(self, mode: UpsMode) -> Self {
        Self { mode, ..self }
    }

    pub fn with_forced(self, forced: bool) -> Self {
        Self { forced, ..self }
    }
}
