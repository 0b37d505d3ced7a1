use serde::{Deserialize, Serialize};

pub const PORT_COUNT: usize = 4;

/// Labels for the UPS-backed ports, indexed by bit position.
pub const PORT_LABELS: [&str; PORT_COUNT] = ["HDMI", "USB 2.0 (2)", "USB 2.0 (1)", "USB 3.0"];

const PORT_MASK: u8 = 0x0F;
const ACTIVE_HIGH_BIT: u8 = 0x80;

/// Decoded `port_poweroff` byte.
///
/// Bits 0-3 are power-off flags, so a set bit means the port loses power when
/// the system shuts down. Bit 7 is the polarity of the power-off line. Bits 4-6
/// are unused by the firmware and dropped on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortState {
    pub off: [bool; PORT_COUNT],
    pub active_high: bool,
}

impl PortState {
    pub fn decode(byte: u8) -> Self {
        let mut off = [false; PORT_COUNT];
        for (i, flag) in off.iter_mut().enumerate() {
            *flag = byte & (1 << i) != 0;
        }
        Self {
            off,
            active_high: byte & ACTIVE_HIGH_BIT != 0,
        }
    }

    pub fn encode(&self) -> u8 {
        let ports = self
            .off
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, &off)| if off { acc | (1 << i) } else { acc });
        (ports & PORT_MASK) | if self.active_high { ACTIVE_HIGH_BIT } else { 0 }
    }

    /// Same state with one port's flag inverted. `None` for an index past the
    /// last port.
    pub fn toggled(&self, index: usize) -> Option<Self> {
        let mut next = *self;
        let flag = next.off.get_mut(index)?;
        *flag = !*flag;
        Some(next)
    }

    /// What the "keep powered" checkbox shows: the negation of the off bit.
    pub fn enabled(&self, index: usize) -> Option<bool> {
        self.off.get(index).map(|off| !off)
    }
}
