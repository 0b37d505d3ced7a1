//! Data model and byte codecs for the WP360 power management microcontroller
//! (PMUc). Nothing in here touches the device; the backend owns all I/O.

mod mode;
mod parameter;
mod ports;
mod telemetry;

pub use mode::{ModeFlag, UpsMode, WATCHDOG_LABELS};
pub use parameter::{default_parameters, ParameterCategory, ScaledParameter, INPUT_STEP};
pub use ports::{PortState, PORT_COUNT, PORT_LABELS};
pub use telemetry::{TelemetryReading, TELEMETRY_SCALE};

use thiserror::Error;

/// Firmware release string reported when the PMUc did not answer the driver.
pub const FIRMWARE_SENTINEL: &str = "00-00-00";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("not an integer: {0:?}")]
    NotAnInteger(String),

    #[error("value {0} does not fit in a byte")]
    OutOfByteRange(i64),

    #[error("unknown UPS mode 0x{0:02x}")]
    UnknownMode(u8),

    #[error("malformed telemetry line: {0}")]
    MalformedTelemetry(String),
}

/// Parse the decimal text of a device attribute.
pub fn parse_raw_int(text: &str) -> Result<i64, DecodeError> {
    let trimmed = text.trim();
    trimmed
        .parse::<i64>()
        .map_err(|_| DecodeError::NotAnInteger(trimmed.to_string()))
}

/// Parse a device attribute that holds a single packed byte.
pub fn parse_raw_byte(text: &str) -> Result<u8, DecodeError> {
    let raw = parse_raw_int(text)?;
    u8::try_from(raw).map_err(|_| DecodeError::OutOfByteRange(raw))
}

/// The firmware release gates the whole control surface: an empty string or
/// the all-zero sentinel means the PMUc is not reachable.
pub fn firmware_available(version: &str) -> bool {
    let version = version.trim();
    !version.is_empty() && version != FIRMWARE_SENTINEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_int_tolerates_trailing_newline() {
        assert_eq!(parse_raw_int("120\n"), Ok(120));
        assert_eq!(parse_raw_int("  -5 "), Ok(-5));
    }

    #[test]
    fn raw_int_rejects_garbage() {
        assert!(matches!(parse_raw_int(""), Err(DecodeError::NotAnInteger(_))));
        assert!(matches!(parse_raw_int("12.5"), Err(DecodeError::NotAnInteger(_))));
        assert!(matches!(parse_raw_int("abc"), Err(DecodeError::NotAnInteger(_))));
    }

    #[test]
    fn raw_byte_rejects_out_of_range() {
        assert_eq!(parse_raw_byte("255"), Ok(255));
        assert_eq!(parse_raw_byte("256"), Err(DecodeError::OutOfByteRange(256)));
        assert_eq!(parse_raw_byte("-1"), Err(DecodeError::OutOfByteRange(-1)));
    }

    #[test]
    fn firmware_sentinel_is_unavailable() {
        assert!(!firmware_available(""));
        assert!(!firmware_available("  \n"));
        assert!(!firmware_available("00-00-00\n"));
        assert!(firmware_available("01-04-02\n"));
    }
}
