use crate::DecodeError;
use serde::{Deserialize, Serialize};

/// Every telemetry attribute is reported in tenths.
pub const TELEMETRY_SCALE: f64 = 10.0;

/// One line emitted by the polling script, straight from the driver.
#[derive(Debug, Deserialize)]
struct RawTelemetry {
    power_voltage: i64,
    capacitor_voltage: i64,
    switching_voltage: i64,
    pmuc_temperature: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    /// Volts at the power supply input.
    pub power_voltage: f64,
    /// Volts across the supercapacitor bank or external battery.
    pub capacitor_voltage: f64,
    /// Volts at the regulator input.
    pub switching_voltage: f64,
    /// Degrees Celsius.
    pub pmuc_temperature: f64,
}

impl TelemetryReading {
    pub fn parse_line(line: &str) -> Result<Self, DecodeError> {
        let raw: RawTelemetry = serde_json::from_str(line.trim())
            .map_err(|e| DecodeError::MalformedTelemetry(e.to_string()))?;
        Ok(Self {
            power_voltage: raw.power_voltage as f64 / TELEMETRY_SCALE,
            capacitor_voltage: raw.capacitor_voltage as f64 / TELEMETRY_SCALE,
            switching_voltage: raw.switching_voltage as f64 / TELEMETRY_SCALE,
            pmuc_temperature: raw.pmuc_temperature as f64 / TELEMETRY_SCALE,
        })
    }
}
