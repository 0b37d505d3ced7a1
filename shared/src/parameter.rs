use serde::{Deserialize, Serialize};

/// Granularity of every editable parameter field.
pub const INPUT_STEP: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterCategory {
    Voltage,
    Timeout,
}

/// A device attribute holding `value * scale` as decimal text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaledParameter {
    /// Attribute file name, unique per device.
    pub name: String,
    pub label: String,
    pub category: ParameterCategory,
    pub min: f64,
    pub max: f64,
    pub scale: u32,
    /// Suggested values offered next to the input field.
    #[serde(default)]
    pub presets: Vec<f64>,
}

impl ScaledParameter {
    pub fn new(
        name: &str,
        label: &str,
        category: ParameterCategory,
        min: f64,
        max: f64,
        scale: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            category,
            min,
            max,
            scale,
            presets: Vec::new(),
        }
    }

    pub fn with_presets(mut self, presets: &[f64]) -> Self {
        self.presets = presets.to_vec();
        self
    }

    pub fn to_raw(&self, value: f64) -> i64 {
        (value * f64::from(self.scale)).round() as i64
    }

    pub fn from_raw(&self, raw: i64) -> f64 {
        raw as f64 / f64::from(self.scale)
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("parameter name must not be empty".to_string());
        }
        if self.scale == 0 {
            return Err(format!("parameter {} has a zero scale factor", self.name));
        }
        if !(self.min.is_finite() && self.max.is_finite()) || self.min > self.max {
            return Err(format!(
                "parameter {} has an invalid range [{}, {}]",
                self.name, self.min, self.max
            ));
        }
        Ok(())
    }

    /// Whether `text` is something a numeric input field could hold while the
    /// user is still typing: empty, a lone sign, or digits with at most one
    /// decimal point.
    pub fn draft_is_well_formed(text: &str) -> bool {
        let body = text.strip_prefix('-').unwrap_or(text);
        let mut seen_point = false;
        for c in body.chars() {
            match c {
                '0'..='9' => {}
                '.' if !seen_point => seen_point = true,
                _ => return false,
            }
        }
        true
    }
}

/// The six tunables exposed by the PMUc driver.
pub fn default_parameters() -> Vec<ScaledParameter> {
    use ParameterCategory::{Timeout, Voltage};

    vec![
        ScaledParameter::new("power_voltage_nominal", "Nominal power supply", Voltage, 6.0, 32.0, 10)
            .with_presets(&[12.0, 24.0]),
        ScaledParameter::new("power_voltage_min", "Minimum input voltage", Voltage, 6.0, 32.0, 10),
        ScaledParameter::new("capacitor_voltage_min", "Minimum capacitor level", Voltage, 6.0, 14.0, 10)
            .with_presets(&[8.7, 12.8]),
        ScaledParameter::new("battery_voltage_min", "Minimum battery level", Voltage, 6.0, 14.0, 10)
            .with_presets(&[11.5]),
        ScaledParameter::new("switching_voltage_min", "Regulator input cutoff", Voltage, 5.2, 32.0, 10),
        ScaledParameter::new("switching_timeout", "Shutdown timeout", Timeout, 10.0, 9999.0, 10),
    ]
}
