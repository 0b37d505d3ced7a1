use crate::config::DeviceConfig;
use crate::resource::{DeviceFile, PrivilegedWriter, Resource, Writer};
use crate::session::DeviceResources;
use crate::telemetry_task::ScriptCommand;
use pmuc_shared::ScaledParameter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

//####################################################################
// Attribute files exported by the wp360-pmuc driver
//####################################################################
pub const FIRMWARE_RELEASE: &str = "firmware_release";
pub const PORT_POWEROFF: &str = "port_poweroff";
pub const PROGRAM_VERSION: &str = "program_version";
pub const TELEMETRY_ATTRIBUTES: [&str; 4] = [
    "power_voltage",
    "capacitor_voltage",
    "switching_voltage",
    "pmuc_temperature",
];
//####################################################################

/// The driver's attribute directory plus the means to write to it.
pub struct Device {
    dir: PathBuf,
    poll_interval: Duration,
    telemetry_interval: Duration,
    writer: Arc<PrivilegedWriter>,
}

impl Device {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            dir: config.device_dir.clone(),
            poll_interval: config.poll_interval,
            telemetry_interval: config.telemetry_interval,
            writer: Arc::new(PrivilegedWriter::new(config.privilege_prefix.clone())),
        }
    }

    pub fn attribute(&self, name: &str) -> Arc<dyn Resource> {
        let writer: Arc<dyn Writer> = self.writer.clone();
        Arc::new(DeviceFile::new(self.dir.join(name), self.poll_interval, writer))
    }

    /// Let every write issued through this device reach the driver.
    pub async fn flush_writes(&self) {
        self.writer.flush().await;
    }

    /// Shell loop printing the four telemetry attributes as one JSON object
    /// per interval.
    pub fn telemetry_script(&self) -> ScriptCommand {
        let fields = TELEMETRY_ATTRIBUTES
            .iter()
            .map(|name| {
                let path = shell_quote(&self.dir.join(name).display().to_string());
                format!("\\\"{name}\\\": $(cat {path})")
            })
            .collect::<Vec<_>>()
            .join(", ");
        let script = format!(
            "while true\ndo\n    echo \"{{{fields}}}\"\n    sleep {}\ndone\n",
            self.telemetry_interval.as_secs_f64()
        );
        ScriptCommand::shell(script)
    }

    pub fn resources(&self, parameters: Vec<ScaledParameter>) -> DeviceResources {
        let parameters = parameters
            .into_iter()
            .map(|p| {
                let resource = self.attribute(&p.name);
                (p, resource)
            })
            .collect();
        DeviceResources {
            firmware: self.attribute(FIRMWARE_RELEASE),
            ports: self.attribute(PORT_POWEROFF),
            mode: self.attribute(PROGRAM_VERSION),
            parameters,
            telemetry: self.telemetry_script(),
        }
    }
}

fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}
