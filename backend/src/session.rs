use crate::error::SyncError;
use crate::mode_sync::ModeSync;
use crate::parameter_sync::{ParameterState, ParameterSync};
use crate::port_sync::PortSync;
use crate::resource::Resource;
use crate::telemetry_task::{ScriptCommand, TelemetryReader};
use pmuc_shared::{firmware_available, ModeFlag, PortState, ScaledParameter, TelemetryReading};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything a session needs from the outside world.
pub struct DeviceResources {
    pub firmware: Arc<dyn Resource>,
    pub ports: Arc<dyn Resource>,
    pub mode: Arc<dyn Resource>,
    pub parameters: Vec<(ScaledParameter, Arc<dyn Resource>)>,
    pub telemetry: ScriptCommand,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterStatus {
    pub name: String,
    pub label: String,
    pub presets: Vec<f64>,
    #[serde(flatten)]
    pub state: ParameterState,
}

/// Point-in-time view of every synchronizer.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub firmware_version: String,
    pub telemetry_active: bool,
    pub telemetry: Option<TelemetryReading>,
    pub ports: Option<PortState>,
    pub mode: Option<ModeFlag>,
    pub parameters: Vec<ParameterStatus>,
}

/// Owns the four synchronizers for as long as the control surface is up.
/// Dropping the session releases every watch and stops the telemetry script.
pub struct Session {
    firmware_version: String,
    telemetry: TelemetryReader,
    ports: PortSync,
    mode: ModeSync,
    parameters: Vec<ParameterSync>,
    closed: bool,
}

impl Session {
    /// Check the firmware release and start every synchronizer. Nothing is
    /// left running if this returns an error.
    pub fn open(resources: DeviceResources) -> Result<Self, SyncError> {
        let version = resources
            .firmware
            .read()
            .map_err(|e| SyncError::Unavailable(format!("cannot read firmware release: {e}")))?;
        let version = version.trim().to_string();
        if !firmware_available(&version) {
            error!("PMUc reports firmware {version:?}");
            return Err(SyncError::Unavailable(format!(
                "PMUc reports firmware {version:?}"
            )));
        }
        info!("PMUc firmware {version}");

        let mut session = Session {
            firmware_version: version,
            telemetry: TelemetryReader::new(resources.telemetry),
            ports: PortSync::new(resources.ports),
            mode: ModeSync::new(resources.mode),
            parameters: resources
                .parameters
                .into_iter()
                .map(|(p, resource)| ParameterSync::new(p, resource))
                .collect(),
            closed: false,
        };

        if let Err(e) = session.activate_all() {
            session.close();
            return Err(e);
        }
        Ok(session)
    }

    fn activate_all(&self) -> Result<(), SyncError> {
        if let Err(e) = self.telemetry.activate() {
            warn!("telemetry unavailable: {e}");
        }
        self.mode.activate()?;
        for parameter in &self.parameters {
            parameter.activate()?;
        }
        self.ports.activate()?;
        Ok(())
    }

    /// Release every subscription. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.telemetry.deactivate();
        self.mode.deactivate();
        for parameter in &self.parameters {
            parameter.deactivate();
        }
        self.ports.deactivate();
        info!("session closed");
    }

    pub fn firmware_version(&self) -> &str {
        &self.firmware_version
    }

    pub fn telemetry(&self) -> &TelemetryReader {
        &self.telemetry
    }

    pub fn ports(&self) -> &PortSync {
        &self.ports
    }

    pub fn mode(&self) -> &ModeSync {
        &self.mode
    }

    pub fn parameters(&self) -> &[ParameterSync] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Result<&ParameterSync, SyncError> {
        self.parameters
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| SyncError::UnknownParameter(name.to_string()))
    }

    pub fn snapshot(&self) -> Status {
        Status {
            firmware_version: self.firmware_version.clone(),
            telemetry_active: self.telemetry.is_active(),
            telemetry: self.telemetry.reading(),
            ports: self.ports.state(),
            mode: self.mode.state(),
            parameters: self
                .parameters
                .iter()
                .map(|p| ParameterStatus {
                    name: p.name().to_string(),
                    label: p.descriptor().label.clone(),
                    presets: p.descriptor().presets.clone(),
                    state: p.state(),
                })
                .collect(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
