// main.rs

mod config;
mod console;
mod device;
mod error;
mod lifecycle;
mod mode_sync;
mod parameter_sync;
mod port_sync;
mod resource;
mod session;
mod telemetry_task;

use crate::config::{load_parameters, DeviceConfig};
use crate::device::Device;
use crate::error::SyncError;
use crate::session::Session;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const UNAVAILABLE_NOTICE: &str = "Something went wrong; power settings are unavailable, and the system \
might be abruptly shut down in case of a power outage. Reboot this device.";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = DeviceConfig::from_env();
    let parameters = load_parameters(&config.parameters_path)?;
    info!(
        "using {} with {} parameters",
        config.device_dir.display(),
        parameters.len()
    );

    let device = Device::new(&config);
    let session = match Session::open(device.resources(parameters)) {
        Ok(session) => session,
        Err(e @ SyncError::Unavailable(_)) => {
            error!("{e}");
            eprintln!("{UNAVAILABLE_NOTICE}");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    let result = console::run(session).await;
    device.flush_writes().await;
    result
}
