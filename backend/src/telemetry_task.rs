use crate::error::SyncError;
use crate::lifecycle::Lifecycle;
use pmuc_shared::TelemetryReading;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Program and arguments of the polling script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ScriptCommand {
    pub fn shell(script: String) -> Self {
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script],
        }
    }
}

/// Reads one JSON object per line from the polling script and keeps the
/// latest reading.
pub struct TelemetryReader {
    command: ScriptCommand,
    state: Arc<watch::Sender<Option<TelemetryReading>>>,
    lifecycle: Arc<Lifecycle>,
    child: Mutex<Option<Child>>,
}

impl TelemetryReader {
    pub fn new(command: ScriptCommand) -> Self {
        Self {
            command,
            state: Arc::new(watch::Sender::new(None)),
            lifecycle: Lifecycle::new(),
            child: Mutex::new(None),
        }
    }

    /// Launch the script. A launch failure is returned to the caller and
    /// nothing is retried.
    pub fn activate(&self) -> Result<(), SyncError> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SyncError::Spawn {
                program: self.command.program.clone(),
                source,
            })?;
        let stdout = child.stdout.take().ok_or_else(|| SyncError::Spawn {
            program: self.command.program.clone(),
            source: ErrorKind::BrokenPipe.into(),
        })?;

        let generation = self.lifecycle.begin();
        if let Some(mut previous) = self.replace_child(Some(child)) {
            let _ = previous.start_kill();
        }
        let task = tokio::spawn(read_lines(
            stdout,
            Arc::clone(&self.lifecycle),
            generation,
            Arc::clone(&self.state),
        ));
        self.lifecycle.attach(generation, task);
        info!("telemetry script started");
        Ok(())
    }

    /// Stop the script. No reading is applied after this returns.
    pub fn deactivate(&self) {
        let was_active = self.lifecycle.end();
        if let Some(mut child) = self.replace_child(None) {
            let _ = child.start_kill();
        }
        if was_active {
            debug!("telemetry script stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }

    pub fn reading(&self) -> Option<TelemetryReading> {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<Option<TelemetryReading>> {
        self.state.subscribe()
    }

    fn replace_child(&self, child: Option<Child>) -> Option<Child> {
        let mut guard = self.child.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::replace(&mut *guard, child)
    }
}

impl Drop for TelemetryReader {
    fn drop(&mut self) {
        self.deactivate();
    }
}

async fn read_lines(
    stdout: ChildStdout,
    lifecycle: Arc<Lifecycle>,
    generation: u64,
    state: Arc<watch::Sender<Option<TelemetryReading>>>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                debug!("skipping non UTF-8 telemetry line");
                continue;
            }
            Err(e) => {
                warn!("telemetry pipe failed: {e}");
                break;
            }
        };
        if lifecycle.apply(generation, || observe(&state, &line)).is_none() {
            return;
        }
    }
    if lifecycle.apply(generation, || ()).is_some() {
        warn!("telemetry script exited");
    }
}

/// Apply one script line. Truncated or malformed lines are normal (the
/// script can be caught mid-write) and leave the previous reading in place.
fn observe(state: &watch::Sender<Option<TelemetryReading>>, line: &str) -> bool {
    match TelemetryReading::parse_line(line) {
        Ok(reading) => {
            state.send_replace(Some(reading));
            true
        }
        Err(e) => {
            debug!("{e}");
            false
        }
    }
}
