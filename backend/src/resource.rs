use crate::error::SyncError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

const WATCH_QUEUE: usize = 16;

// ======================================================================
//  Resource Trait
// ======================================================================
/// An externally owned piece of device state holding decimal text.
pub trait Resource: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn read(&self) -> Result<String, SyncError>;

    /// Start a watch. The receiver yields the current contents and then the
    /// new contents after every change; dropping it ends the watch.
    fn subscribe(&self) -> Result<mpsc::Receiver<String>, SyncError>;

    /// Replace the contents. Fire-and-forget: failures are logged, never
    /// retried and never reported to the caller.
    fn write(&self, contents: String);
}

// ======================================================================
//  Writers
// ======================================================================
pub trait Writer: Send + Sync + 'static {
    fn write(&self, path: &Path, contents: String);
}

/// Writes through `tee`, optionally behind a privilege prefix such as
/// `sudo -n`. The driver only accepts writes from root.
///
/// Callers never wait on a write, but the writer keeps every `tee` it
/// started so [`PrivilegedWriter::flush`] can let them finish before exit.
#[derive(Debug, Default)]
pub struct PrivilegedWriter {
    prefix: Vec<String>,
    pending: Mutex<JoinSet<()>>,
}

impl PrivilegedWriter {
    pub fn new(prefix: Vec<String>) -> Self {
        Self {
            prefix,
            pending: Mutex::default(),
        }
    }

    /// Wait for every write started so far.
    pub async fn flush(&self) {
        let mut pending = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!("write task failed: {e}");
            }
        }
    }

    fn argv(&self, path: &Path) -> Vec<String> {
        let mut argv = self.prefix.clone();
        argv.push("tee".to_string());
        argv.push(path.display().to_string());
        argv
    }
}

impl Writer for PrivilegedWriter {
    fn write(&self, path: &Path, contents: String) {
        let argv = self.argv(path);
        let path = path.to_path_buf();
        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while pending.try_join_next().is_some() {}
        pending.spawn(async move {
            if let Err(e) = run_tee(&argv, contents.as_bytes()).await {
                warn!("write of {contents:?} to {} failed: {e}", path.display());
            }
        });
    }
}

/// The child is not killed if this future is dropped: a `tee` that has
/// been started always gets to finish its write.
async fn run_tee(argv: &[String], input: &[u8]) -> anyhow::Result<()> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("empty write command"))?;
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input).await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        anyhow::bail!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

// ======================================================================
//  Device attribute file
// ======================================================================
/// One attribute file of the PMUc driver. Sysfs attributes never raise
/// inotify events, so watches poll and deliver on content change.
pub struct DeviceFile {
    name: String,
    path: PathBuf,
    poll_interval: Duration,
    writer: Arc<dyn Writer>,
}

impl DeviceFile {
    pub fn new(path: PathBuf, poll_interval: Duration, writer: Arc<dyn Writer>) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            path,
            poll_interval,
            writer,
        }
    }
}

impl Resource for DeviceFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> Result<String, SyncError> {
        std::fs::read_to_string(&self.path).map_err(|source| SyncError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<String>, SyncError> {
        if !self.path.exists() {
            return Err(SyncError::Unavailable(format!(
                "{} does not exist",
                self.path.display()
            )));
        }
        let (tx, rx) = mpsc::channel(WATCH_QUEUE);
        tokio::spawn(poll_file(self.path.clone(), self.poll_interval, tx));
        Ok(rx)
    }

    fn write(&self, contents: String) {
        debug!("writing {contents:?} to {}", self.name);
        self.writer.write(&self.path, contents);
    }
}

async fn poll_file(path: PathBuf, period: Duration, tx: mpsc::Sender<String>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last: Option<String> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tx.closed() => break,
        }

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) => {
                debug!("poll of {} failed: {e}", path.display());
                continue;
            }
        };
        if last.as_deref() == Some(contents.as_str()) {
            continue;
        }
        if tx.send(contents.clone()).await.is_err() {
            break;
        }
        last = Some(contents);
    }
}

// ======================================================================
//  In-memory resource (tests)
// ======================================================================
#[cfg(test)]
pub use memory::MemoryResource;


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    const FAST_POLL: Duration = Duration::from_millis(10);

    async fn next(rx: &mut mpsc::Receiver<String>) -> String {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watch timed out")
            .expect("watch closed")
    }

    #[test]
    fn privilege_prefix_goes_before_tee() {
        let writer = PrivilegedWriter::new(vec!["sudo".into(), "-n".into()]);
        assert_eq!(
            writer.argv(Path::new("/sys/kernel/wp360-pmuc/port_poweroff")),
            vec!["sudo", "-n", "tee", "/sys/kernel/wp360-pmuc/port_poweroff"]
        );
    }

    #[tokio::test]
    async fn watch_delivers_initial_and_changed_contents_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("power_voltage_min");
        std::fs::write(&path, "115\n").unwrap();

        let file = DeviceFile::new(path.clone(), FAST_POLL, Arc::new(PrivilegedWriter::default()));
        assert_eq!(file.name(), "power_voltage_min");
        let mut rx = file.subscribe().unwrap();
        assert_eq!(next(&mut rx).await, "115\n");

        // Unchanged polls stay silent
        tokio::time::sleep(FAST_POLL * 5).await;
        assert!(rx.try_recv().is_err());

        std::fs::write(&path, "120\n").unwrap();
        assert_eq!(next(&mut rx).await, "120\n");
    }

    #[tokio::test]
    async fn missing_file_cannot_be_watched() {
        let dir = tempfile::tempdir().unwrap();
        let file = DeviceFile::new(
            dir.path().join("program_version"),
            FAST_POLL,
            Arc::new(PrivilegedWriter::default()),
        );
        assert!(matches!(file.subscribe(), Err(SyncError::Unavailable(_))));
        assert!(matches!(file.read(), Err(SyncError::Io { .. })));
    }

    #[tokio::test]
    async fn tee_write_is_observed_by_watch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program_version");
        std::fs::write(&path, "16").unwrap();

        let file = DeviceFile::new(path, FAST_POLL, Arc::new(PrivilegedWriter::default()));
        let mut rx = file.subscribe().unwrap();
        assert_eq!(next(&mut rx).await, "16");

        file.write("33".to_string());
        assert_eq!(next(&mut rx).await, "33");
    }

    #[tokio::test]
    async fn failed_write_leaves_the_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program_version");
        std::fs::write(&path, "16").unwrap();

        let writer = Arc::new(PrivilegedWriter::new(vec!["false".into()]));
        let file = DeviceFile::new(path.clone(), FAST_POLL, writer.clone());
        file.write("33".to_string());
        timeout(Duration::from_secs(5), writer.flush()).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "16");
        assert!(writer.pending.lock().unwrap().is_empty());
    }

    /// A prefix that stalls before handing over to `tee`, like a slow `sudo`.
    fn slow_writer() -> Arc<PrivilegedWriter> {
        Arc::new(PrivilegedWriter::new(vec![
            "sh".into(),
            "-c".into(),
            r#"sleep 0.2; exec "$0" "$@""#.into(),
        ]))
    }

    #[tokio::test]
    async fn flush_waits_for_slow_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switching_timeout");
        std::fs::write(&path, "300").unwrap();

        let writer = slow_writer();
        let file = DeviceFile::new(path.clone(), FAST_POLL, writer.clone());
        file.write("450".to_string());
        timeout(Duration::from_secs(5), writer.flush()).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "450");
    }

    #[test]
    fn started_write_survives_runtime_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program_version");
        std::fs::write(&path, "16").unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let file = DeviceFile::new(path.clone(), FAST_POLL, slow_writer());
            file.write("33".to_string());
            // Let the task start the child, then abandon it mid-write
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        drop(runtime);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::fs::read_to_string(&path).unwrap() != "33" {
            assert!(std::time::Instant::now() < deadline, "write was lost");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[tokio::test]
    async fn memory_resource_tracks_watches() {
        let resource = MemoryResource::with_contents("port_poweroff", "7");
        let mut rx = resource.subscribe().unwrap();
        assert_eq!(next(&mut rx).await, "7");
        resource.push("15");
        assert_eq!(next(&mut rx).await, "15");
        assert_eq!(resource.live_watches(), 1);
        drop(rx);
        assert_eq!(resource.live_watches(), 0);

        resource.write("3".to_string());
        assert_eq!(resource.writes(), vec!["3"]);
    }
}
