use crate::error::SyncError;
use crate::lifecycle::Lifecycle;
use crate::resource::Resource;
use pmuc_shared::{parse_raw_byte, ModeFlag, UpsMode};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Mirrors `program_version`: UPS mode in the high nibble, forced watchdog
/// reboot in bit 0.
///
/// Both setters build on the last decoded byte. Two quick writes can race;
/// the next watch notification settles it.
pub struct ModeSync {
    resource: Arc<dyn Resource>,
    state: Arc<watch::Sender<Option<ModeFlag>>>,
    lifecycle: Arc<Lifecycle>,
}

impl ModeSync {
    pub fn new(resource: Arc<dyn Resource>) -> Self {
        Self {
            resource,
            state: Arc::new(watch::Sender::new(None)),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn activate(&self) -> Result<(), SyncError> {
        let rx = self.resource.subscribe()?;
        let state = Arc::clone(&self.state);
        self.lifecycle.run(rx, move |raw: String| {
            observe(&state, &raw);
        });
        info!("watching {}", self.resource.name());
        Ok(())
    }

    pub fn deactivate(&self) {
        if self.lifecycle.end() {
            debug!("stopped watching {}", self.resource.name());
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }

    pub fn select_mode(&self, mode: UpsMode) -> Result<u8, SyncError> {
        let next = self.current()?.with_mode(mode);
        info!("UPS mode -> {}", mode.label());
        Ok(self.write(next))
    }

    pub fn set_forced(&self, forced: bool) -> Result<u8, SyncError> {
        let next = self.current()?.with_forced(forced);
        info!("watchdog forced reboot -> {forced}");
        Ok(self.write(next))
    }

    pub fn state(&self) -> Option<ModeFlag> {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<Option<ModeFlag>> {
        self.state.subscribe()
    }

    fn current(&self) -> Result<ModeFlag, SyncError> {
        (*self.state.borrow()).ok_or(SyncError::NotReady("program_version"))
    }

    fn write(&self, next: ModeFlag) -> u8 {
        let byte = next.encode();
        self.resource.write(byte.to_string());
        byte
    }
}

fn observe(state: &watch::Sender<Option<ModeFlag>>, raw: &str) -> bool {
    let decoded = match parse_raw_byte(raw).and_then(ModeFlag::decode) {
        Ok(flag) => flag,
        Err(e) => {
            debug!("ignoring program_version notification: {e}");
            return false;
        }
    };
    state.send_if_modified(|s| {
        if *s == Some(decoded) {
            return false;
        }
        *s = Some(decoded);
        true
    })
}
