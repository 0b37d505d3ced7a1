use crate::error::SyncError;
use crate::lifecycle::Lifecycle;
use crate::resource::Resource;
use pmuc_shared::{parse_raw_byte, PortState};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Mirrors `port_poweroff`. Toggles are written straight to the device and
/// the displayed state only moves when the watch reports the new byte.
pub struct PortSync {
    resource: Arc<dyn Resource>,
    state: Arc<watch::Sender<Option<PortState>>>,
    lifecycle: Arc<Lifecycle>,
}

impl PortSync {
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

    /// Flip one port's power-off flag. Returns the byte that was written.
    pub fn toggle(&self, index: usize) -> Result<u8, SyncError> {
        let current = (*self.state.borrow()).ok_or(SyncError::NotReady("port_poweroff"))?;
        let next = current.toggled(index).ok_or(SyncError::InvalidPort(index))?;
        let byte = next.encode();
        info!("port {index} power-off -> {} (0x{byte:02x})", next.off[index]);
        self.resource.write(byte.to_string());
        Ok(byte)
    }

    pub fn state(&self) -> Option<PortState> {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<Option<PortState>> {
        self.state.subscribe()
    }
}

fn observe(state: &watch::Sender<Option<PortState>>, raw: &str) -> bool {
    let byte = match parse_raw_byte(raw) {
        Ok(byte) => byte,
        Err(e) => {
            debug!("ignoring port_poweroff notification: {e}");
            return false;
        }
    };
    let decoded = PortState::decode(byte);
    state.send_if_modified(|s| {
        if *s == Some(decoded) {
            return false;
        }
        *s = Some(decoded);
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MemoryResource;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn settled(sync: &PortSync, byte: u8) {
        let mut rx = sync.subscribe_state();
        timeout(Duration::from_secs(5), rx.wait_for(|s| *s == Some(PortState::decode(byte))))
            .await
            .expect("ports never settled")
            .expect("sender dropped");
    }

    #[tokio::test]
    async fn toggle_writes_without_touching_local_state() {
        let resource = MemoryResource::with_contents("port_poweroff", "7\n");
        let sync = PortSync::new(resource.clone());
        sync.activate().unwrap();
        settled(&sync, 0x07).await;

        let state = sync.state().unwrap();
        assert_eq!(state.off, [true, true, true, false]);
        assert!(!state.active_high);

        assert_eq!(sync.toggle(3).unwrap(), 0x0F);
        assert_eq!(resource.writes(), vec!["15"]);
        assert_eq!(sync.state(), Some(PortState::decode(0x07)));

        resource.push("15\n");
        settled(&sync, 0x0F).await;
    }

    #[tokio::test]
    async fn polarity_is_carried_through_toggles() {
        let resource = MemoryResource::with_contents("port_poweroff", "129");
        let sync = PortSync::new(resource.clone());
        sync.activate().unwrap();
        settled(&sync, 0x81).await;
        assert_eq!(sync.toggle(1).unwrap(), 0x83);
    }

    #[test]
    fn toggle_before_first_read_is_refused() {
        let resource = MemoryResource::new("port_poweroff");
        let sync = PortSync::new(resource.clone());
        assert!(matches!(sync.toggle(0), Err(SyncError::NotReady(_))));
        assert!(resource.writes().is_empty());
    }

    #[test]
    fn bad_index_and_bad_payload() {
        let resource = MemoryResource::new("port_poweroff");
        let sync = PortSync::new(resource.clone());
        assert!(observe(&sync.state, "7"));
        assert!(!observe(&sync.state, "7"));
        assert!(!observe(&sync.state, "garbage"));
        assert!(!observe(&sync.state, "300"));
        assert_eq!(sync.state(), Some(PortState::decode(7)));
        assert!(matches!(sync.toggle(4), Err(SyncError::InvalidPort(4))));
        assert!(resource.writes().is_empty());
    }

    #[tokio::test]
    async fn dropping_an_active_sync_releases_the_watch() {
        let resource = MemoryResource::with_contents("port_poweroff", "7");
        let sync = PortSync::new(resource.clone());
        sync.activate().unwrap();
        settled(&sync, 0x07).await;
        assert_eq!(resource.live_watches(), 1);

        drop(sync);
        timeout(Duration::from_secs(5), async {
            while resource.live_watches() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("watch outlived the synchronizer");
    }

    #[tokio::test]
    async fn deactivate_without_activate_is_harmless() {
        let sync = PortSync::new(MemoryResource::new("port_poweroff"));
        sync.deactivate();
        sync.activate().unwrap();
        sync.deactivate();
        sync.deactivate();
        assert!(!sync.is_active());
    }
}
