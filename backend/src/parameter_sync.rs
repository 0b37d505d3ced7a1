use crate::error::SyncError;
use crate::lifecycle::Lifecycle;
use crate::resource::Resource;
use pmuc_shared::{parse_raw_int, ScaledParameter};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// What the device last confirmed, and what the input field shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterState {
    pub committed: Option<f64>,
    pub draft: String,
}

/// Keeps one scaled device attribute and its input field in step.
///
/// The device always wins: a notification carrying a new value overwrites
/// both the committed value and the draft, dropping whatever the user was
/// typing. Notifications repeating the committed value leave the draft alone.
pub struct ParameterSync {
    descriptor: Arc<ScaledParameter>,
    resource: Arc<dyn Resource>,
    state: Arc<watch::Sender<ParameterState>>,
    lifecycle: Arc<Lifecycle>,
}

impl ParameterSync {
    pub fn new(descriptor: ScaledParameter, resource: Arc<dyn Resource>) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            resource,
            state: Arc::new(watch::Sender::new(ParameterState::default())),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn descriptor(&self) -> &ScaledParameter {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn activate(&self) -> Result<(), SyncError> {
        let rx = self.resource.subscribe()?;
        let descriptor = Arc::clone(&self.descriptor);
        let state = Arc::clone(&self.state);
        self.lifecycle.run(rx, move |raw: String| {
            reconcile(&descriptor, &state, &raw);
        });
        info!("watching parameter {}", self.descriptor.name);
        Ok(())
    }

    pub fn deactivate(&self) {
        if self.lifecycle.end() {
            debug!("stopped watching parameter {}", self.descriptor.name);
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }

    /// Keystroke in the input field. Only the draft changes.
    pub fn on_user_input(&self, text: &str) -> Result<(), SyncError> {
        if !ScaledParameter::draft_is_well_formed(text) {
            return Err(SyncError::InvalidDraft {
                name: self.descriptor.name.clone(),
                text: text.to_string(),
            });
        }
        self.state.send_modify(|s| s.draft = text.to_string());
        Ok(())
    }

    /// Write `value` to the device. Local state is untouched; the watch
    /// reports the outcome. Returns the raw integer that was written.
    pub fn commit(&self, value: f64) -> Result<i64, SyncError> {
        let p = &self.descriptor;
        if !p.contains(value) {
            return Err(SyncError::OutOfRange {
                name: p.name.clone(),
                value,
                min: p.min,
                max: p.max,
            });
        }
        let raw = p.to_raw(value);
        info!("{} <- {raw} ({value})", p.name);
        self.resource.write(raw.to_string());
        Ok(raw)
    }

    /// Commit whatever the input field currently holds (blur or submit).
    pub fn commit_draft(&self) -> Result<i64, SyncError> {
        let draft = self.state.borrow().draft.clone();
        let value = draft
            .parse::<f64>()
            .map_err(|_| SyncError::InvalidDraft {
                name: self.descriptor.name.clone(),
                text: draft.clone(),
            })?;
        self.commit(value)
    }

    pub fn state(&self) -> ParameterState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ParameterState> {
        self.state.subscribe()
    }

    #[cfg(test)]
    fn observe(&self, raw: &str) -> bool {
        reconcile(&self.descriptor, &self.state, raw)
    }
}

/// Apply one watch payload. Returns whether the state changed.
fn reconcile(descriptor: &ScaledParameter, state: &watch::Sender<ParameterState>, raw: &str) -> bool {
    let raw_int = match parse_raw_int(raw) {
        Ok(v) => v,
        Err(e) => {
            debug!("ignoring {} notification: {e}", descriptor.name);
            return false;
        }
    };
    let value = descriptor.from_raw(raw_int);

    state.send_if_modified(|s| {
        if s.committed == Some(value) {
            return false;
        }
        debug!("{} changed {:?} -> {value}", descriptor.name, s.committed);
        s.committed = Some(value);
        s.draft = value.to_string();
        true
    })
}
