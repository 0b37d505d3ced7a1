use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Subscription bookkeeping shared by every synchronizer.
///
/// Each `begin` opens a new generation and cancels the previous pump task.
/// State updates go through [`Lifecycle::apply`], which holds the same lock
/// as [`Lifecycle::end`]; once `end` returns, no update from an older
/// generation can land.
#[derive(Default)]
pub struct Lifecycle {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    generation: u64,
    active: bool,
    task: Option<JoinHandle<()>>,
}

impl Lifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking `apply` closure cannot leave `Inner` half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a new generation, replacing any subscription still running.
    pub fn begin(&self) -> u64 {
        let mut inner = self.lock();
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.generation += 1;
        inner.active = true;
        inner.generation
    }

    /// Hand the pump task for `generation` over to the lifecycle. A task for a
    /// generation that already ended is aborted on the spot.
    pub fn attach(&self, generation: u64, task: JoinHandle<()>) {
        let mut inner = self.lock();
        if inner.active && inner.generation == generation {
            inner.task = Some(task);
        } else {
            task.abort();
        }
    }

    /// Run `f` only if `generation` is still the live one.
    pub fn apply<R>(&self, generation: u64, f: impl FnOnce() -> R) -> Option<R> {
        let inner = self.lock();
        if inner.active && inner.generation == generation {
            Some(f())
        } else {
            None
        }
    }

    /// Tear down the current subscription. Safe to call any number of times;
    /// returns whether a subscription was live.
    pub fn end(&self) -> bool {
        let mut inner = self.lock();
        let was_active = inner.active;
        inner.active = false;
        inner.generation += 1;
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        was_active
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Start a generation fed by a watch receiver, calling `on_item` for every
    /// notification until the generation ends or the watch closes. The pump
    /// only holds a weak reference, so dropping the owner releases the watch.
    pub fn run<T, F>(self: &Arc<Self>, mut rx: mpsc::Receiver<T>, mut on_item: F)
    where
        T: Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let generation = self.begin();
        let lifecycle: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let Some(lifecycle) = lifecycle.upgrade() else {
                    break;
                };
                if lifecycle.apply(generation, || on_item(item)).is_none() {
                    break;
                }
            }
        });
        self.attach(generation, task);
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if let Some(task) = self.lock().task.take() {
            task.abort();
        }
    }
}
