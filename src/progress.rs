use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::types::ProgressEvent;

/// Single-slot, latest-wins progress channel.
///
/// Publishing overwrites any event that has not been read yet, and reading
/// never blocks. An observer polling slower than the Refresher publishes
/// therefore only ever sees the most recent state.
#[derive(Debug, Clone, Default)]
pub struct ProgressSlot {
    slot: Arc<Mutex<Option<ProgressEvent>>>,
}

impl ProgressSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: ProgressEvent) {
        *self.slot.lock() = Some(event);
    }

    /// Takes the latest unread event, or `None` if nothing new was published
    /// since the last read.
    pub fn try_recv(&self) -> Option<ProgressEvent> {
        self.slot.lock().take()
    }
}

/// Cooperative cancellation request shared between a Refresher run and its
/// controller.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Calling it again, or after the run finished,
    /// has no further effect.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
