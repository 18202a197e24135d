// ============================================================================
// FRAME SCHEDULER — coalesces render requests into one render per tick
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type Waker = Arc<dyn Fn() + Send + Sync>;

/// Cloneable handle used by input handlers, texture loads and the host loop.
///
/// `request_render` only wakes the host on the first request of a tick;
/// the host calls `take_pending` once per tick and renders if it was set.
#[derive(Clone, Default)]
pub struct FrameScheduler {
    pending: Arc<AtomicBool>,
    waker: Option<Waker>,
}

impl fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("pending", &self.is_pending())
            .field("has_waker", &self.waker.is_some())
            .finish()
    }
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler that calls `waker` whenever a new frame becomes pending.
    /// The egui host passes `Context::request_repaint` here.
    pub fn with_waker(waker: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            pending: Arc::new(AtomicBool::new(false)),
            waker: Some(Arc::new(waker)),
        }
    }

    pub fn request_render(&self) {
        if !self.pending.swap(true, Ordering::AcqRel)
            && let Some(waker) = &self.waker
        {
            waker();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Consume the pending flag. Returns true when a render is due.
    pub fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn requests_coalesce_within_a_tick() {
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = wakes.clone();
        let scheduler = FrameScheduler::with_waker(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.request_render();
        scheduler.clone().request_render();
        scheduler.request_render();
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        assert!(scheduler.take_pending());
        assert!(!scheduler.take_pending());

        scheduler.request_render();
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn request_from_another_thread() {
        let scheduler = FrameScheduler::new();
        let remote = scheduler.clone();
        std::thread::spawn(move || remote.request_render()).join().unwrap();
        assert!(scheduler.is_pending());
    }
}
