//! Teardown handles
//!
//! A `Lifespan` ends exactly once. Containers that cache state register a
//! callback so they stop tracking their sources when the scope that created
//! them is torn down.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct LifespanInner {
    ended: AtomicBool,
    on_end: Mutex<Vec<Callback>>,
}

/// Shared teardown handle
#[derive(Clone, Default)]
pub struct Lifespan {
    inner: Arc<LifespanInner>,
}

impl Lifespan {
    /// Create a lifespan that has not ended
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `end()` has been called
    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
    }

    /// Register a callback to run when the lifespan ends
    ///
    /// Runs immediately if the lifespan has already ended.
    pub fn on_end(&self, callback: impl FnOnce() + Send + 'static) {
        let mut callbacks = self.inner.on_end.lock();
        if self.is_ended() {
            drop(callbacks);
            callback();
        } else {
            callbacks.push(Box::new(callback));
        }
    }

    /// End the lifespan, running every registered callback once
    pub fn end(&self) {
        let callbacks = {
            let mut callbacks = self.inner.on_end.lock();
            if self.inner.ended.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *callbacks)
        };
        tracing::trace!(count = callbacks.len(), "lifespan ended");
        for callback in callbacks {
            callback();
        }
    }

    /// Create a lifespan that ends when this one does (or earlier)
    pub fn child(&self) -> Lifespan {
        let child = Lifespan::new();
        let ender = child.clone();
        self.on_end(move || ender.end());
        child
    }
}

impl fmt::Debug for Lifespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifespan")
            .field("ended", &self.is_ended())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_end_runs_callbacks_once() {
        let lifespan = Lifespan::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        lifespan.on_end(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        lifespan.end();
        lifespan.end();
        assert!(lifespan.is_ended());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_end_after_end_runs_immediately() {
        let lifespan = Lifespan::new();
        lifespan.end();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        lifespan.on_end(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_child_ends_with_parent() {
        let parent = Lifespan::new();
        let child = parent.child();
        assert!(!child.is_ended());
        parent.end();
        assert!(child.is_ended());
    }
}
