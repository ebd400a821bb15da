//! Release-once bookkeeping for engine handles.
//!
//! Every persistent engine handle the crate creates lives in a
//! [`TrackedHandle`], which registers itself with its isolate's
//! [`LifetimeRegistry`]. A handle is released either by its owner (value
//! dropped, template dropped, context closed) or by the isolate's disposal,
//! whichever comes first; the other path then finds it already empty.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use deno_core::v8;

/// A native resource that can be released exactly once.
pub(crate) trait Releasable {
    /// Free the native resource. Returns false if it was already released.
    fn release(&self) -> bool;
}

/// A persistent handle owned on the Rust side.
pub(crate) struct TrackedHandle<T> {
    global: RefCell<Option<v8::Global<T>>>,
}

impl<T: 'static> TrackedHandle<T> {
    /// Wrap a persistent handle and register it for bulk release.
    pub fn new(registry: &LifetimeRegistry, global: v8::Global<T>) -> Rc<Self> {
        let handle = Rc::new(Self {
            global: RefCell::new(Some(global)),
        });
        registry.track(handle.clone());
        handle
    }

    /// Materialize the handle in `scope`.
    ///
    /// Panics if the handle was released: the caller is holding a wrapper
    /// whose native object is gone.
    pub fn local<'s>(&self, scope: &mut v8::HandleScope<'s, ()>) -> v8::Local<'s, T> {
        let global = self.global.borrow();
        match global.as_ref() {
            Some(global) => v8::Local::new(scope, global),
            None => panic!("handle has been released"),
        }
    }

    pub fn is_released(&self) -> bool {
        self.global.borrow().is_none()
    }
}

impl<T> Releasable for TrackedHandle<T> {
    fn release(&self) -> bool {
        let global = self.global.borrow_mut().take();
        global.is_some()
    }
}

/// Number of registrations between sweeps of dead entries.
const SWEEP_INTERVAL: usize = 1024;

/// Weak list of every handle issued against one isolate.
#[derive(Default)]
pub(crate) struct LifetimeRegistry {
    handles: RefCell<Vec<Weak<dyn Releasable>>>,
    since_sweep: Cell<usize>,
}

impl LifetimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, handle: Rc<dyn Releasable>) {
        let mut handles = self.handles.borrow_mut();
        let since_sweep = self.since_sweep.get() + 1;
        if since_sweep >= SWEEP_INTERVAL {
            handles.retain(|h| h.strong_count() > 0);
            self.since_sweep.set(0);
        } else {
            self.since_sweep.set(since_sweep);
        }
        handles.push(Rc::downgrade(&handle));
    }

    /// Handles that are still registered and not yet released by their owner.
    pub fn live_count(&self) -> usize {
        self.handles
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .count()
    }

    /// Release every registered handle. Returns how many were still live.
    pub fn release_all(&self) -> usize {
        let handles = std::mem::take(&mut *self.handles.borrow_mut());
        self.since_sweep.set(0);
        handles
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|h| h.release())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counted {
        released: Cell<bool>,
        count: Rc<Cell<usize>>,
    }

    impl Counted {
        fn new(count: &Rc<Cell<usize>>) -> Rc<Self> {
            Rc::new(Self {
                released: Cell::new(false),
                count: count.clone(),
            })
        }
    }

    impl Releasable for Counted {
        fn release(&self) -> bool {
            if self.released.replace(true) {
                return false;
            }
            self.count.set(self.count.get() + 1);
            true
        }
    }

    #[test]
    fn test_release_all_frees_live_handles_once() {
        let count = Rc::new(Cell::new(0));
        let registry = LifetimeRegistry::new();
        let a = Counted::new(&count);
        let b = Counted::new(&count);
        registry.track(a.clone());
        registry.track(b.clone());

        // Owner released `a` first; disposal must not count it again.
        assert!(a.release());
        assert_eq!(registry.release_all(), 1);
        assert_eq!(count.get(), 2);
        assert!(!b.release());
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_dropped_handles_are_skipped() {
        let count = Rc::new(Cell::new(0));
        let registry = LifetimeRegistry::new();
        {
            let gone = Counted::new(&count);
            registry.track(gone);
        }
        let kept = Counted::new(&count);
        registry.track(kept.clone());

        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.release_all(), 1);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_sweep_bounds_registry_growth() {
        let count = Rc::new(Cell::new(0));
        let registry = LifetimeRegistry::new();
        for _ in 0..(SWEEP_INTERVAL * 3) {
            registry.track(Counted::new(&count));
        }
        assert!(registry.handles.borrow().len() <= SWEEP_INTERVAL);
    }
}
