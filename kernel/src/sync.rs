//! Safe global initialization without `static mut`.
//!
//! Kernel singletons (scheduler, registries, VFS) are created by explicit
//! init functions during single-threaded boot and accessed through these
//! wrappers afterwards. The publish step -- making the initialized value
//! visible -- is the lock release / atomic store inside these types, so a
//! reader can never observe a half-built value.

use core::sync::atomic::{AtomicPtr, Ordering};

use spin::Mutex;

/// A cell that can be written exactly once and read as `&'static` after.
pub struct OnceCell<T> {
    inner: AtomicPtr<T>,
}

impl<T> OnceCell<T> {
    pub const fn new() -> Self {
        Self {
            inner: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Get the value if initialized.
    pub fn get(&self) -> Option<&'static T> {
        let ptr = self.inner.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // SAFETY: a non-null pointer was stored by `set()` from
            // Box::into_raw and is never freed; the Acquire load pairs with
            // the Release store so the pointee is fully initialized.
            Some(unsafe { &*ptr })
        }
    }

    /// Initialize the cell. Returns the value back if already initialized.
    pub fn set(&self, value: T) -> Result<(), T> {
        let ptr = alloc::boxed::Box::into_raw(alloc::boxed::Box::new(value));
        match self.inner.compare_exchange(
            core::ptr::null_mut(),
            ptr,
            Ordering::Release,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(_) => {
                // Lost the race (or double init): reclaim our allocation.
                // SAFETY: `ptr` came from Box::into_raw above and was not
                // published, so we still own it.
                let boxed = unsafe { alloc::boxed::Box::from_raw(ptr) };
                Err(*boxed)
            }
        }
    }

    /// Get, panicking with the subsystem name if not yet initialized.
    pub fn expect(&self, what: &'static str) -> &'static T {
        match self.get() {
            Some(v) => v,
            None => panic!("{} used before init", what),
        }
    }
}

// SAFETY: the pointee is heap-allocated and reached only through the
// AtomicPtr with Acquire/Release ordering; same bounds as std's OnceLock.
unsafe impl<T: Send> Send for OnceCell<T> {}
unsafe impl<T: Send + Sync> Sync for OnceCell<T> {}

/// Mutex-guarded global, usable before the heap is up (no allocation).
pub struct GlobalState<T> {
    inner: Mutex<Option<T>>,
}

impl<T> GlobalState<T> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Install the value. Returns it back if already initialized.
    pub fn init(&self, value: T) -> Result<(), T> {
        let mut guard = self.inner.lock();
        if guard.is_some() {
            Err(value)
        } else {
            *guard = Some(value);
            Ok(())
        }
    }

    /// Run `f` with shared access, or None if uninitialized.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.inner.lock();
        guard.as_ref().map(f)
    }

    /// Run `f` with exclusive access, or None if uninitialized.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.inner.lock();
        guard.as_mut().map(f)
    }
}

impl<T> Default for GlobalState<T> {
    fn default() -> Self {
        Self::new()
    }
}
