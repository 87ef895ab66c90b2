use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

/// 0 = UNINIT, 1 = INITING, 2 = READY
const UNINIT: u8 = 0;
const INITING: u8 = 1;
const READY: u8 = 2;

/// A cell written at most once, then shared read-only.
///
/// Used for process-wide registries that are set up during boot and never
/// relocated afterwards.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINIT),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Returns `Some(&T)` if already initialized.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            // SAFETY: READY guarantees the write is done
            Some(unsafe { &*(*self.value.get()).as_ptr() })
        } else {
            None
        }
    }

    /// Store `value` if the cell is still empty.
    ///
    /// # Errors
    /// Hands `value` back if the cell was already initialized (or is being
    /// initialized by someone else).
    pub fn set(&self, value: T) -> Result<&T, T> {
        if !self.claim() {
            return Err(value);
        }
        // SAFETY: claimed above.
        unsafe { Ok(self.publish(value)) }
    }

    /// Claim the cell, then build its value with `init`.
    ///
    /// Returns `None` without running `init` if the cell is already set or
    /// being set. If `init` fails, the cell is empty again.
    pub fn try_init<E>(&self, init: impl FnOnce() -> Result<T, E>) -> Option<Result<&T, E>> {
        if !self.claim() {
            return None;
        }
        match init() {
            // SAFETY: claimed above.
            Ok(value) => Some(Ok(unsafe { self.publish(value) })),
            Err(err) => {
                self.state.store(UNINIT, Ordering::Release);
                Some(Err(err))
            }
        }
    }

    /// Initialize at most once and return `&T`.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        loop {
            if let Some(v) = self.get() {
                return v;
            }
            if self.claim() {
                // SAFETY: claimed above.
                return unsafe { self.publish(init()) };
            }
            // Someone else is initializing
            spin_loop();
        }
    }

    /// Move UNINIT to INITING; the winner is the only writer.
    #[inline]
    fn claim(&self) -> bool {
        self.state
            .compare_exchange(UNINIT, INITING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// # Safety
    /// The caller must have moved the state from UNINIT to INITING.
    unsafe fn publish(&self, value: T) -> &T {
        unsafe {
            (*self.value.get()).write(value);
        }
        // Publish value before marking READY
        self.state.store(READY, Ordering::Release);
        // SAFETY: just wrote it
        unsafe { &*(*self.value.get()).as_ptr() }
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            // SAFETY: READY means the value was written and never taken out.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

// Safety: shared after READY; initialization is single-writer.
unsafe impl<T: Sync + Send> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}
