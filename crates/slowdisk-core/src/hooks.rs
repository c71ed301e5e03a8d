//! Interception wrappers installed into the table.
//!
//! The table holds plain function addresses, so the wrappers cannot carry
//! context. They reach the active [`Interceptor`] through a process-wide slot
//! instead. A wrapper clones the interceptor out of the slot and releases the
//! lock before it delays or forwards, so teardown never waits on a call in
//! progress.
//!
//! After teardown the interceptor is disarmed but the originals stay
//! published: a caller that resolved a wrapper just before restore still
//! reaches the original handler, only without the delay.

use std::sync::Arc;

use libc::{c_char, c_long, c_uint, size_t};
use parking_lot::RwLock;
use slowdisk_table::{Originals, Replacements};

use crate::delay::DelayGenerator;

/// Delays a call, then forwards it to the original handler.
#[derive(Debug)]
pub struct Interceptor {
    originals: Originals,
    delay: DelayGenerator,
}

impl Interceptor {
    /// Interceptor forwarding to `originals` after a delay drawn from `delay`.
    #[must_use]
    pub const fn new(originals: Originals, delay: DelayGenerator) -> Self {
        Self { originals, delay }
    }

    /// Handlers calls are forwarded to.
    #[must_use]
    pub const fn originals(&self) -> &Originals {
        &self.originals
    }

    /// The delay generator.
    #[must_use]
    pub const fn delay(&self) -> &DelayGenerator {
        &self.delay
    }

    /// Delay, then call the original read handler with the same arguments.
    ///
    /// # Safety
    ///
    /// The arguments must satisfy the original read handler's contract.
    pub unsafe fn read(&self, fd: c_uint, buf: *const c_char, count: size_t) -> c_long {
        self.delay.wait();
        // SAFETY: forwarded to the caller.
        unsafe { (self.originals.read)(fd, buf, count) }
    }

    /// Delay, then call the original write handler with the same arguments.
    ///
    /// # Safety
    ///
    /// The arguments must satisfy the original write handler's contract.
    pub unsafe fn write(&self, fd: c_uint, buf: *const c_char, count: size_t) -> c_long {
        self.delay.wait();
        // SAFETY: forwarded to the caller.
        unsafe { (self.originals.write)(fd, buf, count) }
    }
}

struct HookSlot {
    armed: Option<Arc<Interceptor>>,
    last: Option<Originals>,
}

static SLOT: RwLock<HookSlot> = RwLock::new(HookSlot {
    armed: None,
    last: None,
});

enum Route {
    Delayed(Arc<Interceptor>),
    Direct(Originals),
    Unset,
}

fn route() -> Route {
    let slot = SLOT.read();
    match (&slot.armed, slot.last) {
        (Some(interceptor), _) => Route::Delayed(Arc::clone(interceptor)),
        (None, Some(originals)) => Route::Direct(originals),
        (None, None) => Route::Unset,
    }
}

/// Publish `interceptor` to the wrappers.
///
/// Returns `false`, leaving the slot unchanged, if another interceptor is
/// already armed.
pub fn arm(interceptor: Arc<Interceptor>) -> bool {
    let mut slot = SLOT.write();
    if slot.armed.is_some() {
        return false;
    }
    slot.last = Some(*interceptor.originals());
    slot.armed = Some(interceptor);
    true
}

/// Withdraw the armed interceptor; later calls pass straight through.
///
/// Returns the interceptor that was armed, if any.
pub fn disarm() -> Option<Arc<Interceptor>> {
    SLOT.write().armed.take()
}

/// Returns true if an interceptor is armed.
#[must_use]
pub fn is_armed() -> bool {
    SLOT.read().armed.is_some()
}

/// Read wrapper installed into the table.
///
/// # Safety
///
/// The arguments must satisfy the original read handler's contract.
pub unsafe extern "C" fn read_hook(fd: c_uint, buf: *const c_char, count: size_t) -> c_long {
    match route() {
        // SAFETY: forwarded to the caller.
        Route::Delayed(interceptor) => unsafe { interceptor.read(fd, buf, count) },
        // SAFETY: forwarded to the caller.
        Route::Direct(originals) => unsafe { (originals.read)(fd, buf, count) },
        Route::Unset => -c_long::from(libc::ENOSYS),
    }
}

/// Write wrapper installed into the table.
///
/// # Safety
///
/// The arguments must satisfy the original write handler's contract.
pub unsafe extern "C" fn write_hook(fd: c_uint, buf: *const c_char, count: size_t) -> c_long {
    match route() {
        // SAFETY: forwarded to the caller.
        Route::Delayed(interceptor) => unsafe { interceptor.write(fd, buf, count) },
        // SAFETY: forwarded to the caller.
        Route::Direct(originals) => unsafe { (originals.write)(fd, buf, count) },
        Route::Unset => -c_long::from(libc::ENOSYS),
    }
}

/// The wrappers as table replacements.
#[must_use]
pub fn replacements() -> Replacements {
    Replacements {
        read: read_hook,
        write: write_hook,
    }
}
