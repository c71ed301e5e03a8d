//! Falsification tests against a real page-backed table.
//!
//! | Category | ID Range | Claim |
//! |----------|----------|-------|
//! | A | F001-F006 | Delay bounds and normalization |
//! | B | F007-F012 | Load, unload and reload |
//! | C | F013-F016 | Transparency of intercepted calls |
//!
//! The wrappers are process-wide; every test that loads a controller holds
//! [`SERIAL`].

// Allow test-specific patterns that are denied in production code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::cast_possible_wrap)]

mod delay;
mod lifecycle;
mod transparency;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use libc::{c_char, c_long, c_uint, c_void, size_t};
use parking_lot::Mutex;
use slowdisk_core::{Controller, DelayConfig, EntropySource};
use slowdisk_table::{
    AnchorScan, Locator, PageProtect, PageTable, TableAddress, TableLayout, handler_addr,
};

/// Serializes tests that arm the wrappers.
pub static SERIAL: Mutex<()> = Mutex::new(());

/// Anchor value planted in the test tables.
pub const ANCHOR: usize = 0x0c10_5e00;

/// Slots preceding the table inside its page.
pub const OFFSET: usize = 37;

/// Read at 0, write at 1, anchor at 3.
pub fn layout() -> TableLayout {
    TableLayout::new(0, 1, 3).unwrap()
}

/// Read handler backed by `read(2)`.
pub unsafe extern "C" fn sys_read(fd: c_uint, buf: *const c_char, count: size_t) -> c_long {
    // SAFETY: the caller passes a writable buffer of `count` bytes.
    unsafe { libc::read(fd as i32, buf.cast_mut().cast::<c_void>(), count) as c_long }
}

/// Write handler backed by `write(2)`.
pub unsafe extern "C" fn sys_write(fd: c_uint, buf: *const c_char, count: size_t) -> c_long {
    // SAFETY: the caller passes a readable buffer of `count` bytes.
    unsafe { libc::write(fd as i32, buf.cast::<c_void>(), count) as c_long }
}

/// Page-backed table holding the libc handlers and the anchor.
pub fn page_table() -> PageTable {
    PageTable::new(
        OFFSET,
        &[handler_addr(sys_read), handler_addr(sys_write), 0x5151_0002, ANCHOR],
    )
    .unwrap()
}

/// Page-backed table whose anchor slot holds something else.
pub fn anchorless_table() -> PageTable {
    PageTable::new(
        OFFSET,
        &[handler_addr(sys_read), handler_addr(sys_write), 0x5151_0002, ANCHOR + 8],
    )
    .unwrap()
}

/// Every table slot value.
pub fn snapshot(page: &PageTable) -> Vec<usize> {
    (0..page.entries()).map(|i| page.slot(i).unwrap()).collect()
}

/// Anchor scan over the whole page.
pub fn scan(page: &PageTable) -> AnchorScan<'_> {
    AnchorScan::with_layout(page.region(), &layout(), ANCHOR)
}

/// Locator that counts how often it is consulted.
pub struct CountingLocator<L> {
    inner: L,
    calls: Arc<AtomicUsize>,
}

impl<L: Locator> CountingLocator<L> {
    pub fn new(inner: L) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl<L: Locator> Locator for CountingLocator<L> {
    fn locate(&self) -> Option<TableAddress> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.locate()
    }
}

/// Entropy source that records every value it hands out.
#[derive(Default)]
pub struct RecordingEntropy {
    next: AtomicUsize,
    drawn: Mutex<Vec<u64>>,
}

impl RecordingEntropy {
    pub fn drawn(&self) -> Vec<u64> {
        self.drawn.lock().clone()
    }
}

impl EntropySource for RecordingEntropy {
    fn next_u64(&self) -> u64 {
        let value = self.next.fetch_add(7919, Ordering::SeqCst) as u64;
        self.drawn.lock().push(value);
        value
    }
}

/// Controller over `locator`, using `PageProtect`.
pub fn controller<L: Locator>(
    locator: L,
    config: DelayConfig,
    entropy: Arc<dyn EntropySource>,
) -> Controller<L, PageProtect> {
    // SAFETY: every locator used here returns a table inside a live
    // `PageTable` that outlives the controller.
    unsafe {
        Controller::builder(locator, PageProtect::new())
            .config(config)
            .layout(layout())
            .entropy(entropy)
            .build()
    }
    .unwrap()
}

/// Call the read handler currently in slot 0.
pub fn call_read(page: &PageTable, fd: i32, buf: &mut [u8]) -> c_long {
    // SAFETY: slot 0 holds an RwHandler and `buf` is writable.
    unsafe {
        let read = page.handler(0).unwrap();
        read(fd as c_uint, buf.as_mut_ptr().cast(), buf.len())
    }
}

/// Call the write handler currently in slot 1.
pub fn call_write(page: &PageTable, fd: i32, buf: &[u8]) -> c_long {
    // SAFETY: slot 1 holds an RwHandler and `buf` is readable.
    unsafe {
        let write = page.handler(1).unwrap();
        write(fd as c_uint, buf.as_ptr().cast(), buf.len())
    }
}

/// A fresh pipe as `(read_end, write_end)`.
pub fn pipe() -> (i32, i32) {
    let mut fds = [0; 2];
    // SAFETY: `fds` has room for both descriptors.
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    (fds[0], fds[1])
}

/// Close both ends of a pipe.
pub fn close_pipe((r, w): (i32, i32)) {
    // SAFETY: closing descriptors we own.
    unsafe {
        libc::close(r);
        libc::close(w);
    }
}
