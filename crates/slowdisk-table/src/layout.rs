//! Dispatch table shape: handler signature, slot indices and table addresses.
//!
//! A dispatch table is a contiguous run of pointer-width slots, one per
//! operation number. Every slot access in this crate goes through
//! [`AtomicUsize`] so a concurrent reader never observes a torn entry.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use libc::{c_char, c_long, c_uint, size_t};

use crate::error::{Result, TableError};

/// Signature shared by the read and write handlers.
///
/// Arguments are the file-descriptor-like id, the caller's buffer and its
/// length. The return value is a byte count or a negative errno.
pub type RwHandler = unsafe extern "C" fn(fd: c_uint, buf: *const c_char, count: size_t) -> c_long;

/// Width of one table slot in bytes.
pub const SLOT_WIDTH: usize = size_of::<usize>();

/// Address of a handler as stored in a table slot.
#[must_use]
pub fn handler_addr(handler: RwHandler) -> usize {
    handler as usize
}

/// Reinterpret a slot value as a handler.
///
/// Returns `None` for a null slot.
///
/// # Safety
///
/// `addr` must be the address of a function with the [`RwHandler`] signature.
#[must_use]
pub unsafe fn handler_from_addr(addr: usize) -> Option<RwHandler> {
    if addr == 0 {
        return None;
    }
    // SAFETY: non-null, and the caller guarantees the signature.
    Some(unsafe { std::mem::transmute::<usize, RwHandler>(addr) })
}

/// Slot indices of the intercepted entries and of the anchor entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableLayout {
    read: usize,
    write: usize,
    anchor: usize,
}

impl TableLayout {
    /// Create a layout from explicit slot indices.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::InvalidLayout`] if any two indices coincide.
    pub fn new(read: usize, write: usize, anchor: usize) -> Result<Self> {
        if read == write || read == anchor || write == anchor {
            return Err(TableError::InvalidLayout(format!(
                "slots must be distinct (read={read}, write={write}, anchor={anchor})"
            )));
        }
        Ok(Self {
            read,
            write,
            anchor,
        })
    }

    /// Layout of the host's system call table (`SYS_read`, `SYS_write`, `SYS_close`).
    #[cfg(target_os = "linux")]
    #[must_use]
    pub const fn native() -> Self {
        Self {
            read: libc::SYS_read as usize,
            write: libc::SYS_write as usize,
            anchor: libc::SYS_close as usize,
        }
    }

    /// Slot index of the read entry.
    #[must_use]
    pub const fn read(&self) -> usize {
        self.read
    }

    /// Slot index of the write entry.
    #[must_use]
    pub const fn write(&self) -> usize {
        self.write
    }

    /// Slot index of the anchor entry.
    #[must_use]
    pub const fn anchor(&self) -> usize {
        self.anchor
    }

    /// Number of slots a table must have to hold every entry of this layout.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.read.max(self.write).max(self.anchor).saturating_add(1)
    }

    /// Lowest and highest of the two intercepted slot indices.
    #[must_use]
    pub fn patched_bounds(&self) -> (usize, usize) {
        (self.read.min(self.write), self.read.max(self.write))
    }
}

/// Known-good table entry used to recognize the table in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Anchor {
    /// Slot index the anchor handler lives at.
    pub slot: usize,
    /// Canonical address of the unhooked anchor handler.
    pub address: usize,
}

impl Anchor {
    /// Create an anchor from a slot index and handler address.
    #[must_use]
    pub const fn new(slot: usize, address: usize) -> Self {
        Self { slot, address }
    }

    /// Anchor on the layout's anchor slot.
    #[must_use]
    pub const fn for_layout(layout: &TableLayout, address: usize) -> Self {
        Self::new(layout.anchor(), address)
    }
}

/// Location of slot 0 of a dispatch table.
///
/// This is an address, not a borrow: whoever creates one from raw memory is
/// responsible for that memory outliving every use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableAddress(NonNull<usize>);

// SAFETY: the address carries no ownership; all slot accesses are atomic.
unsafe impl Send for TableAddress {}
// SAFETY: as above.
unsafe impl Sync for TableAddress {}

impl TableAddress {
    /// Wrap a raw table pointer.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::Unaligned`] for a null or misaligned pointer.
    pub fn new(ptr: *mut usize) -> Result<Self> {
        if !ptr.is_aligned() {
            return Err(TableError::Unaligned { addr: ptr as usize });
        }
        NonNull::new(ptr)
            .map(Self)
            .ok_or(TableError::Unaligned { addr: 0 })
    }

    /// Numeric address of slot 0.
    #[must_use]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Raw pointer to slot 0.
    #[must_use]
    pub const fn as_ptr(self) -> *mut usize {
        self.0.as_ptr()
    }

    /// Raw pointer to the slot at `index`.
    #[must_use]
    pub fn slot(self, index: usize) -> *mut usize {
        self.0.as_ptr().wrapping_add(index)
    }

    /// Atomically read the slot at `index`.
    ///
    /// # Safety
    ///
    /// The slot must lie inside readable memory that outlives the call.
    #[must_use]
    pub unsafe fn load(self, index: usize) -> usize {
        // SAFETY: aligned (checked at construction), readable per caller contract.
        unsafe { AtomicUsize::from_ptr(self.slot(index)) }.load(Ordering::Acquire)
    }

    /// Atomically overwrite the slot at `index`.
    ///
    /// # Safety
    ///
    /// The slot must lie inside memory that is currently writable.
    pub(crate) unsafe fn store(self, index: usize, value: usize) {
        // SAFETY: aligned (checked at construction), writable per caller contract.
        unsafe { AtomicUsize::from_ptr(self.slot(index)) }.store(value, Ordering::Release);
    }
}
