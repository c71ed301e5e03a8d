//! Page-granular write protection via `mprotect(2)`, and page-backed tables.

use std::num::NonZeroUsize;
use std::ptr::NonNull;

use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, mprotect, munmap};

use crate::error::{Result, TableError};
use crate::layout::{RwHandler, SLOT_WIDTH, TableAddress, handler_from_addr};
use crate::locate::ScanRegion;
use crate::protect::{SlotSpan, WriteProtect};

/// Value written to every slot outside the table proper.
const FILLER: usize = 0x5a5a_5a5a;

/// System page size, falling back to 4 KiB if `sysconf` fails.
#[must_use]
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

/// Toggle that flips whole pages between a resting protection and writable.
///
/// `mprotect(2)` cannot report a page's current protection, so the toggle
/// does not read it: it reinstates `resting` when a window closes. `resting`
/// must therefore match the real protection of every page the table touches.
/// A table on a `PROT_READ | PROT_EXEC` page needs
/// `PageProtect::with_resting(PROT_READ | PROT_EXEC)`, otherwise the page
/// loses exec. The open window keeps the resting flags and adds
/// `PROT_READ | PROT_WRITE`.
#[derive(Debug, Clone, Copy)]
pub struct PageProtect {
    resting: ProtFlags,
    page_size: usize,
}

impl PageProtect {
    /// Toggle whose resting protection is `PROT_READ`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_resting(ProtFlags::PROT_READ)
    }

    /// Toggle that reinstates `resting` when a window closes.
    ///
    /// `resting` must be the mapping's actual protection.
    #[must_use]
    pub fn with_resting(resting: ProtFlags) -> Self {
        Self {
            resting,
            page_size: page_size(),
        }
    }

    /// Protection reinstated after each window.
    #[must_use]
    pub const fn resting(&self) -> ProtFlags {
        self.resting
    }

    /// Protection applied while a window is open.
    #[must_use]
    pub fn window_flags(&self) -> ProtFlags {
        self.resting | ProtFlags::PROT_READ | ProtFlags::PROT_WRITE
    }

    fn apply(&self, span: SlotSpan, prot: ProtFlags) -> Result<()> {
        let (start, len) = span.page_aligned(self.page_size);
        let addr = NonNull::new(start as *mut libc::c_void).ok_or(TableError::Unaligned { addr: start })?;
        // SAFETY: the span covers slots of a table the caller is patching; only
        // the protection of the covering pages changes.
        unsafe { mprotect(addr, len, prot) }?;
        Ok(())
    }
}

impl Default for PageProtect {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteProtect for PageProtect {
    type Token = ProtFlags;

    fn lift(&self, span: SlotSpan) -> Result<ProtFlags> {
        self.apply(span, self.window_flags())?;
        Ok(self.resting)
    }

    fn reinstate(&self, span: SlotSpan, prior: ProtFlags) -> Result<()> {
        self.apply(span, prior)
    }
}

/// A dispatch table living in its own anonymous, read-only mapping.
///
/// The table starts `offset` slots into the mapping; every other slot holds
/// filler, so an anchor scan over [`PageTable::region`] has something to
/// walk past.
#[derive(Debug)]
pub struct PageTable {
    base: NonNull<libc::c_void>,
    len: usize,
    table: TableAddress,
    entries: usize,
}

// SAFETY: the mapping is owned exclusively; slot access is atomic.
unsafe impl Send for PageTable {}
// SAFETY: as above.
unsafe impl Sync for PageTable {}

impl PageTable {
    /// Map a table holding `entries`, starting `offset` slots into the mapping.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::Map`] if the mapping cannot be created or
    /// [`TableError::Protect`] if it cannot be made read-only.
    pub fn new(offset: usize, entries: &[usize]) -> Result<Self> {
        let page = page_size();
        let slots = offset + entries.len();
        let len = (slots * SLOT_WIDTH).div_ceil(page).max(1) * page;
        let length = NonZeroUsize::new(len).ok_or(TableError::Map { errno: libc::EINVAL })?;

        // SAFETY: a fresh private anonymous mapping aliases nothing.
        let base = unsafe {
            mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }
        .map_err(|e| TableError::Map { errno: e as i32 })?;

        let mut table = Self {
            base,
            len,
            table: TableAddress::new(base.as_ptr().cast())?,
            entries: entries.len(),
        };
        table.table = TableAddress::new(table.table.slot(offset))?;

        // SAFETY: the mapping is `len` bytes, page aligned and still writable.
        let words = unsafe { std::slice::from_raw_parts_mut(base.as_ptr().cast::<usize>(), len / SLOT_WIDTH) };
        for (i, word) in words.iter_mut().enumerate() {
            *word = FILLER ^ i;
        }
        words[offset..offset + entries.len()].copy_from_slice(entries);

        // SAFETY: the whole mapping belongs to us.
        unsafe { mprotect(base, len, ProtFlags::PROT_READ) }?;
        Ok(table)
    }

    /// Address of the table's slot 0.
    #[must_use]
    pub const fn table(&self) -> TableAddress {
        self.table
    }

    /// The whole mapping as a scan region.
    #[must_use]
    pub fn region(&self) -> ScanRegion<'_> {
        // SAFETY: the mapping stays readable for as long as `self` lives.
        unsafe { ScanRegion::from_raw_parts(self.base.as_ptr().cast(), self.len / SLOT_WIDTH) }
    }

    /// Number of table entries.
    #[must_use]
    pub const fn entries(&self) -> usize {
        self.entries
    }

    /// Current value of table slot `index`, or `None` past the table end.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<usize> {
        // SAFETY: bounds checked; the mapping is readable.
        (index < self.entries).then(|| unsafe { self.table().load(index) })
    }

    /// Resolve slot `index` as a read/write handler.
    ///
    /// # Safety
    ///
    /// The slot must hold the address of a function with the [`RwHandler`]
    /// signature.
    #[must_use]
    pub unsafe fn handler(&self, index: usize) -> Option<RwHandler> {
        // SAFETY: forwarded to the caller.
        self.slot(index).and_then(|addr| unsafe { handler_from_addr(addr) })
    }
}

impl Drop for PageTable {
    fn drop(&mut self) {
        // SAFETY: unmapping our own mapping; no borrows of it outlive `self`.
        if let Err(e) = unsafe { munmap(self.base, self.len) } {
            tracing::error!(len = self.len, "failed to unmap page table: {e}");
        }
    }
}
