//! Locating a dispatch table that has no exported symbol.
//!
//! The only strategy provided is a linear scan: walk a readable region one
//! slot at a time and accept the first candidate whose anchor slot holds the
//! anchor handler's canonical address. It assumes the entries are contiguous
//! pointer-width slots and that nobody else has rewritten the anchor entry.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::layout::{Anchor, TableAddress, TableLayout};

/// Strategy for finding a dispatch table in memory.
///
/// Kept as a trait so tests can substitute a fixed table instead of scanning.
pub trait Locator {
    /// Return the address of the table, or `None` if it cannot be found.
    fn locate(&self) -> Option<TableAddress>;
}

impl<L: Locator + ?Sized> Locator for &L {
    fn locate(&self) -> Option<TableAddress> {
        (**self).locate()
    }
}

/// A readable run of pointer-width slots.
#[derive(Debug, Clone, Copy)]
pub struct ScanRegion<'a> {
    base: *mut usize,
    len: usize,
    _memory: PhantomData<&'a [usize]>,
}

impl<'a> ScanRegion<'a> {
    /// Scan over borrowed slots.
    #[must_use]
    pub fn from_slice(slots: &'a [usize]) -> Self {
        Self {
            base: slots.as_ptr().cast_mut(),
            len: slots.len(),
            _memory: PhantomData,
        }
    }

    /// Scan over raw memory, starting at `base` for `len` slots.
    ///
    /// # Safety
    ///
    /// Every slot in `base..base + len` must be readable, aligned and stay
    /// mapped for `'a`. Memory another agent writes concurrently is fine;
    /// reads are atomic.
    #[must_use]
    pub const unsafe fn from_raw_parts(base: *mut usize, len: usize) -> Self {
        Self {
            base,
            len,
            _memory: PhantomData,
        }
    }

    /// Number of slots in the region.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the region holds no slots.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn read(&self, index: usize) -> usize {
        debug_assert!(index < self.len);
        // SAFETY: index < len, and the constructor guarantees readability.
        unsafe { AtomicUsize::from_ptr(self.base.add(index)) }.load(Ordering::Relaxed)
    }
}

/// Linear scan matching one known-good anchor entry.
///
/// A candidate is only accepted if the whole table, `extent` slots from the
/// candidate, fits inside the region.
#[derive(Debug, Clone, Copy)]
pub struct AnchorScan<'a> {
    region: ScanRegion<'a>,
    anchor: Anchor,
    extent: usize,
}

impl<'a> AnchorScan<'a> {
    /// Create a scan over `region` looking for `anchor`.
    ///
    /// Only the slots up to the anchor are required to lie in the region.
    /// Prefer [`AnchorScan::with_layout`] when patched slots may follow it.
    #[must_use]
    pub const fn new(region: ScanRegion<'a>, anchor: Anchor) -> Self {
        Self {
            region,
            anchor,
            extent: anchor.slot.saturating_add(1),
        }
    }

    /// Scan for a table of `layout` whose anchor slot holds `address`.
    ///
    /// Candidates too close to the region end to hold every slot of the
    /// layout are skipped.
    #[must_use]
    pub fn with_layout(region: ScanRegion<'a>, layout: &TableLayout, address: usize) -> Self {
        Self {
            region,
            anchor: Anchor::for_layout(layout, address),
            extent: layout.slot_count(),
        }
    }

    /// The anchor this scan matches.
    #[must_use]
    pub const fn anchor(&self) -> Anchor {
        self.anchor
    }

    /// Offset, in slots from the region base, of the first matching candidate.
    #[must_use]
    pub fn find_offset(&self) -> Option<usize> {
        let last = self.region.len().checked_sub(self.extent)?;
        (0..=last).find(|&candidate| self.region.read(candidate + self.anchor.slot) == self.anchor.address)
    }
}

impl Locator for AnchorScan<'_> {
    fn locate(&self) -> Option<TableAddress> {
        let Some(offset) = self.find_offset() else {
            tracing::debug!(
                slots = self.region.len(),
                anchor_slot = self.anchor.slot,
                "anchor scan exhausted region without a match"
            );
            return None;
        };
        let table = TableAddress::new(self.region.base.wrapping_add(offset)).ok()?;
        tracing::debug!(offset, table = table.addr(), "anchor scan matched");
        Some(table)
    }
}

/// Locator that returns a preset address.
///
/// For hosts that export the table, and for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocator(Option<TableAddress>);

impl FixedLocator {
    /// Always locate `table`.
    #[must_use]
    pub const fn new(table: TableAddress) -> Self {
        Self(Some(table))
    }

    /// Never locate anything.
    #[must_use]
    pub const fn missing() -> Self {
        Self(None)
    }
}

impl Locator for FixedLocator {
    fn locate(&self) -> Option<TableAddress> {
        self.0
    }
}
