//! Swapping the read and write slots of a located table.
//!
//! Both slots are written back-to-back inside a single [`WriteWindow`]. A
//! caller on another processor may still observe one slot patched and the
//! other not while the window is open; this is accepted, not prevented.

use crate::error::{Result, TableError};
use crate::layout::{RwHandler, TableAddress, TableLayout, handler_addr, handler_from_addr};
use crate::protect::{SlotSpan, WriteProtect, WriteWindow};

/// Handlers a table held before it was patched.
#[derive(Debug, Clone, Copy)]
pub struct Originals {
    /// Original read handler.
    pub read: RwHandler,
    /// Original write handler.
    pub write: RwHandler,
}

impl Originals {
    /// Slot values of `(read, write)`.
    #[must_use]
    pub fn addrs(&self) -> (usize, usize) {
        (handler_addr(self.read), handler_addr(self.write))
    }
}

/// Wrapper handlers to install in place of the originals.
#[derive(Debug, Clone, Copy)]
pub struct Replacements {
    /// Replacement read handler.
    pub read: RwHandler,
    /// Replacement write handler.
    pub write: RwHandler,
}

impl Replacements {
    /// Slot values of `(read, write)`.
    #[must_use]
    pub fn addrs(&self) -> (usize, usize) {
        (handler_addr(self.read), handler_addr(self.write))
    }
}

/// What teardown found in the patched slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// Slots that no longer held our replacement when restored.
    ///
    /// Another agent re-patched them after install; its handler was
    /// overwritten with the original.
    pub contended: Vec<usize>,
}

impl RestoreOutcome {
    /// Returns true if every slot still held our replacement.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.contended.is_empty()
    }
}

/// Installs and removes replacements in a table of a fixed layout.
#[derive(Debug)]
pub struct Patcher<P> {
    layout: TableLayout,
    protect: P,
}

impl<P: WriteProtect> Patcher<P> {
    /// Create a patcher for tables of `layout`, toggled by `protect`.
    #[must_use]
    pub const fn new(layout: TableLayout, protect: P) -> Self {
        Self { layout, protect }
    }

    /// The table layout.
    #[must_use]
    pub const fn layout(&self) -> &TableLayout {
        &self.layout
    }

    /// The write-protection toggle.
    #[must_use]
    pub const fn protect(&self) -> &P {
        &self.protect
    }

    /// Read the current read and write handlers.
    ///
    /// # Safety
    ///
    /// `table` must point at a live table with at least
    /// [`TableLayout::slot_count`] readable slots holding handler addresses.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::EmptySlot`] if either slot is zero.
    pub unsafe fn snapshot(&self, table: TableAddress) -> Result<Originals> {
        let read = self.layout.read();
        let write = self.layout.write();
        // SAFETY: slots are in bounds per the caller contract, and hold handlers.
        unsafe {
            Ok(Originals {
                read: handler_from_addr(table.load(read)).ok_or(TableError::EmptySlot { slot: read })?,
                write: handler_from_addr(table.load(write)).ok_or(TableError::EmptySlot { slot: write })?,
            })
        }
    }

    /// Capture the originals and install `replacements`.
    ///
    /// `prepare` runs after the originals are captured and before any slot is
    /// written, so the replacements can be armed before a caller can reach them.
    /// If `prepare` fails, the install stops there with the table untouched.
    ///
    /// # Safety
    ///
    /// Same contract as [`Patcher::snapshot`]. The table memory must also
    /// become writable under `protect`, and must outlive the installation.
    ///
    /// # Errors
    ///
    /// - [`TableError::AlreadyPatched`] if a slot already holds its replacement
    /// - [`TableError::EmptySlot`] if a slot is zero
    /// - the error from `prepare`
    /// - the toggle's error if protection cannot be lifted or reinstated
    ///
    /// The table is untouched in every case except a reinstate failure, where
    /// both slots have already been written. [`Patcher::holds_replacements`]
    /// tells the two apart.
    pub unsafe fn install<F, E>(
        &self,
        table: TableAddress,
        replacements: &Replacements,
        prepare: F,
    ) -> std::result::Result<Originals, E>
    where
        F: FnOnce(&Originals) -> std::result::Result<(), E>,
        E: From<TableError>,
    {
        // SAFETY: forwarded to the caller.
        let originals = unsafe { self.snapshot(table) }?;
        let (orig_read, orig_write) = originals.addrs();
        let (new_read, new_write) = replacements.addrs();
        if orig_read == new_read {
            return Err(TableError::AlreadyPatched {
                slot: self.layout.read(),
            }
            .into());
        }
        if orig_write == new_write {
            return Err(TableError::AlreadyPatched {
                slot: self.layout.write(),
            }
            .into());
        }

        prepare(&originals)?;

        let window = WriteWindow::open(&self.protect, self.span(table))?;
        // SAFETY: the window made both slots writable.
        unsafe {
            table.store(self.layout.write(), new_write);
            table.store(self.layout.read(), new_read);
        }
        window.close()?;

        tracing::debug!(
            table = table.addr(),
            read_slot = self.layout.read(),
            write_slot = self.layout.write(),
            "replacements installed"
        );
        Ok(originals)
    }

    /// Put `originals` back.
    ///
    /// The originals are written unconditionally; slots that no longer held
    /// `replacements` are reported in the outcome.
    ///
    /// # Safety
    ///
    /// Same contract as [`Patcher::install`].
    ///
    /// # Errors
    ///
    /// Returns the toggle's error if protection cannot be lifted (nothing
    /// written) or reinstated (both slots written).
    pub unsafe fn restore(
        &self,
        table: TableAddress,
        originals: &Originals,
        replacements: &Replacements,
    ) -> Result<RestoreOutcome> {
        let (orig_read, orig_write) = originals.addrs();
        let (new_read, new_write) = replacements.addrs();

        let window = WriteWindow::open(&self.protect, self.span(table))?;
        let mut contended = Vec::new();
        // SAFETY: the window made both slots writable; they are in bounds.
        unsafe {
            for (slot, ours, original) in [
                (self.layout.write(), new_write, orig_write),
                (self.layout.read(), new_read, orig_read),
            ] {
                if table.load(slot) != ours {
                    contended.push(slot);
                }
                table.store(slot, original);
            }
        }
        window.close()?;

        if !contended.is_empty() {
            tracing::warn!(
                ?contended,
                "slots were re-patched by another agent; overwritten with originals"
            );
        }
        Ok(RestoreOutcome { contended })
    }

    /// Returns true if either slot currently holds its replacement.
    ///
    /// # Safety
    ///
    /// Same contract as [`Patcher::snapshot`].
    #[must_use]
    pub unsafe fn holds_replacements(&self, table: TableAddress, replacements: &Replacements) -> bool {
        let (new_read, new_write) = replacements.addrs();
        // SAFETY: slots are in bounds per the caller contract.
        unsafe { table.load(self.layout.read()) == new_read || table.load(self.layout.write()) == new_write }
    }

    fn span(&self, table: TableAddress) -> SlotSpan {
        let (first, last) = self.layout.patched_bounds();
        SlotSpan::covering(table, first, last)
    }
}
