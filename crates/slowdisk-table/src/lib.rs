// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # slowdisk-table
//!
//! Dispatch-table plumbing for read/write interception.
//!
//! A dispatch table is a process-wide array of handler addresses indexed by
//! operation number. This crate finds one that has no exported symbol,
//! briefly lifts the write protection on its memory, and swaps the read and
//! write entries for replacement handlers (and back again on teardown).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slowdisk_table::{
//!     AnchorScan, Locator, PageProtect, PageTable, Patcher, Replacements, TableError, TableLayout,
//! };
//! # unsafe extern "C" fn hook(_: libc::c_uint, _: *const libc::c_char, n: libc::size_t) -> libc::c_long { n as _ }
//! # unsafe extern "C" fn orig(_: libc::c_uint, _: *const libc::c_char, n: libc::size_t) -> libc::c_long { n as _ }
//! # unsafe extern "C" fn hook2(_: libc::c_uint, _: *const libc::c_char, n: libc::size_t) -> libc::c_long { n as _ }
//!
//! let layout = TableLayout::new(0, 1, 3)?;
//! let page = PageTable::new(16, &[orig as usize, orig as usize, 0, 0xc105e])?;
//!
//! let scan = AnchorScan::with_layout(page.region(), &layout, 0xc105e);
//! let table = scan.locate().expect("table present");
//!
//! let patcher = Patcher::new(layout, PageProtect::new());
//! let hooks = Replacements { read: hook, write: hook2 };
//! let originals = unsafe { patcher.install(table, &hooks, |_| Ok::<_, TableError>(())) }?;
//! // ... calls dispatched through the table now reach the hooks ...
//! unsafe { patcher.restore(table, &originals, &hooks) }?;
//! # Ok::<(), TableError>(())
//! ```
//!
//! ## Write protection
//!
//! | Toggle | Where | Mechanism |
//! |--------|-------|-----------|
//! | [`PageProtect`] | Unix user space | `mprotect(2)` on the covering pages |
//! | `Cr0WriteProtect` | x86_64 ring 0 | clear CR0.WP (bit 16) |
//! | [`Unprotected`] | anywhere | no-op, table already writable |

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, rust_2018_idioms)]

mod error;
mod layout;
mod locate;
mod patch;
mod protect;

#[cfg(target_arch = "x86_64")]
mod cr0;

#[cfg(unix)]
mod page;

#[cfg(target_arch = "x86_64")]
pub use cr0::{CR0_WP, Cr0WriteProtect, without_write_protect};
pub use error::{Result, TableError};
pub use layout::{
    Anchor, RwHandler, SLOT_WIDTH, TableAddress, TableLayout, handler_addr, handler_from_addr,
};
pub use locate::{AnchorScan, FixedLocator, Locator, ScanRegion};
#[cfg(unix)]
pub use page::{PageProtect, PageTable, page_size};
pub use patch::{Originals, Patcher, Replacements, RestoreOutcome};
pub use protect::{SlotSpan, Unprotected, WriteProtect, WriteWindow};
