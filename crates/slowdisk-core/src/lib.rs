// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # slowdisk-core
//!
//! Artificial latency for read and write.
//!
//! The [`Controller`] locates a dispatch table, swaps its read and write
//! entries for wrappers that burn a random number of CPU cycles before
//! forwarding to the original handler, and puts the originals back on
//! unload.
//!
//! - [`DelayConfig`] bounds the delay, in busy-loop iterations
//! - [`DelayGenerator`] draws an iteration count and spins for it
//! - [`hooks`] holds the wrappers installed into the table
//! - [`Controller`] drives load and unload
//!
//! ## Example
//!
//! ```rust,no_run
//! use slowdisk_core::{Controller, DelayConfig};
//! use slowdisk_table::{AnchorScan, PageProtect, PageTable, TableLayout};
//! # unsafe extern "C" fn h(_: libc::c_uint, _: *const libc::c_char, n: libc::size_t) -> libc::c_long { n as _ }
//!
//! let layout = TableLayout::new(0, 1, 3)?;
//! let page = PageTable::new(4, &[h as usize, h as usize, 0, 0xc105e])?;
//! let scan = AnchorScan::with_layout(page.region(), &layout, 0xc105e);
//!
//! // SAFETY: the page table outlives the controller.
//! let mut controller = unsafe {
//!     Controller::builder(scan, PageProtect::new())
//!         .config(DelayConfig::from_params(["minWait=100", "maxWait=200"])?)
//!         .layout(layout)
//!         .build()
//! }?;
//! let report = controller.load()?;
//! println!("{report}");
//! controller.unload();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod delay;
pub mod error;
pub mod hooks;
pub mod lifecycle;
#[cfg(test)]
pub mod tests;
pub mod types;

pub use config::{
    DEFAULT_MAX_WAIT, DEFAULT_MIN_WAIT, DelayConfig, DelayRange, Normalization, PARAMETERS,
    ParamSpec,
};
pub use delay::{DelayGenerator, EntropySource, OsEntropy, SeededEntropy, spin};
pub use error::{Result, SlowdiskError};
pub use hooks::{Interceptor, read_hook, replacements, write_hook};
pub use lifecycle::{Controller, ControllerBuilder};
pub use types::{LifecycleState, LoadReport, MODULE_INFO, ModuleInfo};
