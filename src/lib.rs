//! slowdisk: artificial read/write latency by dispatch-table interception.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use slowdisk::prelude::*;
//!
//! // Re-exports from sub-crates for convenience
//! let config = DelayConfig::from_params(["minWait=100", "maxWait=400"])?;
//! let (range, _) = config.effective_range();
//! assert_eq!(range.min(), 100);
//! # Ok::<(), SlowdiskError>(())
//! ```

pub use slowdisk_core as core;
pub use slowdisk_table as table;

/// Prelude module for common imports.
pub mod prelude {
    pub use slowdisk_core::{
        Controller, DelayConfig, DelayGenerator, DelayRange, EntropySource, LifecycleState,
        LoadReport, Normalization, OsEntropy, SeededEntropy, SlowdiskError,
    };
    #[cfg(unix)]
    pub use slowdisk_table::{PageProtect, PageTable};
    pub use slowdisk_table::{
        Anchor, AnchorScan, FixedLocator, Locator, RestoreOutcome, TableLayout, Unprotected,
        WriteProtect,
    };
}
