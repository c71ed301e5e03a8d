//! Error types for slowdisk-core.
//!
//! Configuration problems found at load time are normalized, not raised;
//! see [`crate::config::Normalization`].

use slowdisk_table::TableError;

use crate::types::LifecycleState;

/// Result type alias for slowdisk operations.
pub type Result<T> = std::result::Result<T, SlowdiskError>;

/// Errors surfaced by configuration loading and the lifecycle controller.
#[derive(Debug, thiserror::Error)]
pub enum SlowdiskError {
    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The dispatch table could not be located.
    ///
    /// Nothing was mutated; the host keeps its original handlers.
    #[error("could not find the address of the dispatch table")]
    TableNotFound,

    /// Patching or restoring the table failed.
    #[error("patch failed: {0}")]
    Patch(#[from] TableError),

    /// Another controller's wrappers are armed in this process.
    #[error("interception hooks are already armed by another controller")]
    HooksBusy,

    /// Operation not valid in the controller's current state.
    #[error("invalid state: cannot {operation} while {state}")]
    InvalidState {
        /// The attempted operation.
        operation: &'static str,
        /// State the controller was in.
        state: LifecycleState,
    },
}

impl SlowdiskError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Load status reported to the host: a negative errno-style value.
    ///
    /// A missing table reports `-1`.
    #[must_use]
    pub const fn status_code(&self) -> i32 {
        match self {
            Self::TableNotFound => -1,
            Self::Config(_) => -libc::EINVAL,
            Self::Patch(TableError::AlreadyPatched { .. }) => -libc::EEXIST,
            Self::Patch(TableError::Protect { errno } | TableError::Map { errno }) => -*errno,
            Self::Patch(_) => -libc::EFAULT,
            Self::InvalidState { .. } | Self::HooksBusy => -libc::EBUSY,
        }
    }
}
