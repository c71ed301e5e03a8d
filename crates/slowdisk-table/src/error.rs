//! Error types for dispatch-table operations.

/// Result type alias for table operations.
pub type Result<T> = std::result::Result<T, TableError>;

/// Errors that can occur while locating, unprotecting or patching a table.
///
/// Each variant leaves the table unmodified unless stated otherwise.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// A target slot already holds the replacement handler.
    ///
    /// Installing again would capture the wrapper as its own original and
    /// make it forward to itself.
    #[error("slot {slot} already holds the replacement handler")]
    AlreadyPatched {
        /// Slot index that was already patched
        slot: usize,
    },

    /// A target slot holds no handler.
    #[error("slot {slot} is empty")]
    EmptySlot {
        /// Slot index that held zero
        slot: usize,
    },

    /// Lifting or reinstating write protection failed.
    #[error("write protection toggle failed with errno={errno}")]
    Protect {
        /// Raw errno from the protection call
        errno: i32,
    },

    /// A table or slot address is not aligned to the slot width.
    #[error("address {addr:#x} is not aligned to the slot width")]
    Unaligned {
        /// The offending address
        addr: usize,
    },

    /// The table layout is not usable.
    #[error("invalid table layout: {0}")]
    InvalidLayout(String),

    /// Mapping or unmapping a page-backed table failed.
    #[error("table mapping failed with errno={errno}")]
    Map {
        /// Raw errno from mmap/munmap
        errno: i32,
    },
}

impl TableError {
    /// Create a protection error from a raw errno value.
    #[must_use]
    pub const fn protect(errno: i32) -> Self {
        Self::Protect { errno }
    }

    /// Get the raw errno value, if the error came from the OS.
    #[must_use]
    pub const fn errno(&self) -> Option<i32> {
        match self {
            Self::Protect { errno } | Self::Map { errno } => Some(*errno),
            Self::AlreadyPatched { .. }
            | Self::EmptySlot { .. }
            | Self::Unaligned { .. }
            | Self::InvalidLayout(_) => None,
        }
    }

    /// Check if this error indicates missing privileges.
    #[must_use]
    pub const fn is_permission_error(&self) -> bool {
        matches!(
            self,
            Self::Protect { errno } | Self::Map { errno }
                if *errno == libc::EPERM || *errno == libc::EACCES
        )
    }
}

#[cfg(unix)]
impl From<nix::errno::Errno> for TableError {
    fn from(errno: nix::errno::Errno) -> Self {
        Self::Protect {
            errno: errno as i32,
        }
    }
}
