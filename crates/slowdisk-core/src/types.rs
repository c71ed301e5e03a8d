//! Lifecycle and reporting types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{DelayRange, Normalization};

/// Controller lifecycle state.
///
/// ```text
/// Uninstalled ──load──▶ Installing ──▶ Active ──unload──▶ Restored
///                           │                               │
///                           ▼                               │
///                         Failed          load (fresh cycle)┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Nothing installed yet.
    #[default]
    Uninstalled,
    /// Locating and patching the table.
    Installing,
    /// Replacements installed; calls are being delayed.
    Active,
    /// Originals restored after an active period.
    Restored,
    /// Installation failed; nothing to unwind.
    Failed,
}

impl LifecycleState {
    /// Returns true if `load` may start from this state.
    #[must_use]
    pub const fn can_load(self) -> bool {
        matches!(self, Self::Uninstalled | Self::Restored)
    }

    /// Returns true if replacements are installed.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninstalled => "uninstalled",
            Self::Installing => "installing",
            Self::Active => "active",
            Self::Restored => "restored",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Effective delay range, inclusive on both ends.
    pub range: DelayRange,
    /// Normalization applied to the supplied configuration, if any.
    pub normalization: Option<Normalization>,
    /// Address of the patched table.
    pub table: usize,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interval {} at table {:#x}", self.range, self.table)?;
        if let Some(normalization) = &self.normalization {
            write!(f, " ({normalization})")?;
        }
        Ok(())
    }
}

/// Descriptive metadata for introspection tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    /// Module name.
    pub name: &'static str,
    /// Module version.
    pub version: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// License identifier.
    pub license: &'static str,
}

/// Metadata of this module.
pub const MODULE_INFO: ModuleInfo = ModuleInfo {
    name: "slowdisk",
    version: env!("CARGO_PKG_VERSION"),
    description: "Slows disk accesses by injecting CPU-cycle delays into read and write",
    license: env!("CARGO_PKG_LICENSE"),
};
