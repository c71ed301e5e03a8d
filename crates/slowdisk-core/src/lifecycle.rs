//! Lifecycle controller: load and unload.
//!
//! ```text
//! load:   normalize ─▶ locate ─▶ arm hooks ─▶ patch ─▶ Active
//! unload: restore originals ─▶ disarm hooks ─▶ Restored
//! ```

use std::fmt;
use std::sync::Arc;

use slowdisk_table::{
    Locator, Originals, Patcher, Replacements, RestoreOutcome, TableAddress, TableError,
    TableLayout, WriteProtect,
};

use crate::config::{DelayConfig, Normalization};
use crate::delay::{DelayGenerator, EntropySource, OsEntropy};
use crate::error::{Result, SlowdiskError};
use crate::hooks::{self, Interceptor};
use crate::types::{LifecycleState, LoadReport};

struct Installed {
    table: TableAddress,
    originals: Originals,
    replacements: Replacements,
}

/// Installs the interception wrappers into a located table and removes them
/// again.
///
/// A controller whose wrappers are still installed unloads itself when
/// dropped.
pub struct Controller<L: Locator, P: WriteProtect> {
    config: DelayConfig,
    locator: L,
    patcher: Patcher<P>,
    entropy: Arc<dyn EntropySource>,
    state: LifecycleState,
    installed: Option<Installed>,
}

impl<L: Locator, P: WriteProtect> Controller<L, P> {
    /// Start building a controller around `locator` and `protect`.
    #[must_use]
    pub fn builder(locator: L, protect: P) -> ControllerBuilder<L, P> {
        ControllerBuilder::new(locator, protect)
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Configuration as supplied, before normalization.
    #[must_use]
    pub const fn config(&self) -> &DelayConfig {
        &self.config
    }

    /// Layout of the tables this controller patches.
    #[must_use]
    pub const fn layout(&self) -> &TableLayout {
        self.patcher.layout()
    }

    /// Table the controller's wrappers are installed in, if any.
    #[must_use]
    pub fn table(&self) -> Option<TableAddress> {
        self.installed.as_ref().map(|i| i.table)
    }

    /// Handlers captured at load, while the wrappers are installed.
    #[must_use]
    pub fn originals(&self) -> Option<&Originals> {
        self.installed.as_ref().map(|i| &i.originals)
    }

    /// Locate the table and install the wrappers.
    ///
    /// Allowed from [`LifecycleState::Uninstalled`] and
    /// [`LifecycleState::Restored`]. An out-of-range configuration is
    /// normalized with a warning, never rejected.
    ///
    /// # Errors
    ///
    /// - [`SlowdiskError::InvalidState`] from any other state
    /// - [`SlowdiskError::HooksBusy`] if another controller's wrappers are
    ///   armed; nothing is mutated and the state is unchanged
    /// - [`SlowdiskError::TableNotFound`] if the locator finds nothing
    /// - [`SlowdiskError::Patch`] if the table cannot be patched
    ///
    /// The last two leave the controller [`LifecycleState::Failed`]. If a
    /// patch failed after the slots were written and they cannot be backed
    /// out, the controller keeps the wrappers armed for its own table and
    /// [`Controller::unload`] (or drop) retries the restore.
    pub fn load(&mut self) -> Result<LoadReport> {
        if !self.state.can_load() {
            return Err(SlowdiskError::InvalidState {
                operation: "load",
                state: self.state,
            });
        }
        if hooks::is_armed() {
            return Err(SlowdiskError::HooksBusy);
        }
        let prior = self.state;
        self.state = LifecycleState::Installing;

        let (range, normalization) = self.config.effective_range();
        match normalization {
            Some(Normalization::InvertedRange { min_wait, max_wait }) => tracing::warn!(
                min_wait,
                max_wait,
                "Invalid [minWait, maxWait] range provided. Normalizing to: [{}, {}]",
                crate::config::DEFAULT_MIN_WAIT,
                crate::config::DEFAULT_MAX_WAIT
            ),
            Some(Normalization::ZeroMax) => {
                tracing::warn!("Setting maxWait to 1. Interval is now [0,1).");
            }
            None => {}
        }

        let Some(table) = self.locator.locate() else {
            tracing::warn!("Could not find the address of the dispatch table");
            self.state = LifecycleState::Failed;
            return Err(SlowdiskError::TableNotFound);
        };

        let delay = DelayGenerator::with_entropy(range, Arc::clone(&self.entropy));
        let replacements = hooks::replacements();
        let mut armed: Option<Originals> = None;
        // SAFETY: the builder's contract guarantees every located table is
        // live, large enough for the layout and writable under the toggle.
        let result = unsafe {
            self.patcher.install(table, &replacements, |originals| {
                if hooks::arm(Arc::new(Interceptor::new(*originals, delay))) {
                    armed = Some(*originals);
                    Ok(())
                } else {
                    Err(SlowdiskError::HooksBusy)
                }
            })
        };

        let originals = match result {
            Ok(originals) => originals,
            Err(SlowdiskError::HooksBusy) => {
                // Armed by someone else after the check above; the table
                // was never written.
                self.state = prior;
                return Err(SlowdiskError::HooksBusy);
            }
            Err(e) => {
                tracing::error!(table = table.addr(), "failed to patch dispatch table: {e}");
                self.state = LifecycleState::Failed;
                if let Some(originals) = armed {
                    self.back_out(Installed {
                        table,
                        originals,
                        replacements,
                    });
                }
                return Err(e);
            }
        };

        self.installed = Some(Installed {
            table,
            originals,
            replacements,
        });
        self.state = LifecycleState::Active;
        tracing::info!(
            table = table.addr(),
            "Successfully loaded SlowDisk module with interval {range}."
        );
        Ok(LoadReport {
            range,
            normalization,
            table: table.addr(),
        })
    }

    /// Restore the original handlers.
    ///
    /// While the controller's wrappers are in a table (after a successful
    /// load, or a failed load or unload that could not back them out) this
    /// restores the table, disarms the wrappers and enters
    /// [`LifecycleState::Restored`]. Otherwise it does nothing and returns
    /// `None`.
    ///
    /// If the restore fails, the failure is logged and the controller enters
    /// [`LifecycleState::Failed`]. While the wrappers remain in the table they
    /// stay armed for it, keeping other loads out, and a later `unload`
    /// retries.
    pub fn unload(&mut self) -> Option<RestoreOutcome> {
        let Some(installed) = self.installed.take() else {
            tracing::debug!(state = %self.state, "unload: nothing installed");
            return None;
        };
        let table = installed.table;

        match self.restore(installed) {
            Ok(outcome) => {
                self.state = LifecycleState::Restored;
                tracing::info!(table = table.addr(), "Successfully unloaded SlowDisk module.");
                Some(outcome)
            }
            Err(e) => {
                self.state = LifecycleState::Failed;
                tracing::error!(table = table.addr(), "failed to restore dispatch table: {e}");
                None
            }
        }
    }

    /// Undo a partial install: restore only if the wrappers reached the table.
    fn back_out(&mut self, installed: Installed) {
        // SAFETY: the table was located under the builder's contract.
        let written = unsafe {
            self.patcher
                .holds_replacements(installed.table, &installed.replacements)
        };
        if !written {
            hooks::disarm();
            return;
        }
        let table = installed.table;
        if let Err(e) = self.restore(installed) {
            tracing::error!(table = table.addr(), "failed to back out partial patch: {e}");
        }
    }

    /// Write the originals back, disarming the wrappers once they are out of
    /// the table. Keeps `installed` if they are still in it.
    fn restore(&mut self, installed: Installed) -> std::result::Result<RestoreOutcome, TableError> {
        // SAFETY: the table was patched under the builder's contract.
        let restored = unsafe {
            self.patcher
                .restore(installed.table, &installed.originals, &installed.replacements)
        };
        match restored {
            Ok(outcome) => {
                hooks::disarm();
                Ok(outcome)
            }
            Err(e) => {
                // SAFETY: as above.
                let stranded = unsafe {
                    self.patcher
                        .holds_replacements(installed.table, &installed.replacements)
                };
                if stranded {
                    tracing::warn!(
                        table = installed.table.addr(),
                        "wrappers still installed; keeping them armed for this table"
                    );
                    self.installed = Some(installed);
                } else {
                    hooks::disarm();
                }
                Err(e)
            }
        }
    }
}

impl<L: Locator, P: WriteProtect> Drop for Controller<L, P> {
    fn drop(&mut self) {
        if self.installed.is_some() {
            self.unload();
        }
    }
}

impl<L: Locator, P: WriteProtect> fmt::Debug for Controller<L, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("layout", self.patcher.layout())
            .field("state", &self.state)
            .field("table", &self.table().map(TableAddress::addr))
            .finish_non_exhaustive()
    }
}

/// Builder for [`Controller`].
///
/// ```rust,no_run
/// use slowdisk_core::{Controller, DelayConfig};
/// use slowdisk_table::{FixedLocator, TableLayout, Unprotected};
///
/// let builder = Controller::builder(FixedLocator::missing(), Unprotected)
///     .config(DelayConfig::new(100, 200))
///     .layout(TableLayout::new(0, 1, 3)?);
/// // SAFETY: a missing locator never yields a table.
/// let mut controller = unsafe { builder.build() }?;
/// assert!(controller.load().is_err());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct ControllerBuilder<L, P> {
    locator: L,
    protect: P,
    config: DelayConfig,
    layout: Option<TableLayout>,
    entropy: Arc<dyn EntropySource>,
}

impl<L: Locator, P: WriteProtect> ControllerBuilder<L, P> {
    fn new(locator: L, protect: P) -> Self {
        Self {
            locator,
            protect,
            config: DelayConfig::default(),
            #[cfg(target_os = "linux")]
            layout: Some(TableLayout::native()),
            #[cfg(not(target_os = "linux"))]
            layout: None,
            entropy: Arc::new(OsEntropy),
        }
    }

    /// Delay bounds (default `[500, 1000]`).
    #[must_use]
    pub fn config(mut self, config: DelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Table layout (default: the host's system call numbers on Linux).
    #[must_use]
    pub fn layout(mut self, layout: TableLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Entropy source for the delay generator (default [`OsEntropy`]).
    #[must_use]
    pub fn entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    /// Build the controller.
    ///
    /// # Safety
    ///
    /// Every table the locator returns must stay live for as long as the
    /// controller is active, hold at least [`TableLayout::slot_count`] slots
    /// whose read and write entries are [`slowdisk_table::RwHandler`]s, and
    /// become writable under the protection toggle.
    ///
    /// # Errors
    ///
    /// Returns [`SlowdiskError::Config`] if no layout was given on a platform
    /// without a native one.
    pub unsafe fn build(self) -> Result<Controller<L, P>> {
        let layout = self
            .layout
            .ok_or_else(|| SlowdiskError::config("table layout required on this platform"))?;
        Ok(Controller {
            config: self.config,
            locator: self.locator,
            patcher: Patcher::new(layout, self.protect),
            entropy: self.entropy,
            state: LifecycleState::Uninstalled,
            installed: None,
        })
    }
}

impl<L, P> fmt::Debug for ControllerBuilder<L, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerBuilder")
            .field("config", &self.config)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
