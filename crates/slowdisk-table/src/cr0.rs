//! x86_64 write-protect toggle through the CR0.WP bit.
//!
//! With CR0.WP clear, ring-0 code may write to read-only pages. This is the
//! toggle a kernel module uses to patch the system call table. It only works
//! in ring 0; executing it in user mode raises a general protection fault.
//! Kernels that pin CR0 bits (Linux 5.3+) silently restore WP, in which case
//! the following slot store faults.

use std::arch::asm;

use crate::error::Result;
use crate::protect::{SlotSpan, WriteProtect};

/// Write-protect bit of CR0.
pub const CR0_WP: usize = 1 << 16;

/// CR0 value with the write-protect bit cleared.
#[must_use]
pub const fn without_write_protect(cr0: usize) -> usize {
    cr0 & !CR0_WP
}

/// Toggle that clears CR0.WP for the duration of a write window.
///
/// Covers every page at once; the span is ignored. The window should run
/// with preemption disabled so it stays on one processor.
#[derive(Debug)]
pub struct Cr0WriteProtect {
    _ring0: (),
}

impl Cr0WriteProtect {
    /// Create the toggle.
    ///
    /// # Safety
    ///
    /// The caller must be executing in ring 0, and must not migrate to
    /// another processor between [`WriteProtect::lift`] and
    /// [`WriteProtect::reinstate`].
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _ring0: () }
    }

    fn read_cr0(&self) -> usize {
        let cr0: usize;
        // SAFETY: ring 0 is guaranteed by the constructor; reading CR0 has no side effects.
        unsafe { asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags)) };
        cr0
    }

    fn write_cr0(&self, cr0: usize) {
        // SAFETY: ring 0 is guaranteed by the constructor; only WP differs from the live value.
        unsafe { asm!("mov cr0, {}", in(reg) cr0, options(nostack, preserves_flags)) };
    }
}

impl WriteProtect for Cr0WriteProtect {
    type Token = usize;

    fn lift(&self, _span: SlotSpan) -> Result<usize> {
        let cr0 = self.read_cr0();
        self.write_cr0(without_write_protect(cr0));
        Ok(cr0)
    }

    fn reinstate(&self, _span: SlotSpan, prior: usize) -> Result<()> {
        self.write_cr0(prior);
        Ok(())
    }
}
