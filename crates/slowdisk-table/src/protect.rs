//! Write-protection toggles for the memory holding a dispatch table.
//!
//! Patching happens inside a [`WriteWindow`]: protection is lifted when the
//! window opens and reinstated when it closes or is dropped, on every exit
//! path. Keep the window as short as possible. Nothing here serializes
//! against other processors reading the table while it is open.

use crate::error::Result;
use crate::layout::{SLOT_WIDTH, TableAddress};

/// Byte span covering the slots about to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSpan {
    start: usize,
    len: usize,
}

impl SlotSpan {
    /// Span covering slots `first..=last` of `table`.
    #[must_use]
    pub fn covering(table: TableAddress, first: usize, last: usize) -> Self {
        let (first, last) = (first.min(last), first.max(last));
        Self {
            start: table.addr() + first * SLOT_WIDTH,
            len: (last - first + 1) * SLOT_WIDTH,
        }
    }

    /// First byte of the span.
    #[must_use]
    pub const fn start(&self) -> usize {
        self.start
    }

    /// Length of the span in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the span covers no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Expand to whole pages: returns `(page_start, byte_len)`.
    ///
    /// `page_size` must be a power of two.
    #[must_use]
    pub fn page_aligned(&self, page_size: usize) -> (usize, usize) {
        debug_assert!(page_size.is_power_of_two());
        let start = self.start & !(page_size - 1);
        let end = (self.start + self.len).div_ceil(page_size) * page_size;
        (start, end - start)
    }
}

/// Mechanism for temporarily making a table writable.
pub trait WriteProtect {
    /// State needed to put protection back the way it was.
    type Token;

    /// Make `span` writable, returning the prior state.
    fn lift(&self, span: SlotSpan) -> Result<Self::Token>;

    /// Restore the state captured by [`WriteProtect::lift`].
    fn reinstate(&self, span: SlotSpan, token: Self::Token) -> Result<()>;
}

impl<P: WriteProtect + ?Sized> WriteProtect for &P {
    type Token = P::Token;

    fn lift(&self, span: SlotSpan) -> Result<Self::Token> {
        (**self).lift(span)
    }

    fn reinstate(&self, span: SlotSpan, token: Self::Token) -> Result<()> {
        (**self).reinstate(span, token)
    }
}

/// Scoped acquisition of the protection-lifted state.
///
/// Prefer [`WriteWindow::close`], which reports reinstate failures. Dropping
/// an open window reinstates too, logging any failure.
#[must_use = "protection is reinstated as soon as the window is dropped"]
pub struct WriteWindow<'p, P: WriteProtect> {
    protect: &'p P,
    span: SlotSpan,
    token: Option<P::Token>,
}

impl<'p, P: WriteProtect> WriteWindow<'p, P> {
    /// Lift protection over `span`.
    ///
    /// # Errors
    ///
    /// Returns the toggle's error; protection is unchanged in that case.
    pub fn open(protect: &'p P, span: SlotSpan) -> Result<Self> {
        let token = protect.lift(span)?;
        tracing::debug!(start = span.start, len = span.len, "write window opened");
        Ok(Self {
            protect,
            span,
            token: Some(token),
        })
    }

    /// The span this window covers.
    #[must_use]
    pub const fn span(&self) -> SlotSpan {
        self.span
    }

    /// Reinstate protection now.
    ///
    /// # Errors
    ///
    /// Returns the toggle's error if protection could not be reinstated.
    pub fn close(mut self) -> Result<()> {
        match self.token.take() {
            Some(token) => {
                let result = self.protect.reinstate(self.span, token);
                tracing::debug!(start = self.span.start, ok = result.is_ok(), "write window closed");
                result
            }
            None => Ok(()),
        }
    }
}

impl<P: WriteProtect> Drop for WriteWindow<'_, P> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.protect.reinstate(self.span, token) {
                tracing::error!(
                    start = self.span.start,
                    len = self.span.len,
                    "failed to reinstate write protection: {e}"
                );
            }
        }
    }
}

/// No-op toggle for tables that already live in writable memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unprotected;

impl WriteProtect for Unprotected {
    type Token = ();

    fn lift(&self, _span: SlotSpan) -> Result<()> {
        Ok(())
    }

    fn reinstate(&self, _span: SlotSpan, (): ()) -> Result<()> {
        Ok(())
    }
}
