//! Saved execution state of a suspended flow of control.

/// One suspended context: callee-saved state as the platform defines it.
///
/// The portable kernel never interprets the contents; it only reserves the
/// storage (inside each process block and each idle stack) and hands pairs
/// of contexts to [`Platform::context_switch`](crate::Platform::context_switch).
/// Sixteen words cover the callee-saved file of the targets we care about;
/// hosted test platforms use the words as scratch storage instead.
#[repr(C, align(16))]
pub struct KernelContext {
    words: [usize; 16],
}

impl Default for KernelContext {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelContext {
    #[must_use]
    pub const fn new() -> Self {
        Self { words: [0; 16] }
    }

    /// Raw view for the platform's save/restore code.
    #[must_use]
    pub fn words(&self) -> &[usize; 16] {
        &self.words
    }

    /// Mutable raw view for the platform's save/restore code.
    pub fn words_mut(&mut self) -> &mut [usize; 16] {
        &mut self.words
    }
}
