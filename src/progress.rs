use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::protocol::DfuStatusCode;

/// Cross-context signal between the DFU session and the programmer worker.
///
/// The session marks a block as outstanding when it hands it off, the
/// worker clears the counter when it is done with it. A failure is
/// stored before the counter is cleared, so once the session observes
/// zero outstanding bytes the error (if any) is visible too.
///
/// Only plain loads and stores are used, which keeps this usable on
/// cores without atomic read-modify-write instructions.
#[derive(Debug)]
pub struct BlockProgress {
    outstanding: AtomicU32,
    error: AtomicU8,
}

impl Default for BlockProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockProgress {
    /// Nothing outstanding, no error.
    pub const fn new() -> Self {
        Self {
            outstanding: AtomicU32::new(0),
            error: AtomicU8::new(DfuStatusCode::OK as u8),
        }
    }

    /// Marks `len` bytes as handed to the worker.
    pub fn begin(&self, len: u32) {
        self.outstanding.store(len, Ordering::Release);
    }

    /// Bytes the worker still owns.
    pub fn outstanding(&self) -> u32 {
        self.outstanding.load(Ordering::Acquire)
    }

    /// `true` while a request is queued or being programmed.
    pub fn is_busy(&self) -> bool {
        self.outstanding() != 0
    }

    /// Worker side: the current request is finished.
    pub fn complete(&self) {
        self.outstanding.store(0, Ordering::Release);
    }

    /// Worker side: the current request failed with `status`.
    pub fn fail(&self, status: DfuStatusCode) {
        self.error.store(status as u8, Ordering::Release);
        self.complete();
    }

    /// Session side: fetch and clear a latched failure.
    pub fn take_error(&self) -> Option<DfuStatusCode> {
        let raw = self.error.load(Ordering::Acquire);
        if raw == DfuStatusCode::OK as u8 {
            return None;
        }
        self.error.store(DfuStatusCode::OK as u8, Ordering::Release);
        DfuStatusCode::from_u8(raw)
    }

    /// Drops a latched failure without reporting it.
    pub fn clear_error(&self) {
        self.error.store(DfuStatusCode::OK as u8, Ordering::Release);
    }
}
