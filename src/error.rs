//! Storage error type.
//!
//! The storage layer only reports what went wrong; turning a failure into
//! a DFU status code is up to the programmer worker.

use core::fmt;

/// Errors from the NVRAM driver and the block store, generic over the
/// SPI bus error `E`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvramError<E> {
    /// SPI transaction failed
    Bus(E),
    /// Status register never reported ready within the poll ceiling
    Timeout,
    /// Address range is beyond the device capacity
    OutOfRange,
    /// A single device write would cross a block boundary
    CrossesBlock,
    /// The device has no native command for the operation
    Unsupported,
    /// Device descriptor is inconsistent or does not fit the buffers
    InvalidDescriptor,
    /// Address is not on a block boundary
    Misaligned,
}

impl<E: fmt::Debug> fmt::Display for NvramError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "SPI transfer failed: {:?}", e),
            Self::Timeout => write!(f, "device did not become ready"),
            Self::OutOfRange => write!(f, "address out of range"),
            Self::CrossesBlock => write!(f, "write crosses a block boundary"),
            Self::Unsupported => write!(f, "operation not supported by the device"),
            Self::InvalidDescriptor => write!(f, "invalid device descriptor"),
            Self::Misaligned => write!(f, "address is not block aligned"),
        }
    }
}

#[cfg(feature = "std")]
impl<E: fmt::Debug> std::error::Error for NvramError<E> {}

/// Result type alias using the storage error type
pub type NvramResult<T, E> = core::result::Result<T, NvramError<E>>;
