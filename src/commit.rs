//! Write ordering for the boot block.
//!
//! The block at the image base holds whatever the boot loader checks
//! first. It is erased as soon as a new image starts arriving and only
//! written once the rest of the image is in place, so an interrupted
//! update leaves a blank (unbootable, but recognisable) boot block and
//! never a half-old, half-new one.

use core::cmp::min;

/// Boot block bytes held back until manifestation.
#[derive(Clone, Debug)]
pub struct DeferredBlock<const B: usize> {
    address: u32,
    data: [u8; B],
    len: usize,
}

impl<const B: usize> DeferredBlock<B> {
    /// Device address of the first byte.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Bytes received so far, gaps filled with the erased value.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// How one program request divides between the boot block and the rest.
#[derive(Debug, PartialEq, Eq)]
pub struct Split<'d> {
    /// Request starts exactly at the image base.
    pub first: bool,
    /// Offset of `deferred` within the boot block.
    pub deferred_offset: usize,
    /// Part that falls in the boot block.
    pub deferred: &'d [u8],
    /// Address of `immediate`.
    pub immediate_address: u32,
    /// Part to be written right away.
    pub immediate: &'d [u8],
}

/// Decides which bytes are written now and which wait for manifestation.
#[derive(Debug)]
pub struct CommitPolicy<const B: usize> {
    boot_base: u32,
    boot_len: usize,
    erased_value: u8,
    record: Option<DeferredBlock<B>>,
}

impl<const B: usize> CommitPolicy<B> {
    /// `boot_len` is clamped to `B`.
    pub fn new(boot_base: u32, boot_len: usize, erased_value: u8) -> Self {
        Self {
            boot_base,
            boot_len: min(boot_len, B),
            erased_value,
            record: None,
        }
    }

    /// Start of the boot block.
    pub fn boot_base(&self) -> u32 {
        self.boot_base
    }

    /// Size of the boot block.
    pub fn boot_len(&self) -> usize {
        self.boot_len
    }

    /// Splits a request at the end of the boot block.
    pub fn split<'d>(&self, address: u32, data: &'d [u8]) -> Split<'d> {
        let boot_end = self.boot_base as u64 + self.boot_len as u64;
        let address64 = address as u64;

        if address < self.boot_base || address64 >= boot_end {
            return Split {
                first: false,
                deferred_offset: 0,
                deferred: &[],
                immediate_address: address,
                immediate: data,
            };
        }

        let n = min(data.len() as u64, boot_end - address64) as usize;
        let (deferred, immediate) = data.split_at(n);
        Split {
            first: address == self.boot_base,
            deferred_offset: (address - self.boot_base) as usize,
            deferred,
            immediate_address: address + n as u32,
            immediate,
        }
    }

    /// Throws away any previous record and starts a blank one.
    pub fn begin(&mut self) {
        self.record = Some(DeferredBlock {
            address: self.boot_base,
            data: [self.erased_value; B],
            len: 0,
        });
    }

    /// Merges boot block bytes into the record.
    pub fn stash(&mut self, offset: usize, bytes: &[u8]) {
        if self.record.is_none() {
            self.begin();
        }
        if let Some(record) = self.record.as_mut() {
            let end = min(offset + bytes.len(), self.boot_len);
            if offset < end {
                record.data[offset..end].copy_from_slice(&bytes[..end - offset]);
                record.len = record.len.max(end);
            }
        }
    }

    /// The record waiting for manifestation, if any.
    pub fn pending(&self) -> Option<&DeferredBlock<B>> {
        self.record.as_ref()
    }

    /// Hands over the record for the final commit.
    pub fn take(&mut self) -> Option<DeferredBlock<B>> {
        self.record.take()
    }
}
