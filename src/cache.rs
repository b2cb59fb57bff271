//! Byte-addressed access on top of [`Nvram`]: splits writes at block
//! boundaries, falls back to read-modify-write when the chip can only
//! write whole blocks, and keeps the last block touched in RAM.

use core::cmp::min;

use embedded_hal::spi::SpiDevice;
use log::trace;

use crate::error::{NvramError, NvramResult};
use crate::nvram::{DeviceDescriptor, Nvram};

/// Block-aligned store with a one-block cache.
///
/// `B` is the cache capacity and must be at least the device block size.
/// The cache is write-through: it never holds data the chip does not.
pub struct BlockStore<SPI, const B: usize> {
    nvram: Nvram<SPI>,
    cache: [u8; B],
    cached: Option<u32>,
}

impl<SPI: SpiDevice, const B: usize> BlockStore<SPI, B> {
    /// Fails with `InvalidDescriptor` if a device block does not fit the cache.
    pub fn new(nvram: Nvram<SPI>) -> NvramResult<Self, SPI::Error> {
        if nvram.descriptor().block_size as usize > B {
            return Err(NvramError::InvalidDescriptor);
        }
        Ok(Self {
            nvram,
            cache: [0; B],
            cached: None,
        })
    }

    /// The chip description.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        self.nvram.descriptor()
    }

    /// Total size in bytes.
    pub fn capacity(&self) -> u32 {
        self.descriptor().capacity()
    }

    /// Index of the block currently held in the cache.
    pub fn cached_block(&self) -> Option<u32> {
        self.cached
    }

    /// Drops the cached block.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Returns the driver.
    pub fn release(self) -> Nvram<SPI> {
        self.nvram
    }

    fn block_size(&self) -> usize {
        self.descriptor().block_size as usize
    }

    fn check_range(&self, address: u32, len: usize) -> NvramResult<(), SPI::Error> {
        match u32::try_from(len).ok().and_then(|len| address.checked_add(len)) {
            Some(end) if end <= self.capacity() => Ok(()),
            _ => Err(NvramError::OutOfRange),
        }
    }

    // Makes `block` the cached block, reading it on a miss.
    fn load(&mut self, block: u32) -> NvramResult<(), SPI::Error> {
        if self.cached == Some(block) {
            return Ok(());
        }
        let bs = self.block_size();
        self.cached = None;
        self.nvram.read(block * bs as u32, &mut self.cache[..bs])?;
        self.cached = Some(block);
        Ok(())
    }

    /// Writes `data` at `address`, any alignment, any length.
    pub fn write(&mut self, address: u32, data: &[u8]) -> NvramResult<(), SPI::Error> {
        self.check_range(address, data.len())?;
        let bs = self.block_size();

        let mut address = address;
        let mut rest = data;
        while !rest.is_empty() {
            let offset = address as usize % bs;
            let n = min(rest.len(), bs - offset);
            let (chunk, tail) = rest.split_at(n);
            self.write_in_block(address / bs as u32, offset, chunk)?;
            address += n as u32;
            rest = tail;
        }
        Ok(())
    }

    fn write_in_block(
        &mut self,
        block: u32,
        offset: usize,
        data: &[u8],
    ) -> NvramResult<(), SPI::Error> {
        let bs = self.block_size();
        let base = block * bs as u32;
        let end = offset + data.len();

        if self.descriptor().arbitrary_offset_write {
            self.nvram.program(base + offset as u32, data)?;
            if self.cached == Some(block) {
                self.cache[offset..end].copy_from_slice(data);
            }
            return Ok(());
        }

        trace!("nvram: read-modify-write block {}", block);
        if data.len() != bs {
            self.load(block)?;
        }
        self.cache[offset..end].copy_from_slice(data);
        self.cached = None;
        self.nvram.program(base, &self.cache[..bs])?;
        self.cached = Some(block);
        Ok(())
    }

    /// Erases the block holding `address`.
    pub fn erase(&mut self, address: u32) -> NvramResult<(), SPI::Error> {
        self.check_range(address, 1)?;
        let bs = self.block_size();
        let block = address / bs as u32;
        let erased = self.descriptor().erased_value;

        if self.descriptor().erase_opcode.is_some() {
            self.nvram.erase_block(block * bs as u32)?;
            if self.cached == Some(block) {
                self.cache[..bs].fill(erased);
            }
            return Ok(());
        }

        trace!("nvram: synthesized erase of block {}", block);
        self.cache[..bs].fill(erased);
        self.cached = None;
        self.nvram.program(block * bs as u32, &self.cache[..bs])?;
        self.cached = Some(block);
        Ok(())
    }

    /// Reads straight from the chip, bypassing the cache.
    pub fn read(&mut self, address: u32, buf: &mut [u8]) -> NvramResult<(), SPI::Error> {
        self.check_range(address, buf.len())?;
        self.nvram.read(address, buf)
    }

    /// Opens a sequential reader at `address`.
    pub fn reader(
        &mut self,
        address: u32,
    ) -> NvramResult<SequentialReader<'_, SPI, B>, SPI::Error> {
        if address >= self.capacity() {
            return Err(NvramError::OutOfRange);
        }
        Ok(SequentialReader {
            store: self,
            position: address,
        })
    }
}

/// Cursor over a [`BlockStore`].
///
/// Partial blocks at either end of a read are served from the block
/// cache, whole blocks in between are read directly.
pub struct SequentialReader<'s, SPI, const B: usize> {
    store: &'s mut BlockStore<SPI, B>,
    position: u32,
}

impl<'s, SPI: SpiDevice, const B: usize> SequentialReader<'s, SPI, B> {
    /// Address of the next byte to be read.
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Fills `buf` from the current position and advances past the bytes
    /// read. Returns fewer than `buf.len()` bytes at the end of the device.
    pub fn read(&mut self, buf: &mut [u8]) -> NvramResult<usize, SPI::Error> {
        let capacity = self.store.capacity();
        if self.position >= capacity {
            return Ok(0);
        }
        let len = min(buf.len(), (capacity - self.position) as usize);
        let bs = self.store.block_size();

        let mut done = 0;
        while done < len {
            let pos = self.position + done as u32;
            let offset = pos as usize % bs;
            let remaining = len - done;

            if offset == 0 && remaining >= bs {
                let whole = remaining - remaining % bs;
                self.store.nvram.read(pos, &mut buf[done..done + whole])?;
                done += whole;
            } else {
                let n = min(remaining, bs - offset);
                self.store.load(pos / bs as u32)?;
                buf[done..done + n].copy_from_slice(&self.store.cache[offset..offset + n]);
                done += n;
            }
        }

        self.position += len as u32;
        Ok(len)
    }
}
