//! Primitive driver for a serial NVRAM chip: one SPI transaction per
//! command, status polling, no caching.

use embedded_hal::spi::{Operation, SpiDevice};
use log::{debug, trace};

use crate::error::{NvramError, NvramResult};

/// Write (page program)
pub const OPCODE_WRITE: u8 = 0x02;
/// Read data
pub const OPCODE_READ: u8 = 0x03;
/// Write enable
pub const OPCODE_WREN: u8 = 0x06;
/// Read status register
pub const OPCODE_RDSR: u8 = 0x05;

const MAX_ADDRESS_WIDTH: usize = 4;
const MAX_READ_PADDING: usize = 8;
const MAX_COMMAND_LEN: usize = 1 + MAX_ADDRESS_WIDTH + MAX_READ_PADDING;

/// Geometry and command set of one chip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceDescriptor {
    /// Erase/write block size in bytes.
    pub block_size: u32,
    /// Number of blocks.
    pub block_count: u32,
    /// Address bytes sent after an opcode, 1 to 4, big-endian.
    pub address_width: u8,
    /// Read opcode.
    pub read_opcode: u8,
    /// Write opcode.
    pub write_opcode: u8,
    /// Native block erase opcode. `None` erases by writing a block of
    /// `erased_value`.
    pub erase_opcode: Option<u8>,
    /// Read status register opcode.
    pub status_opcode: u8,
    /// Write enable opcode, sent before writes and erases when
    /// `needs_write_enable` is set.
    pub write_enable_opcode: u8,
    /// Status register bit that signals ready.
    pub ready_bit: u8,
    /// Value of `ready_bit` when the device is ready.
    pub ready_value: bool,
    /// Device requires the write enable handshake.
    pub needs_write_enable: bool,
    /// Device can write any byte range within a block. Otherwise whole
    /// blocks are written with read-modify-write.
    pub arbitrary_offset_write: bool,
    /// Dummy bytes clocked out after a read command's address.
    pub read_padding: u8,
    /// Block index is sent shifted left by this many bits, ORed with the
    /// in-block offset. 0 means linear addressing.
    pub block_address_shift: u8,
    /// Byte value of erased memory.
    pub erased_value: u8,
    /// Largest single read transaction.
    pub max_read_chunk: u32,
    /// Status polls before a busy device is declared dead.
    pub max_status_polls: u32,
}

impl DeviceDescriptor {
    /// 25-series SPI EEPROM: byte writable within a page, no erase
    /// command, write enable required, WIP in status bit 0.
    pub const fn spi_eeprom(page_size: u32, page_count: u32) -> Self {
        let capacity = page_size * page_count;
        Self {
            block_size: page_size,
            block_count: page_count,
            address_width: if capacity <= 0x1_0000 { 2 } else { 3 },
            read_opcode: OPCODE_READ,
            write_opcode: OPCODE_WRITE,
            erase_opcode: None,
            status_opcode: OPCODE_RDSR,
            write_enable_opcode: OPCODE_WREN,
            ready_bit: 0,
            ready_value: false,
            needs_write_enable: true,
            arbitrary_offset_write: true,
            read_padding: 0,
            block_address_shift: 0,
            erased_value: 0xff,
            max_read_chunk: 256,
            max_status_polls: 100_000,
        }
    }

    /// AT45DB-style DataFlash with 1056 byte pages: page program through
    /// buffer with built-in erase, page erase, continuous array read with
    /// four dummy bytes, ready flag in status bit 7.
    pub const fn at45db_1056(page_count: u32) -> Self {
        Self {
            block_size: 1056,
            block_count: page_count,
            address_width: 3,
            read_opcode: 0xE8,
            write_opcode: 0x82,
            erase_opcode: Some(0x81),
            status_opcode: 0xD7,
            write_enable_opcode: OPCODE_WREN,
            ready_bit: 7,
            ready_value: true,
            needs_write_enable: false,
            arbitrary_offset_write: false,
            read_padding: 4,
            block_address_shift: 11,
            erased_value: 0xff,
            max_read_chunk: 1056,
            max_status_polls: 100_000,
        }
    }

    /// Total size in bytes.
    pub const fn capacity(&self) -> u32 {
        self.block_size * self.block_count
    }

    /// Start address of the block holding `address`.
    pub const fn block_start(&self, address: u32) -> u32 {
        address - address % self.block_size
    }

    fn is_valid(&self) -> bool {
        self.block_size != 0
            && self.block_count != 0
            && self.block_size.checked_mul(self.block_count).is_some()
            && (1..=MAX_ADDRESS_WIDTH as u8).contains(&self.address_width)
            && (self.read_padding as usize) <= MAX_READ_PADDING
            && self.ready_bit < 8
            && self.max_read_chunk != 0
            && self.block_address_shift < 32
            && (self.block_address_shift == 0 || self.block_size <= 1 << self.block_address_shift)
    }
}

/// NVRAM chip on an SPI bus.
pub struct Nvram<SPI> {
    spi: SPI,
    desc: DeviceDescriptor,
}

impl<SPI: SpiDevice> Nvram<SPI> {
    /// Wraps `spi`, checking the descriptor for consistency.
    pub fn new(spi: SPI, desc: DeviceDescriptor) -> NvramResult<Self, SPI::Error> {
        if !desc.is_valid() {
            return Err(NvramError::InvalidDescriptor);
        }
        Ok(Self { spi, desc })
    }

    /// The chip description.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.desc
    }

    /// Returns the SPI device.
    pub fn release(self) -> SPI {
        self.spi
    }

    fn device_address(&self, address: u32) -> u32 {
        match self.desc.block_address_shift {
            0 => address,
            shift => {
                let block = address / self.desc.block_size;
                let offset = address % self.desc.block_size;
                (block << shift) | offset
            }
        }
    }

    // Opcode, address, then `padding` zero bytes.
    fn command(
        &self,
        opcode: u8,
        address: u32,
        padding: usize,
        buf: &mut [u8; MAX_COMMAND_LEN],
    ) -> usize {
        let width = self.desc.address_width as usize;
        let addr = self.device_address(address).to_be_bytes();
        buf[0] = opcode;
        buf[1..1 + width].copy_from_slice(&addr[MAX_ADDRESS_WIDTH - width..]);
        buf[1 + width..1 + width + padding].fill(0);
        1 + width + padding
    }

    fn check_range(&self, address: u32, len: usize) -> NvramResult<(), SPI::Error> {
        match u32::try_from(len).ok().and_then(|len| address.checked_add(len)) {
            Some(end) if end <= self.desc.capacity() => Ok(()),
            _ => Err(NvramError::OutOfRange),
        }
    }

    /// Reads the status register.
    pub fn read_status(&mut self) -> NvramResult<u8, SPI::Error> {
        let mut status = [0u8; 1];
        self.spi
            .transaction(&mut [
                Operation::Write(&[self.desc.status_opcode]),
                Operation::Read(&mut status),
            ])
            .map_err(NvramError::Bus)?;
        Ok(status[0])
    }

    /// Polls the status register until the ready bit has the expected
    /// value, at most `max_status_polls` times.
    pub fn wait_ready(&mut self) -> NvramResult<(), SPI::Error> {
        for _ in 0..self.desc.max_status_polls {
            let status = self.read_status()?;
            if ((status >> self.desc.ready_bit) & 1 == 1) == self.desc.ready_value {
                return Ok(());
            }
        }
        debug!("nvram: device busy after {} polls", self.desc.max_status_polls);
        Err(NvramError::Timeout)
    }

    /// Sends the write enable handshake if the device needs it.
    pub fn write_enable(&mut self) -> NvramResult<(), SPI::Error> {
        if self.desc.needs_write_enable {
            self.spi
                .write(&[self.desc.write_enable_opcode])
                .map_err(NvramError::Bus)?;
        }
        Ok(())
    }

    /// Native erase of the block starting at `address`.
    pub fn erase_block(&mut self, address: u32) -> NvramResult<(), SPI::Error> {
        let opcode = self.desc.erase_opcode.ok_or(NvramError::Unsupported)?;
        self.check_range(address, 1)?;
        let address = self.desc.block_start(address);
        trace!("nvram: erase {:#x}", address);

        self.wait_ready()?;
        self.write_enable()?;
        let mut cmd = [0u8; MAX_COMMAND_LEN];
        let len = self.command(opcode, address, 0, &mut cmd);
        self.spi.write(&cmd[..len]).map_err(NvramError::Bus)?;
        self.wait_ready()
    }

    /// Writes `data` at `address`. The range must lie within one block.
    pub fn program(&mut self, address: u32, data: &[u8]) -> NvramResult<(), SPI::Error> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_range(address, data.len())?;
        let last = address + data.len() as u32 - 1;
        if address / self.desc.block_size != last / self.desc.block_size {
            return Err(NvramError::CrossesBlock);
        }
        trace!("nvram: program {:#x}, {} bytes", address, data.len());

        self.wait_ready()?;
        self.write_enable()?;
        let mut cmd = [0u8; MAX_COMMAND_LEN];
        let len = self.command(self.desc.write_opcode, address, 0, &mut cmd);
        self.spi
            .transaction(&mut [Operation::Write(&cmd[..len]), Operation::Write(data)])
            .map_err(NvramError::Bus)?;
        self.wait_ready()
    }

    /// Reads `buf.len()` bytes from `address` in chunks of at most
    /// `max_read_chunk` bytes.
    pub fn read(&mut self, address: u32, buf: &mut [u8]) -> NvramResult<(), SPI::Error> {
        self.check_range(address, buf.len())?;
        let chunk_size = self.desc.max_read_chunk as usize;
        let padding = self.desc.read_padding as usize;

        let mut address = address;
        for chunk in buf.chunks_mut(chunk_size) {
            self.wait_ready()?;
            let mut cmd = [0u8; MAX_COMMAND_LEN];
            let len = self.command(self.desc.read_opcode, address, padding, &mut cmd);
            self.spi
                .transaction(&mut [Operation::Write(&cmd[..len]), Operation::Read(chunk)])
                .map_err(NvramError::Bus)?;
            address += chunk.len() as u32;
        }
        Ok(())
    }
}
