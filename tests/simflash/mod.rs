#![allow(dead_code)]
//! In-memory SPI NVRAM chip speaking the command set of a [`DeviceDescriptor`].

use std::cell::RefCell;
use std::rc::Rc;

use embedded_hal::spi::{ErrorKind, ErrorType, Operation, SpiDevice};

use usbd_dfu_nvram::DeviceDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimError;

impl embedded_hal::spi::Error for SimError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Storage operations the chip performed, linear addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Erase(u32),
    Program(u32, usize),
    Read(u32, usize),
    WriteEnable,
}

pub struct SimState {
    pub desc: DeviceDescriptor,
    pub mem: Vec<u8>,
    pub wel: bool,
    /// Status reads left that report busy.
    pub busy_polls: u32,
    /// Busy status reads after each program or erase.
    pub program_busy_polls: u32,
    pub stuck_busy: bool,
    pub fail_program_at: Option<u32>,
    pub corrupt_program_at: Option<u32>,
    pub fail_erase_at: Option<u32>,
    pub ops: Vec<Op>,
    /// Command bytes of every transaction.
    pub commands: Vec<Vec<u8>>,
    pub status_reads: usize,
}

#[derive(Clone)]
pub struct SimFlash(pub Rc<RefCell<SimState>>);

impl SimFlash {
    pub fn new(desc: DeviceDescriptor) -> Self {
        Self::with_fill(desc, desc.erased_value)
    }

    pub fn with_fill(desc: DeviceDescriptor, fill: u8) -> Self {
        SimFlash(Rc::new(RefCell::new(SimState {
            desc,
            mem: vec![fill; desc.capacity() as usize],
            wel: false,
            busy_polls: 0,
            program_busy_polls: 2,
            stuck_busy: false,
            fail_program_at: None,
            corrupt_program_at: None,
            fail_erase_at: None,
            ops: Vec::new(),
            commands: Vec::new(),
            status_reads: 0,
        })))
    }

    pub fn state(&self) -> std::cell::RefMut<'_, SimState> {
        self.0.borrow_mut()
    }

    pub fn mem(&self) -> Vec<u8> {
        self.0.borrow().mem.clone()
    }

    /// Program and erase operations, in order.
    pub fn writes(&self) -> Vec<Op> {
        self.0
            .borrow()
            .ops
            .iter()
            .copied()
            .filter(|op| matches!(op, Op::Program(..) | Op::Erase(..)))
            .collect()
    }

    pub fn reads(&self) -> usize {
        self.0
            .borrow()
            .ops
            .iter()
            .filter(|op| matches!(op, Op::Read(..)))
            .count()
    }

    pub fn clear_log(&self) {
        let mut s = self.0.borrow_mut();
        s.ops.clear();
        s.commands.clear();
    }
}

impl SimState {
    fn decode_address(&self, cmd: &[u8]) -> u32 {
        let width = self.desc.address_width as usize;
        let raw = cmd[1..1 + width]
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | *b as u32);
        match self.desc.block_address_shift {
            0 => raw,
            shift => {
                let block = raw >> shift;
                let offset = raw & ((1 << shift) - 1);
                block * self.desc.block_size + offset
            }
        }
    }

    fn status_byte(&mut self) -> u8 {
        self.status_reads += 1;
        let busy = if self.stuck_busy {
            true
        } else if self.busy_polls > 0 {
            self.busy_polls -= 1;
            true
        } else {
            false
        };
        let ready_level = if busy {
            !self.desc.ready_value
        } else {
            self.desc.ready_value
        };
        if ready_level {
            1 << self.desc.ready_bit
        } else {
            0
        }
    }

    fn check_idle(&self) {
        assert!(
            self.busy_polls == 0 && !self.stuck_busy,
            "command issued while the chip is busy"
        );
    }

    fn take_write_enable(&mut self) {
        if self.desc.needs_write_enable {
            assert!(self.wel, "write without write enable");
            self.wel = false;
        }
    }
}

impl ErrorType for SimFlash {
    type Error = SimError;
}

impl SpiDevice for SimFlash {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), SimError> {
        let mut s = self.0.borrow_mut();
        let desc = s.desc;

        let cmd = match operations.first() {
            Some(Operation::Write(cmd)) => cmd.to_vec(),
            _ => panic!("transaction must start with a command"),
        };
        let opcode = cmd[0];
        s.commands.push(cmd.clone());
        let width = desc.address_width as usize;

        if opcode == desc.status_opcode {
            let status = s.status_byte();
            match operations.get_mut(1) {
                Some(Operation::Read(buf)) => buf.fill(status),
                _ => panic!("status read without a read phase"),
            }
            return Ok(());
        }

        s.check_idle();

        if desc.needs_write_enable && opcode == desc.write_enable_opcode {
            s.wel = true;
            s.ops.push(Op::WriteEnable);
            return Ok(());
        }

        if Some(opcode) == desc.erase_opcode {
            assert_eq!(cmd.len(), 1 + width);
            s.take_write_enable();
            let address = s.decode_address(&cmd);
            assert_eq!(address % desc.block_size, 0, "unaligned erase");
            if s.fail_erase_at == Some(address) {
                return Err(SimError);
            }
            let start = address as usize;
            let end = start + desc.block_size as usize;
            s.mem[start..end].fill(desc.erased_value);
            s.ops.push(Op::Erase(address));
            s.busy_polls = s.program_busy_polls;
            return Ok(());
        }

        if opcode == desc.write_opcode {
            assert_eq!(cmd.len(), 1 + width);
            s.take_write_enable();
            let address = s.decode_address(&cmd);
            let data = match operations.get(1) {
                Some(Operation::Write(data)) => data.to_vec(),
                _ => panic!("program without a data phase"),
            };
            if !desc.arbitrary_offset_write {
                assert_eq!(address % desc.block_size, 0, "partial block write");
                assert_eq!(data.len(), desc.block_size as usize, "partial block write");
            }
            if s.fail_program_at == Some(address) {
                return Err(SimError);
            }
            let start = address as usize;
            s.mem[start..start + data.len()].copy_from_slice(&data);
            if s.corrupt_program_at == Some(address) {
                s.mem[start] ^= 0x5a;
            }
            s.ops.push(Op::Program(address, data.len()));
            s.busy_polls = s.program_busy_polls;
            return Ok(());
        }

        if opcode == desc.read_opcode {
            assert_eq!(cmd.len(), 1 + width + desc.read_padding as usize);
            let address = s.decode_address(&cmd) as usize;
            match operations.get_mut(1) {
                Some(Operation::Read(buf)) => {
                    let len = buf.len();
                    buf.copy_from_slice(&s.mem[address..address + len]);
                    s.ops.push(Op::Read(address as u32, len));
                }
                _ => panic!("read without a read phase"),
            }
            return Ok(());
        }

        panic!("unknown opcode {:#04x}", opcode);
    }
}
