#![allow(dead_code)]
use usb_device::class::UsbClass;
use usbd_class_tester::prelude::*;

use usbd_dfu_nvram::*;

// State
pub const APP_IDLE: u8 = 0;
pub const APP_DETACH: u8 = 1;
pub const DFU_IDLE: u8 = 2;
pub const DFU_DNLOAD_SYNC: u8 = 3;
pub const DFU_DN_BUSY: u8 = 4;
pub const DFU_DNLOAD_IDLE: u8 = 5;
pub const DFU_MANIFEST_SYNC: u8 = 6;
pub const DFU_MANIFEST: u8 = 7;
pub const DFU_MANIFEST_WAIT_RESET: u8 = 8;
pub const DFU_UPLOAD_IDLE: u8 = 9;
pub const DFU_ERROR: u8 = 10;

pub const STATUS_OK: u8 = 0x00;
pub const STATUS_ERR_TARGET: u8 = 0x01;
pub const STATUS_ERR_FILE: u8 = 0x02;
pub const STATUS_ERR_WRITE: u8 = 0x03;
pub const STATUS_ERR_ERASE: u8 = 0x04;
pub const STATUS_ERR_CHECK_ERASED: u8 = 0x05;
pub const STATUS_ERR_PROG: u8 = 0x06;
pub const STATUS_ERR_VERIFY: u8 = 0x07;
pub const STATUS_ERR_ADDRESS: u8 = 0x08;
pub const STATUS_ERR_NOTDONE: u8 = 0x09;
pub const STATUS_ERR_FIRMWARE: u8 = 0x0A;
pub const STATUS_ERR_VENDOR: u8 = 0x0B;
pub const STATUS_ERR_USBR: u8 = 0x0C;
pub const STATUS_ERR_POR: u8 = 0x0D;
pub const STATUS_ERR_UNKNOWN: u8 = 0x0E;
pub const STATUS_ERR_STALLED_PKT: u8 = 0x0F;

// Requests
pub const DETACH: u8 = 0x0;
pub const DNLOAD: u8 = 0x1;
pub const UPLOAD: u8 = 0x2;
pub const GETSTATUS: u8 = 0x3;
pub const CLRSTATUS: u8 = 0x4;
pub const GETSTATE: u8 = 0x5;
pub const ABORT: u8 = 0x6;
pub const DISCONNECT: u8 = 0x7;

pub trait DeviceExt<C> {
    fn upload(&mut self, cls: &mut C, block_num: u16, length: usize) -> AnyResult<Vec<u8>>;

    fn read(
        &mut self,
        cls: &mut C,
        req: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> AnyResult<Vec<u8>>;
    fn write(
        &mut self,
        cls: &mut C,
        req: u8,
        value: u16,
        index: u16,
        length: u16,
        data: &[u8],
    ) -> AnyResult<Vec<u8>>;

    fn download(&mut self, cls: &mut C, block_num: u16, data: &[u8]) -> AnyResult<Vec<u8>>;
    fn get_status(&mut self, cls: &mut C) -> AnyResult<Vec<u8>>;
    fn clear_status(&mut self, cls: &mut C) -> AnyResult<Vec<u8>>;
    fn get_state(&mut self, cls: &mut C) -> AnyResult<Vec<u8>>;
    fn abort(&mut self, cls: &mut C) -> AnyResult<Vec<u8>>;
    fn disconnect(&mut self, cls: &mut C) -> AnyResult<Vec<u8>>;
}

impl<'a, C, M> DeviceExt<C> for Device<'a, C, M>
where
    C: UsbClass<EmulatedUsbBus>,
    M: UsbDeviceCtx<C<'a> = C>,
{
    fn read(
        &mut self,
        cls: &mut C,
        req: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> AnyResult<Vec<u8>> {
        self.control_read(
            cls,
            CtrRequestType::to_host().class().interface(),
            req,
            value,
            index,
            length,
        )
    }

    fn write(
        &mut self,
        cls: &mut C,
        req: u8,
        value: u16,
        index: u16,
        length: u16,
        data: &[u8],
    ) -> AnyResult<Vec<u8>> {
        self.control_write(
            cls,
            CtrRequestType::to_device().class().interface(),
            req,
            value,
            index,
            length,
            data,
        )
    }

    fn download(&mut self, cls: &mut C, block_num: u16, data: &[u8]) -> AnyResult<Vec<u8>> {
        if data.len() > u16::MAX as usize {
            return Err(AnyUsbError::DataConversion);
        }
        self.write(cls, DNLOAD, block_num, 0, data.len() as u16, data)
    }

    fn upload(&mut self, cls: &mut C, block_num: u16, length: usize) -> AnyResult<Vec<u8>> {
        if length > u16::MAX as usize {
            return Err(AnyUsbError::DataConversion);
        }
        self.read(cls, UPLOAD, block_num, 0, length as u16)
    }

    fn get_status(&mut self, cls: &mut C) -> AnyResult<Vec<u8>> {
        self.read(cls, GETSTATUS, 0, 0, 6)
    }

    fn clear_status(&mut self, cls: &mut C) -> AnyResult<Vec<u8>> {
        self.write(cls, CLRSTATUS, 0, 0, 0, &[])
    }

    fn get_state(&mut self, cls: &mut C) -> AnyResult<Vec<u8>> {
        self.read(cls, GETSTATE, 0, 0, 1)
    }

    fn abort(&mut self, cls: &mut C) -> AnyResult<Vec<u8>> {
        self.write(cls, ABORT, 0, 0, 0, &[])
    }

    fn disconnect(&mut self, cls: &mut C) -> AnyResult<Vec<u8>> {
        self.write(cls, DISCONNECT, 0, 0, 0, &[])
    }
}

pub fn status(status: u8, poll_timeout: u32, state: u8) -> [u8; 6] {
    let t = poll_timeout.to_le_bytes();
    [status, t[0], t[1], t[2], state, 0]
}

/// Deterministic image contents: [0,0, 1,0, 2,0, ... 255,0, 0,1, ...]
pub fn test_image(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| {
            if i & 1 == 1 {
                ((i >> 9) & 0xff) as u8
            } else {
                ((i >> 1) & 0xff) as u8
            }
        })
        .collect()
}

/// Session-level request driver, no USB involved.
pub struct Host<'s, 'a, H: DfuHandler, const N: usize> {
    pub session: &'s mut DfuSession<'a, N>,
    pub handler: &'s mut H,
}

/// What the host got back: `None` is a stall.
pub type HostReply = Option<Vec<u8>>;

impl<'s, 'a, H: DfuHandler, const N: usize> Host<'s, 'a, H, N> {
    pub fn new(session: &'s mut DfuSession<'a, N>, handler: &'s mut H) -> Self {
        Self { session, handler }
    }

    pub fn request(&mut self, req: u8, value: u16, length: u16, data: &[u8]) -> HostReply {
        let request = DfuRequest::new(req, value, length);
        let reply = match self.session.handle_request(&request, data, self.handler) {
            Reply::Ack => Some(Vec::new()),
            Reply::Data(d) => Some(d.to_vec()),
            Reply::Stall => None,
        };
        if reply.is_some() {
            self.session.complete_transfer(self.handler);
        }
        reply
    }

    pub fn download(&mut self, block_num: u16, data: &[u8]) -> HostReply {
        self.request(DNLOAD, block_num, data.len() as u16, data)
    }

    pub fn upload(&mut self, block_num: u16, length: u16) -> HostReply {
        self.request(UPLOAD, block_num, length, &[])
    }

    pub fn get_status(&mut self) -> HostReply {
        self.request(GETSTATUS, 0, 6, &[])
    }

    pub fn get_state(&mut self) -> HostReply {
        self.request(GETSTATE, 0, 1, &[])
    }

    pub fn clear_status(&mut self) -> HostReply {
        self.request(CLRSTATUS, 0, 0, &[])
    }

    pub fn abort(&mut self) -> HostReply {
        self.request(ABORT, 0, 0, &[])
    }
}

/// Handler that records everything and serves uploads from a Vec.
pub struct Recorder<'a> {
    pub progress: &'a BlockProgress,
    pub events: Vec<DfuEvent>,
    pub blocks: Vec<(u32, Vec<u8>)>,
    pub image: Vec<u8>,
    pub manifests: usize,
    /// Clear the progress counter as soon as a block is received.
    pub auto_complete: bool,
    pub download_result: Result<(), DfuStatusCode>,
    pub manifest_result: Result<(), DfuStatusCode>,
    pub resets: usize,
}

impl<'a> Recorder<'a> {
    pub fn new(progress: &'a BlockProgress) -> Self {
        Self {
            progress,
            events: Vec::new(),
            blocks: Vec::new(),
            image: Vec::new(),
            manifests: 0,
            auto_complete: true,
            download_result: Ok(()),
            manifest_result: Ok(()),
            resets: 0,
        }
    }
}

impl<'a> DfuHandler for Recorder<'a> {
    fn notify(&mut self, event: DfuEvent) {
        self.events.push(event);
    }

    fn download_block(&mut self, offset: u32, data: &[u8]) -> Result<(), DfuStatusCode> {
        self.download_result?;
        self.blocks.push((offset, data.to_vec()));
        if self.auto_complete {
            self.progress.complete();
        }
        Ok(())
    }

    fn upload_block(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, DfuStatusCode> {
        let offset = offset as usize;
        if offset >= self.image.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.image.len() - offset);
        buf[..n].copy_from_slice(&self.image[offset..offset + n]);
        Ok(n)
    }

    fn manifest(&mut self) -> Result<(), DfuStatusCode> {
        self.manifests += 1;
        self.manifest_result
    }

    fn usb_reset(&mut self) {
        self.resets += 1;
    }
}
