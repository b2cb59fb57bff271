//! DFU 1.1 wire-level types: request codes, states, status codes and
//! the `DFU_GETSTATUS` reply layout.

pub(crate) const USB_CLASS_APPLICATION_SPECIFIC: u8 = 0xFE;
pub(crate) const USB_SUBCLASS_DFU: u8 = 0x01;
pub(crate) const USB_PROTOCOL_DFU_MODE: u8 = 0x02;

pub(crate) const DESC_DESCTYPE_DFU: u8 = 0x21;

/// Class request codes, including the vendor `DISCONNECT` extension.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuRequestCode {
    /// `DFU_DETACH`
    Detach = 0x00,
    /// `DFU_DNLOAD`
    Dnload = 0x01,
    /// `DFU_UPLOAD`
    Upload = 0x02,
    /// `DFU_GETSTATUS`
    GetStatus = 0x03,
    /// `DFU_CLRSTATUS`
    ClrStatus = 0x04,
    /// `DFU_GETSTATE`
    GetState = 0x05,
    /// `DFU_ABORT`
    Abort = 0x06,
    /// Vendor extension: leave DFU mode after the current transfer completes.
    Disconnect = 0x07,
}

impl TryFrom<u8> for DfuRequestCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => DfuRequestCode::Detach,
            0x01 => DfuRequestCode::Dnload,
            0x02 => DfuRequestCode::Upload,
            0x03 => DfuRequestCode::GetStatus,
            0x04 => DfuRequestCode::ClrStatus,
            0x05 => DfuRequestCode::GetState,
            0x06 => DfuRequestCode::Abort,
            0x07 => DfuRequestCode::Disconnect,
            other => return Err(other),
        })
    }
}

/// One class request as seen by the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DfuRequest {
    /// `bRequest`
    pub request: u8,
    /// `wValue`, the block number for `DFU_DNLOAD` and `DFU_UPLOAD`.
    pub block_num: u16,
    /// `wLength`
    pub length: u16,
}

impl DfuRequest {
    /// Builds a request from its `bRequest`, `wValue` and `wLength` fields.
    pub const fn new(request: u8, block_num: u16, length: u16) -> Self {
        Self {
            request,
            block_num,
            length,
        }
    }

    /// Decoded request code, or `Err` with the raw code if unknown.
    pub fn code(&self) -> Result<DfuRequestCode, u8> {
        DfuRequestCode::try_from(self.request)
    }
}

/// Device state, as reported in `bState`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuState {
    /// Device is running its normal application.
    AppIdle = 0,
    /// Device is running its normal application, has received the DFU_DETACH request, and is waiting for a USB reset.
    AppDetach = 1,
    /// Device is operating in the DFU mode and is waiting for requests.
    DfuIdle = 2,
    /// Device has received a block and is waiting for the host to solicit the status via DFU_GETSTATUS.
    DfuDnloadSync = 3,
    /// Device is programming a control-write block into its nonvolatile memories.
    DfuDnBusy = 4,
    /// Device is processing a download operation. Expecting DFU_DNLOAD requests.
    DfuDnloadIdle = 5,
    /// Device has received the final block of firmware from the host and is waiting for receipt of DFU_GETSTATUS to begin the Manifestation phase.
    DfuManifestSync = 6,
    /// Device is in the Manifestation phase.
    DfuManifest = 7,
    /// Device has programmed its memories and is waiting for a USB reset or a power on reset.
    DfuManifestWaitReset = 8,
    /// The device is processing an upload operation. Expecting DFU_UPLOAD requests.
    DfuUploadIdle = 9,
    /// An error has occurred. Awaiting the DFU_CLRSTATUS request.
    DfuError = 10,
}

/// Status code, as reported in `bStatus`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuStatusCode {
    /// No error condition is present.
    OK = 0x00,
    /// File is not targeted for use by this device.
    ErrTarget = 0x01,
    /// File is for this device but fails some vendor-specific verification test.
    ErrFile = 0x02,
    /// Device is unable to write memory.
    ErrWrite = 0x03,
    /// Memory erase function failed.
    ErrErase = 0x04,
    /// Memory erase check failed.
    ErrCheckErased = 0x05,
    /// Program memory function failed.
    ErrProg = 0x06,
    /// Programmed memory failed verification.
    ErrVerify = 0x07,
    /// Cannot program memory due to received address that is out of range.
    ErrAddress = 0x08,
    /// Received DFU_DNLOAD with wLength = 0, but device does not think it has all of the data yet.
    ErrNotdone = 0x09,
    /// Device's firmware is corrupt. It cannot return to run-time (non-DFU) operations.
    ErrFirmware = 0x0A,
    /// iString indicates a vendor-specific error.
    ErrVendor = 0x0B,
    /// Device detected unexpected USB reset signaling.
    ErrUsbr = 0x0C,
    /// Device detected unexpected power on reset.
    ErrPOR = 0x0D,
    /// Something went wrong, but the device does not know what it was.
    ErrUnknown = 0x0E,
    /// Device stalled an unexpected request.
    ErrStalledPkt = 0x0F,
}

impl DfuStatusCode {
    /// Decodes a raw `bStatus` value. Out of range values map to `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        use DfuStatusCode::*;
        Some(match value {
            0x00 => OK,
            0x01 => ErrTarget,
            0x02 => ErrFile,
            0x03 => ErrWrite,
            0x04 => ErrErase,
            0x05 => ErrCheckErased,
            0x06 => ErrProg,
            0x07 => ErrVerify,
            0x08 => ErrAddress,
            0x09 => ErrNotdone,
            0x0A => ErrFirmware,
            0x0B => ErrVendor,
            0x0C => ErrUsbr,
            0x0D => ErrPOR,
            0x0E => ErrUnknown,
            0x0F => ErrStalledPkt,
            _ => return None,
        })
    }
}

/// Contents of a `DFU_GETSTATUS` reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DfuStatus {
    /// `bStatus`
    pub status: DfuStatusCode,
    /// `bwPollTimeout`, only the low 24 bits go on the wire.
    pub poll_timeout: u32,
    /// `bState`
    pub state: DfuState,
}

impl From<DfuStatus> for [u8; 6] {
    fn from(dfu: DfuStatus) -> Self {
        [
            // bStatus
            dfu.status as u8,
            // bwPollTimeout
            (dfu.poll_timeout & 0xff) as u8,
            ((dfu.poll_timeout >> 8) & 0xff) as u8,
            ((dfu.poll_timeout >> 16) & 0xff) as u8,
            // bState
            dfu.state as u8,
            // iString: Index of status description in string table.
            0,
        ]
    }
}
