use crate::protocol::DfuStatusCode;

/// Lifecycle notifications that carry no payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DfuEvent {
    /// First `DFU_DNLOAD` of a session was accepted.
    StartDownload,
    /// First `DFU_UPLOAD` of a session was accepted.
    StartUpload,
    /// Session entered `dfuIDLE` from another state.
    Idle,
    /// Session entered `dfuERROR` from another state.
    Error(DfuStatusCode),
}

/// Receives what the DFU session decides to do with the data.
///
/// Every method is called from `usb_dev.poll()` (USB interrupt context)
/// and must return promptly. Slow work such as programming flash belongs
/// in a separate task, see [`FirmwareUpdater`](crate::FirmwareUpdater)
/// and [`Programmer`](crate::Programmer).
pub trait DfuHandler {
    /// Lifecycle notification. The default ignores it.
    fn notify(&mut self, event: DfuEvent) {
        let _ = event;
    }

    /// A download data phase completed. `offset` is the number of image
    /// bytes received before this block.
    ///
    /// The handler must take ownership of `data` (copy or queue it); an
    /// `Err` puts the session in `dfuERROR` with that status.
    fn download_block(&mut self, offset: u32, data: &[u8]) -> Result<(), DfuStatusCode>;

    /// Fill `buf` with image bytes starting at `offset`.
    ///
    /// Returns the number of bytes written. A count shorter than
    /// `buf.len()` marks the end of the image.
    fn upload_block(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, DfuStatusCode>;

    /// Host finished the download and polled status in `dfuMANIFEST-SYNC`.
    fn manifest(&mut self) -> Result<(), DfuStatusCode>;

    /// Called every time when USB is reset, before the session reacts to it.
    fn usb_reset(&mut self) {}
}
