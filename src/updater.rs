use log::{debug, error, info, warn};

use crate::events::{DfuEvent, DfuHandler};
use crate::image::ImageCache;
use crate::programmer::{ProgramRequest, RequestSender};
use crate::progress::BlockProgress;
use crate::protocol::DfuStatusCode;

/// [`DfuHandler`] that forwards downloaded blocks to a [`Programmer`](crate::Programmer)
/// and serves uploads from the [`ImageCache`].
///
/// Nothing here touches the NVRAM chip: requests are queued with
/// `try_send` and the call returns at once.
pub struct FirmwareUpdater<'a, const N: usize, const Q: usize> {
    requests: RequestSender<'a, N, Q>,
    progress: &'a BlockProgress,
    image: &'a ImageCache<'a>,
    image_base: u32,
}

impl<'a, const N: usize, const Q: usize> FirmwareUpdater<'a, N, Q> {
    /// The image occupies `image.len()` bytes of flash from `image_base`.
    pub fn new(
        requests: RequestSender<'a, N, Q>,
        progress: &'a BlockProgress,
        image: &'a ImageCache<'a>,
        image_base: u32,
    ) -> Self {
        Self {
            requests,
            progress,
            image,
            image_base,
        }
    }

    fn enqueue(&mut self, request: ProgramRequest<N>) -> Result<(), DfuStatusCode> {
        self.requests.try_send(request).map_err(|_| {
            error!("updater: request queue full");
            DfuStatusCode::ErrWrite
        })
    }
}

impl<'a, const N: usize, const Q: usize> DfuHandler for FirmwareUpdater<'a, N, Q> {
    fn notify(&mut self, event: DfuEvent) {
        match event {
            DfuEvent::StartDownload => info!("updater: receiving image"),
            DfuEvent::StartUpload => info!("updater: sending image"),
            DfuEvent::Idle => debug!("updater: idle"),
            DfuEvent::Error(status) => warn!("updater: error {:?}", status),
        }
    }

    fn download_block(&mut self, offset: u32, data: &[u8]) -> Result<(), DfuStatusCode> {
        let end = offset.checked_add(data.len() as u32);
        if end.map_or(true, |end| end as usize > self.image.len()) {
            warn!(
                "updater: block at {} + {} is outside the image",
                offset,
                data.len()
            );
            return Err(DfuStatusCode::ErrAddress);
        }
        let address = self
            .image_base
            .checked_add(offset)
            .ok_or(DfuStatusCode::ErrAddress)?;
        let request = ProgramRequest::write(address, data).ok_or_else(|| {
            error!("updater: {} byte block does not fit a {} byte request", data.len(), N);
            DfuStatusCode::ErrWrite
        })?;
        self.enqueue(request)
    }

    fn upload_block(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, DfuStatusCode> {
        Ok(self.image.read(offset as usize, buf))
    }

    fn manifest(&mut self) -> Result<(), DfuStatusCode> {
        // the commit re-reads the whole image, keep uploads and downloads out meanwhile
        self.progress.begin(self.image.len().max(1) as u32);
        let result = self.enqueue(ProgramRequest::manifestation(self.image_base));
        if result.is_err() {
            self.progress.complete();
        }
        result
    }
}
