//! The worker side: everything that touches the NVRAM chip runs here,
//! never in the USB interrupt.

use core::cmp::min;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embedded_hal::spi::SpiDevice;
use heapless::Vec;
use log::{debug, error, info, warn};

use crate::cache::BlockStore;
use crate::commit::CommitPolicy;
use crate::error::{NvramError, NvramResult};
use crate::image::ImageCache;
use crate::progress::BlockProgress;
use crate::protocol::DfuStatusCode;

const VERIFY_CHUNK: usize = 64;
const REFRESH_CHUNK: usize = 256;

/// One unit of work for the [`Programmer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramRequest<const N: usize> {
    /// Device address of `data[0]`.
    pub address: u32,
    /// Bytes to program; empty for a manifestation request.
    pub data: Vec<u8, N>,
    /// Commit the deferred boot block instead of writing `data`.
    pub manifestation: bool,
}

impl<const N: usize> ProgramRequest<N> {
    /// Request to program `data` at `address`. `None` if `data` is longer than `N`.
    pub fn write(address: u32, data: &[u8]) -> Option<Self> {
        Some(Self {
            address,
            data: Vec::from_slice(data).ok()?,
            manifestation: false,
        })
    }

    /// Request to commit the image whose boot block starts at `address`.
    pub fn manifestation(address: u32) -> Self {
        Self {
            address,
            data: Vec::new(),
            manifestation: true,
        }
    }
}

/// Queue between the USB side and the programmer, `Q` requests deep.
pub type RequestQueue<const N: usize, const Q: usize> =
    Channel<CriticalSectionRawMutex, ProgramRequest<N>, Q>;

/// Enqueueing end of a [`RequestQueue`].
pub type RequestSender<'a, const N: usize, const Q: usize> =
    Sender<'a, CriticalSectionRawMutex, ProgramRequest<N>, Q>;

/// Dequeueing end of a [`RequestQueue`].
pub type RequestReceiver<'a, const N: usize, const Q: usize> =
    Receiver<'a, CriticalSectionRawMutex, ProgramRequest<N>, Q>;

// Out-of-range is an addressing problem whatever the operation was.
fn status_for<E>(e: NvramError<E>, otherwise: DfuStatusCode) -> DfuStatusCode {
    match e {
        NvramError::OutOfRange => DfuStatusCode::ErrAddress,
        _ => otherwise,
    }
}

/// Drains the request queue, programming and verifying each request.
///
/// Requests are handled one at a time in submission order. When one is
/// done the shared [`BlockProgress`] is cleared; a failure is stored in
/// it first so the DFU session reports it on the next `DFU_GETSTATUS`.
///
/// The first block of an image is held back by a [`CommitPolicy`] and
/// only written when a manifestation request arrives. After that commit
/// the whole image is re-read into the [`ImageCache`].
pub struct Programmer<'a, SPI, const B: usize, const N: usize, const Q: usize> {
    store: BlockStore<SPI, B>,
    requests: RequestReceiver<'a, N, Q>,
    progress: &'a BlockProgress,
    image: &'a ImageCache<'a>,
    image_base: u32,
    policy: CommitPolicy<B>,
}

impl<'a, SPI: SpiDevice, const B: usize, const N: usize, const Q: usize>
    Programmer<'a, SPI, B, N, Q>
{
    /// The image occupies `image.len()` bytes of `store` from `image_base`;
    /// its boot block is the device block at `image_base`.
    ///
    /// `image_base` must sit on a block boundary, otherwise erasing the
    /// boot block would touch bytes outside the image.
    pub fn new(
        store: BlockStore<SPI, B>,
        requests: RequestReceiver<'a, N, Q>,
        progress: &'a BlockProgress,
        image: &'a ImageCache<'a>,
        image_base: u32,
    ) -> NvramResult<Self, SPI::Error> {
        let desc = store.descriptor();
        if image_base % desc.block_size != 0 {
            error!(
                "programmer: image base {:#x} is not on a {} byte block boundary",
                image_base, desc.block_size
            );
            return Err(NvramError::Misaligned);
        }
        if image_base as u64 + image.len() as u64 > store.capacity() as u64 {
            return Err(NvramError::OutOfRange);
        }
        let policy = CommitPolicy::new(image_base, desc.block_size as usize, desc.erased_value);
        Ok(Self {
            store,
            requests,
            progress,
            image,
            image_base,
            policy,
        })
    }

    /// The underlying store.
    pub fn store(&mut self) -> &mut BlockStore<SPI, B> {
        &mut self.store
    }

    /// Write ordering state.
    pub fn policy(&self) -> &CommitPolicy<B> {
        &self.policy
    }

    /// Worker loop; never returns.
    pub async fn run(&mut self) -> ! {
        info!("programmer: started");
        loop {
            let request = self.requests.receive().await;
            self.process(request).ok();
        }
    }

    /// Processes every request already queued without waiting for more.
    /// Returns how many were handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(request) = self.requests.try_receive() {
            self.process(request).ok();
            handled += 1;
        }
        handled
    }

    /// Handles one request and updates the shared progress.
    pub fn process(&mut self, request: ProgramRequest<N>) -> Result<(), DfuStatusCode> {
        let result = if request.manifestation {
            self.commit()
        } else {
            self.program(request.address, &request.data)
        };

        match result {
            Ok(()) => self.progress.complete(),
            Err(status) => {
                error!(
                    "programmer: request at {:#x} failed: {:?}",
                    request.address, status
                );
                self.progress.fail(status);
            }
        }
        result
    }

    /// Copies the image from flash into the upload cache.
    pub fn load_image(&mut self) -> Result<(), DfuStatusCode> {
        let len = self.image.len();
        if len == 0 {
            return Ok(());
        }
        let mut reader = self
            .store
            .reader(self.image_base)
            .map_err(|e| status_for(e, DfuStatusCode::ErrFirmware))?;

        let mut chunk = [0u8; REFRESH_CHUNK];
        let mut offset = 0;
        while offset < len {
            let n = min(REFRESH_CHUNK, len - offset);
            let got = reader
                .read(&mut chunk[..n])
                .map_err(|e| status_for(e, DfuStatusCode::ErrFirmware))?;
            if got == 0 {
                break;
            }
            self.image.write(offset, &chunk[..got]);
            offset += got;
        }
        debug!("programmer: upload image refreshed, {} bytes", offset);
        Ok(())
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), DfuStatusCode> {
        let split = self.policy.split(address, data);

        if !split.deferred.is_empty() {
            if split.first {
                let boot = self.policy.boot_base();
                info!("programmer: new image, erasing boot block {:#x}", boot);
                self.store.erase(boot).map_err(|e| {
                    error!("programmer: erase at {:#x} failed: {:?}", boot, e);
                    status_for(e, DfuStatusCode::ErrErase)
                })?;
                let shadow = (boot - self.image_base) as usize;
                self.image.fill(shadow, self.policy.boot_len(), 0);
                self.policy.begin();
            }
            debug!(
                "programmer: deferring {} bytes at boot block offset {}",
                split.deferred.len(),
                split.deferred_offset
            );
            self.policy.stash(split.deferred_offset, split.deferred);
        }

        if !split.immediate.is_empty() {
            self.write_verified(split.immediate_address, split.immediate)?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DfuStatusCode> {
        let Some(record) = self.policy.take() else {
            warn!("programmer: manifestation without a boot block");
            return Err(DfuStatusCode::ErrNotdone);
        };

        info!(
            "programmer: committing boot block {:#x}, {} bytes",
            record.address(),
            record.data().len()
        );
        self.write_verified(record.address(), record.data())?;
        self.load_image()
    }

    fn write_verified(&mut self, address: u32, data: &[u8]) -> Result<(), DfuStatusCode> {
        debug!("programmer: write {:#x}, {} bytes", address, data.len());
        self.store.write(address, data).map_err(|e| {
            error!("programmer: write at {:#x} failed: {:?}", address, e);
            status_for(e, DfuStatusCode::ErrProg)
        })?;

        let mut readback = [0u8; VERIFY_CHUNK];
        let mut at = address;
        for chunk in data.chunks(VERIFY_CHUNK) {
            let readback = &mut readback[..chunk.len()];
            self.store.read(at, readback).map_err(|e| {
                error!("programmer: read back at {:#x} failed: {:?}", at, e);
                status_for(e, DfuStatusCode::ErrVerify)
            })?;
            if readback != chunk {
                error!("programmer: verify mismatch in {:#x}..", at);
                return Err(DfuStatusCode::ErrVerify);
            }
            at += chunk.len() as u32;
        }
        Ok(())
    }
}
