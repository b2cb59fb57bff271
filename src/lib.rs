#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
//!
//! DFU 1.1 firmware update for a `usb-device` device, with the image
//! stored in an SPI NVRAM chip (EEPROM or DataFlash).
//!
//! ## About
//!
//! The crate is split along the line between the USB interrupt and the
//! rest of the firmware:
//!
//! * [`DfuClass`] is a `usb-device` class. It owns a [`DfuSession`], the
//!   DFU protocol state machine, and a [`DfuHandler`] that receives the
//!   data. Everything on this side runs from `usb_dev.poll()` and never
//!   blocks.
//!
//! * [`Programmer`] runs in its own task. It drains a [`RequestQueue`],
//!   writes each block through a [`BlockStore`], reads it back and
//!   compares. Storage errors are reported to the host on its next
//!   `DFU_GETSTATUS` through the shared [`BlockProgress`].
//!
//! * [`FirmwareUpdater`] is the handler connecting the two: downloaded
//!   blocks become [`ProgramRequest`]s, uploads are served from an
//!   [`ImageCache`] in RAM.
//!
//! ### Write ordering
//!
//! The first device block of the image is erased as soon as a new
//! download starts, but only written when the host ends the download and
//! the rest of the image is programmed and verified. A device interrupted
//! mid update therefore has a blank boot block rather than a mix of old
//! and new firmware.
//!
//! ### Limitations
//!
//! * Maximum USB transfer size is limited to what `usb-device` supports
//!   for control endpoint transfers, which is `128` bytes by default.
//!
//! * iString field in `DFU_GETSTATUS` is always `0`.
//!
//! * `DFU_DETACH` is not supported, the device is expected to enumerate
//!   in DFU mode.
//!
//! ## Example
//!
//! ```ignore
//! use usbd_dfu_nvram::*;
//!
//! const IMAGE_SIZE: usize = 64 * 1024;
//!
//! static PROGRESS: BlockProgress = BlockProgress::new();
//! static QUEUE: RequestQueue<128, 4> = RequestQueue::new();
//!
//! let image_buf: &'static mut [u8; IMAGE_SIZE] = /* static RAM buffer */;
//! let image: &'static ImageCache<'static> = /* ImageCache::new(image_buf) in a StaticCell */;
//!
//! // worker task
//! let nvram = Nvram::new(spi_device, DeviceDescriptor::at45db_1056(8192)).ok()?;
//! let store: BlockStore<_, 1056> = BlockStore::new(nvram).ok()?;
//! let mut programmer = Programmer::new(store, QUEUE.receiver(), &PROGRESS, image, 0).ok()?;
//! programmer.load_image().ok();
//! // in the worker task:
//! programmer.run().await;
//!
//! // USB side
//! let config = DfuConfig::new(IMAGE_SIZE as u32)
//!     .with_interface_string("@Firmware/0x00000000/62*1056 g");
//! let updater = FirmwareUpdater::new(QUEUE.sender(), &PROGRESS, image, 0);
//! let mut dfu: DfuClass<_, _, _, 128> = DfuClass::new(&usb_bus_alloc, config, &PROGRESS, updater);
//!
//! // usb_dev.poll() must be called periodically, usually from USB interrupt handlers.
//! usb_dev.poll(&mut [&mut dfu]);
//! ```
//!

/// DFU protocol module
pub mod class;

pub mod cache;
pub mod commit;
/// Initialisation parameters
pub mod config;
pub mod error;
/// Handler interface between the session and the rest of the firmware
pub mod events;
/// Upload image held in RAM
pub mod image;
pub mod nvram;
pub mod programmer;
/// Block hand-off signal shared with the programmer task
pub mod progress;
pub mod protocol;
/// DFU protocol state machine
pub mod session;
/// Glue between the DFU session and the programmer task
pub mod updater;

#[doc(inline)]
pub use crate::class::DfuClass;
pub use crate::cache::{BlockStore, SequentialReader};
pub use crate::commit::{CommitPolicy, DeferredBlock};
pub use crate::config::{DfuAttributes, DfuConfig};
pub use crate::error::{NvramError, NvramResult};
pub use crate::events::{DfuEvent, DfuHandler};
pub use crate::image::ImageCache;
pub use crate::nvram::{DeviceDescriptor, Nvram};
pub use crate::programmer::{
    ProgramRequest, Programmer, RequestQueue, RequestReceiver, RequestSender,
};
pub use crate::progress::BlockProgress;
pub use crate::protocol::{DfuRequest, DfuRequestCode, DfuState, DfuStatus, DfuStatusCode};
pub use crate::session::{DfuSession, Reply};
pub use crate::updater::FirmwareUpdater;
