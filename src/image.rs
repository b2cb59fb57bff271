use core::cell::RefCell;
use core::cmp::min;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// RAM copy of the firmware image served to `DFU_UPLOAD`.
///
/// Written by the programmer task, read from the USB interrupt; every
/// access runs inside a critical section.
pub struct ImageCache<'a> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<&'a mut [u8]>>,
    len: usize,
}

impl<'a> ImageCache<'a> {
    /// Uses `buf` as backing storage; its length is the image size.
    pub fn new(buf: &'a mut [u8]) -> Self {
        let len = buf.len();
        Self {
            inner: Mutex::new(RefCell::new(buf)),
            len,
        }
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` for a zero sized image.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies bytes starting at `offset` into `buf`, returns the count.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.inner.lock(|cell| {
            let image = cell.borrow();
            if offset >= image.len() {
                return 0;
            }
            let n = min(buf.len(), image.len() - offset);
            buf[..n].copy_from_slice(&image[offset..offset + n]);
            n
        })
    }

    /// Stores `data` at `offset`, dropping anything past the end.
    pub fn write(&self, offset: usize, data: &[u8]) {
        self.inner.lock(|cell| {
            let mut image = cell.borrow_mut();
            if offset >= image.len() {
                return;
            }
            let n = min(data.len(), image.len() - offset);
            image[offset..offset + n].copy_from_slice(&data[..n]);
        })
    }

    /// Sets `len` bytes from `offset` to `value`.
    pub fn fill(&self, offset: usize, len: usize, value: u8) {
        self.inner.lock(|cell| {
            let mut image = cell.borrow_mut();
            if offset >= image.len() {
                return;
            }
            let end = min(offset.saturating_add(len), image.len());
            image[offset..end].fill(value);
        })
    }
}
