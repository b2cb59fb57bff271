use bitflags::bitflags;

bitflags! {
    /// `bmAttributes` of the DFU functional descriptor.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DfuAttributes: u8 {
        /// bitCanDnload
        const CAN_DNLOAD = 0x01;
        /// bitCanUpload
        const CAN_UPLOAD = 0x02;
        /// bitManifestationTolerant
        const MANIFESTATION_TOLERANT = 0x04;
        /// bitWillDetach
        const WILL_DETACH = 0x08;
    }
}

/// Parameters fixed at initialisation.
///
/// Most of them end up in the DFU functional descriptor and therefore
/// define the host's expectations; the rest tune how [`DfuSession`](crate::DfuSession)
/// reacts to requests.
#[derive(Clone, Copy, Debug)]
pub struct DfuConfig {
    /// Functional descriptor attributes.
    pub attributes: DfuAttributes,

    /// wDetachTimeOut, milliseconds.
    pub detach_timeout_ms: u16,

    /// Poll timeout reported while a block is being programmed.
    ///
    /// The host waits this long after a `dfuDNBUSY` status before
    /// polling again.
    pub program_timeout_ms: u32,

    /// wTransferSize. Must not exceed the session buffer capacity nor
    /// the `usb-device` control buffer (128 bytes unless a
    /// `control-buffer-*` feature is enabled).
    pub transfer_size: u16,

    /// Number of bytes the host must download before manifestation is allowed.
    pub image_size: u32,

    /// Interface string, usually a `@Name/0xADDR/N*SZg` memory map.
    pub interface_string: &'static str,

    /// Stall unknown requests in `dfuERROR` instead of ignoring them.
    pub strict_error_state: bool,
}

impl DfuConfig {
    /// Defaults: download, upload and manifestation tolerant, 1000 ms
    /// detach timeout, 20 ms program timeout, 128 byte transfers.
    pub const fn new(image_size: u32) -> Self {
        Self {
            attributes: DfuAttributes::CAN_DNLOAD
                .union(DfuAttributes::CAN_UPLOAD)
                .union(DfuAttributes::MANIFESTATION_TOLERANT),
            detach_timeout_ms: 1000,
            program_timeout_ms: 20,
            transfer_size: 128,
            image_size,
            interface_string: "@Firmware/0x00000000/1*1Kg",
            strict_error_state: false,
        }
    }

    /// Replaces the descriptor attributes.
    pub const fn with_attributes(mut self, attributes: DfuAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Sets wTransferSize.
    pub const fn with_transfer_size(mut self, transfer_size: u16) -> Self {
        self.transfer_size = transfer_size;
        self
    }

    /// Sets the busy poll timeout.
    pub const fn with_program_timeout(mut self, ms: u32) -> Self {
        self.program_timeout_ms = ms;
        self
    }

    /// Sets wDetachTimeOut.
    pub const fn with_detach_timeout(mut self, ms: u16) -> Self {
        self.detach_timeout_ms = ms;
        self
    }

    /// Sets the interface string.
    pub const fn with_interface_string(mut self, s: &'static str) -> Self {
        self.interface_string = s;
        self
    }

    /// See [`strict_error_state`](DfuConfig::strict_error_state).
    pub const fn with_strict_error_state(mut self, strict: bool) -> Self {
        self.strict_error_state = strict;
        self
    }

    /// Body of the DFU functional descriptor, after bLength and
    /// bDescriptorType.
    pub fn functional_descriptor(&self) -> [u8; 7] {
        [
            // bmAttributes
            self.attributes.bits(),
            // wDetachTimeOut
            (self.detach_timeout_ms & 0xff) as u8,
            (self.detach_timeout_ms >> 8) as u8,
            // wTransferSize
            (self.transfer_size & 0xff) as u8,
            (self.transfer_size >> 8) as u8,
            // bcdDFUVersion
            0x1a,
            0x01,
        ]
    }
}
