use core::marker::PhantomData;
use usb_device::{class_prelude::*, control::Request};

use crate::config::DfuConfig;
use crate::events::DfuHandler;
use crate::progress::BlockProgress;
use crate::protocol::{
    DfuRequest, DfuState, DfuStatusCode, DESC_DESCTYPE_DFU, USB_CLASS_APPLICATION_SPECIFIC,
    USB_PROTOCOL_DFU_MODE, USB_SUBCLASS_DFU,
};
use crate::session::{DfuSession, Reply};

/// DFU protocol USB class implementation for usb-device library.
///
/// Requests addressed to the DFU interface are forwarded to a
/// [`DfuSession`]; decisions about the data go to the handler `H`.
/// `N` is the transfer buffer capacity.
pub struct DfuClass<'a, B: UsbBus, H: DfuHandler, const N: usize> {
    if_num: InterfaceNumber,
    interface_string: StringIndex,
    session: DfuSession<'a, N>,
    handler: H,
    _bus: PhantomData<B>,
}

impl<'a, B: UsbBus, H: DfuHandler, const N: usize> UsbClass<B> for DfuClass<'a, B, H, N> {
    fn get_configuration_descriptors(
        &self,
        writer: &mut DescriptorWriter,
    ) -> usb_device::Result<()> {
        writer.interface_alt(
            self.if_num,
            0,
            USB_CLASS_APPLICATION_SPECIFIC,
            USB_SUBCLASS_DFU,
            USB_PROTOCOL_DFU_MODE,
            Some(self.interface_string),
        )?;

        // DFU Functional descriptor
        writer.write(
            DESC_DESCTYPE_DFU,
            &self.session.config().functional_descriptor(),
        )?;

        Ok(())
    }

    fn get_string(&self, index: StringIndex, lang_id: LangID) -> Option<&str> {
        if (lang_id == LangID::EN_US || u16::from(lang_id) == 0) && index == self.interface_string
        {
            return Some(self.session.config().interface_string);
        }
        None
    }

    // Handle control requests to the host.
    fn control_in(&mut self, xfer: ControlIn<B>) {
        let req = *xfer.request();
        if !self.is_dfu_request(&req) {
            return;
        }

        let request = DfuRequest::new(req.request, req.value, req.length);
        match self.session.handle_request(&request, &[], &mut self.handler) {
            Reply::Ack => {
                xfer.accept_with(&[]).ok();
            }
            Reply::Data(data) => {
                xfer.accept_with(data).ok();
            }
            Reply::Stall => {
                xfer.reject().ok();
                return;
            }
        }
        self.session.complete_transfer(&mut self.handler);
    }

    // Handle a control request from the host.
    fn control_out(&mut self, xfer: ControlOut<B>) {
        let req = *xfer.request();
        if !self.is_dfu_request(&req) {
            return;
        }

        let request = DfuRequest::new(req.request, req.value, req.length);
        match self
            .session
            .handle_request(&request, xfer.data(), &mut self.handler)
        {
            Reply::Ack | Reply::Data(_) => {
                xfer.accept().ok();
            }
            Reply::Stall => {
                xfer.reject().ok();
                return;
            }
        }
        self.session.complete_transfer(&mut self.handler);
    }

    fn reset(&mut self) {
        self.session.usb_reset(&mut self.handler);
    }
}

impl<'a, B: UsbBus, H: DfuHandler, const N: usize> DfuClass<'a, B, H, N> {
    /// Creates a new DfuClass with the provided UsbBus, configuration,
    /// progress signal shared with the programmer, and handler.
    pub fn new(
        alloc: &UsbBusAllocator<B>,
        config: DfuConfig,
        progress: &'a BlockProgress,
        mut handler: H,
    ) -> Self {
        let mut session = DfuSession::new(config, progress);
        session.start(&mut handler);
        Self {
            if_num: alloc.interface(),
            interface_string: alloc.string(),
            session,
            handler,
            _bus: PhantomData,
        }
    }

    /// This function may be called just after `DfuClass::new()` to
    /// set DFU error state to "Device detected unexpected power on reset"
    /// instead of the usual `dfuIdle`.
    pub fn set_unexpected_reset_state(&mut self) {
        self.session.set_unexpected_reset_state(&mut self.handler);
    }

    /// This function may be called just after `DfuClass::new()` to
    /// set DFU error state to "Device's firmware is corrupt. It cannot return to run-time (non-DFU) operations"
    /// instead of the usual `dfuIdle`.
    pub fn set_firmware_corrupted_state(&mut self) {
        self.session.set_firmware_corrupted_state(&mut self.handler);
    }

    /// Current DFU state.
    pub fn state(&self) -> DfuState {
        self.session.state()
    }

    /// Current DFU status code.
    pub fn status(&self) -> DfuStatusCode {
        self.session.status()
    }

    /// The protocol state machine.
    pub fn session(&self) -> &DfuSession<'a, N> {
        &self.session
    }

    /// The handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// The handler, mutably.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    fn is_dfu_request(&self, req: &Request) -> bool {
        req.request_type == control::RequestType::Class
            && req.recipient == control::Recipient::Interface
            && req.index == u8::from(self.if_num) as u16
    }
}
