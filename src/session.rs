use core::cmp::min;

use heapless::Vec;
use log::{debug, info, warn};

use crate::config::{DfuAttributes, DfuConfig};
use crate::events::{DfuEvent, DfuHandler};
use crate::progress::BlockProgress;
use crate::protocol::{DfuRequest, DfuRequestCode, DfuState, DfuStatus, DfuStatusCode};

/// What the transport should answer to a request.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply<'r> {
    /// Accept the request. For a device-to-host request this is an
    /// empty data stage.
    Ack,
    /// Accept and send these bytes.
    Data(&'r [u8]),
    /// Stall the control pipe.
    Stall,
}

#[derive(Clone, Copy)]
enum Outcome {
    Ack,
    Status,
    State,
    Upload,
    Stall,
}

/// DFU protocol state machine.
///
/// The session does not know about USB: it is driven through two entry
/// points, [`handle_request`](DfuSession::handle_request) for every class
/// request and [`complete_transfer`](DfuSession::complete_transfer) once
/// the request's data stage has been accepted. [`DfuClass`](crate::DfuClass)
/// wires both to `usb-device`.
///
/// `N` is the capacity of the transfer buffer. The effective transfer
/// size is the smaller of `N` and [`DfuConfig::transfer_size`].
pub struct DfuSession<'a, const N: usize> {
    config: DfuConfig,
    state: DfuState,
    status: DfuStatusCode,
    poll_timeout: u32,
    transferred: u32,
    block_num: u16,
    download_pending: bool,
    disconnect: bool,
    buffer: Vec<u8, N>,
    reply: [u8; 6],
    progress: &'a BlockProgress,
}

impl<'a, const N: usize> DfuSession<'a, N> {
    /// New session in `dfuIDLE`.
    pub fn new(config: DfuConfig, progress: &'a BlockProgress) -> Self {
        Self {
            config,
            state: DfuState::DfuIdle,
            status: DfuStatusCode::OK,
            poll_timeout: 0,
            transferred: 0,
            block_num: 0,
            download_pending: false,
            disconnect: false,
            buffer: Vec::new(),
            reply: [0; 6],
            progress,
        }
    }

    /// Emits the lifecycle event for the initial state.
    pub fn start<H: DfuHandler>(&mut self, handler: &mut H) {
        match self.state {
            DfuState::DfuIdle => handler.notify(DfuEvent::Idle),
            DfuState::DfuError => handler.notify(DfuEvent::Error(self.status)),
            _ => {}
        }
    }

    /// Current state.
    pub fn state(&self) -> DfuState {
        self.state
    }

    /// Current status code.
    pub fn status(&self) -> DfuStatusCode {
        self.status
    }

    /// Image bytes downloaded or uploaded in the current session.
    pub fn transferred(&self) -> u32 {
        self.transferred
    }

    /// `wValue` of the last staged download block.
    pub fn block_num(&self) -> u16 {
        self.block_num
    }

    /// Configuration the session was created with.
    pub fn config(&self) -> &DfuConfig {
        &self.config
    }

    /// Shared progress signal.
    pub fn progress(&self) -> &'a BlockProgress {
        self.progress
    }

    /// Switch to `dfuERROR` with "Device detected unexpected power on reset"
    /// instead of the usual `dfuIDLE`.
    pub fn set_unexpected_reset_state<H: DfuHandler>(&mut self, handler: &mut H) {
        let initial = self.state;
        self.set_state_status(DfuState::DfuError, DfuStatusCode::ErrPOR);
        self.observe(initial, handler);
    }

    /// Switch to `dfuERROR` with "Device's firmware is corrupt" instead
    /// of the usual `dfuIDLE`.
    pub fn set_firmware_corrupted_state<H: DfuHandler>(&mut self, handler: &mut H) {
        let initial = self.state;
        self.set_state_status(DfuState::DfuError, DfuStatusCode::ErrFirmware);
        self.observe(initial, handler);
    }

    fn transfer_size(&self) -> usize {
        min(N, self.config.transfer_size as usize)
    }

    fn set_state_status(&mut self, state: DfuState, status: DfuStatusCode) {
        self.state = state;
        self.status = status;
    }

    /// Handles one class request. `data` is the OUT data stage, empty for
    /// device-to-host requests.
    pub fn handle_request<H: DfuHandler>(
        &mut self,
        req: &DfuRequest,
        data: &[u8],
        handler: &mut H,
    ) -> Reply<'_> {
        let initial = self.state;

        // a finished block releases dfuDNBUSY before anything else is looked at
        if self.state == DfuState::DfuDnBusy && !self.progress.is_busy() {
            self.state = DfuState::DfuDnloadSync;
        }

        let code = req.code().ok();
        debug!(
            "dfu: request {:?} ({}) value {} len {} in {:?}",
            code, req.request, req.block_num, req.length, self.state
        );

        let outcome = self.dispatch(code, req, data, handler);
        self.observe(initial, handler);

        match outcome {
            Outcome::Ack => Reply::Ack,
            Outcome::Status => Reply::Data(&self.reply),
            Outcome::State => Reply::Data(&self.reply[..1]),
            Outcome::Upload => Reply::Data(&self.buffer),
            Outcome::Stall => Reply::Stall,
        }
    }

    /// Post-transfer hook: runs after the data stage of the last request
    /// has been accepted.
    ///
    /// A staged download block is handed to the handler here, exactly once.
    pub fn complete_transfer<H: DfuHandler>(&mut self, handler: &mut H) {
        let initial = self.state;

        if self.download_pending {
            self.download_pending = false;
            match handler.download_block(self.transferred, &self.buffer) {
                Ok(()) => {
                    self.transferred = self.transferred.saturating_add(self.buffer.len() as u32);
                }
                Err(e) => {
                    self.progress.complete();
                    self.fail(e);
                }
            }
        }

        if self.disconnect {
            self.disconnect = false;
            info!("dfu: disconnect, leaving DFU mode");
            self.set_state_status(DfuState::AppIdle, DfuStatusCode::OK);
        }

        self.observe(initial, handler);
    }

    /// USB bus reset.
    pub fn usb_reset<H: DfuHandler>(&mut self, handler: &mut H) {
        // may not return
        handler.usb_reset();

        let initial = self.state;
        self.download_pending = false;
        self.disconnect = false;

        match self.state {
            DfuState::DfuUploadIdle
            | DfuState::DfuDnloadIdle
            | DfuState::DfuDnloadSync
            | DfuState::DfuDnBusy
            | DfuState::DfuError
            | DfuState::DfuManifest
            | DfuState::DfuManifestSync => {
                self.set_state_status(DfuState::DfuError, DfuStatusCode::ErrUsbr);
            }
            DfuState::AppIdle | DfuState::AppDetach => {
                self.set_state_status(DfuState::DfuIdle, DfuStatusCode::OK);
            }
            DfuState::DfuIdle | DfuState::DfuManifestWaitReset => {}
        }

        self.observe(initial, handler);
    }

    fn dispatch<H: DfuHandler>(
        &mut self,
        code: Option<DfuRequestCode>,
        req: &DfuRequest,
        data: &[u8],
        handler: &mut H,
    ) -> Outcome {
        use DfuRequestCode::*;

        match self.state {
            DfuState::AppIdle
            | DfuState::AppDetach
            | DfuState::DfuManifest
            | DfuState::DfuManifestWaitReset => Outcome::Ack,

            DfuState::DfuIdle => match code {
                Some(Dnload) => self.begin_download(req, data, handler),
                Some(Upload) => self.begin_upload(req, handler),
                Some(Abort) => Outcome::Ack,
                Some(GetStatus) => self.get_status(req, 0),
                Some(GetState) => self.get_state(req),
                Some(Disconnect) => {
                    self.disconnect = true;
                    Outcome::Ack
                }
                _ => self.stall(),
            },

            DfuState::DfuDnloadSync => match code {
                Some(GetStatus) => self.sync_status(req),
                Some(GetState) => self.get_state(req),
                Some(Abort) => self.abort(),
                _ => self.stall(),
            },

            DfuState::DfuDnBusy => match code {
                Some(GetStatus) => self.get_status(req, self.config.program_timeout_ms),
                Some(GetState) => self.get_state(req),
                _ => self.stall(),
            },

            DfuState::DfuDnloadIdle => match code {
                Some(Dnload) if req.length > 0 => self.stage_download(req, data),
                Some(Dnload) => self.finish_download(),
                Some(Abort) => self.abort(),
                Some(GetStatus) => self.get_status(req, 0),
                Some(GetState) => self.get_state(req),
                _ => self.stall(),
            },

            DfuState::DfuManifestSync => match code {
                Some(GetStatus) => self.manifest(req, handler),
                Some(GetState) => self.get_state(req),
                Some(Abort) => self.abort(),
                _ => self.stall(),
            },

            DfuState::DfuUploadIdle => match code {
                Some(Upload) => self.upload(req, handler),
                Some(Abort) => self.abort(),
                Some(GetStatus) => self.get_status(req, 0),
                Some(GetState) => self.get_state(req),
                _ => self.stall(),
            },

            DfuState::DfuError => match code {
                Some(GetStatus) => self.report_status(req, 0),
                Some(GetState) => self.get_state(req),
                Some(ClrStatus) => self.clear_status(),
                _ if self.config.strict_error_state => Outcome::Stall,
                _ => {
                    warn!("dfu: request {} ignored in dfuERROR", req.request);
                    Outcome::Ack
                }
            },
        }
    }

    // Emit idle/error when the state changed into one of them.
    fn observe<H: DfuHandler>(&mut self, initial: DfuState, handler: &mut H) {
        if self.state == initial {
            return;
        }
        match self.state {
            DfuState::DfuIdle => handler.notify(DfuEvent::Idle),
            DfuState::DfuError => handler.notify(DfuEvent::Error(self.status)),
            _ => {}
        }
    }

    fn fail(&mut self, status: DfuStatusCode) {
        warn!("dfu: {:?} in {:?}", status, self.state);
        match self.state {
            DfuState::AppIdle | DfuState::AppDetach => {
                self.set_state_status(DfuState::AppIdle, status)
            }
            _ => self.set_state_status(DfuState::DfuError, status),
        }
    }

    fn stall(&mut self) -> Outcome {
        self.fail(DfuStatusCode::ErrStalledPkt);
        Outcome::Stall
    }

    fn abort(&mut self) -> Outcome {
        self.set_state_status(DfuState::DfuIdle, DfuStatusCode::OK);
        Outcome::Ack
    }

    fn clear_status(&mut self) -> Outcome {
        self.progress.clear_error();
        self.set_state_status(DfuState::DfuIdle, DfuStatusCode::OK);
        Outcome::Ack
    }

    fn get_state(&mut self, req: &DfuRequest) -> Outcome {
        // return current state, without any state transition
        if req.length == 0 {
            return self.stall();
        }
        self.reply[0] = self.state as u8;
        Outcome::State
    }

    // Status reply for the current state, no transitions.
    fn report_status(&mut self, req: &DfuRequest, poll_timeout: u32) -> Outcome {
        if req.length < 6 {
            return self.stall();
        }
        self.poll_timeout = poll_timeout;
        self.reply = DfuStatus {
            status: self.status,
            poll_timeout: self.poll_timeout,
            state: self.state,
        }
        .into();
        Outcome::Status
    }

    // Status reply that first surfaces a failure latched by the worker.
    fn get_status(&mut self, req: &DfuRequest, poll_timeout: u32) -> Outcome {
        if req.length >= 6 {
            if let Some(e) = self.progress.take_error() {
                self.fail(e);
                return self.report_status(req, 0);
            }
        }
        self.report_status(req, poll_timeout)
    }

    fn sync_status(&mut self, req: &DfuRequest) -> Outcome {
        if req.length < 6 {
            return self.stall();
        }
        if self.progress.is_busy() {
            self.state = DfuState::DfuDnBusy;
            return self.report_status(req, self.config.program_timeout_ms);
        }
        if let Some(e) = self.progress.take_error() {
            self.fail(e);
            return self.report_status(req, 0);
        }
        self.state = DfuState::DfuDnloadIdle;
        self.report_status(req, 0)
    }

    fn begin_download<H: DfuHandler>(
        &mut self,
        req: &DfuRequest,
        data: &[u8],
        handler: &mut H,
    ) -> Outcome {
        if req.length == 0 || !self.config.attributes.contains(DfuAttributes::CAN_DNLOAD) {
            return self.stall();
        }
        if self.progress.is_busy() {
            warn!("dfu: download refused, previous block still programming");
            return self.stall();
        }
        info!("dfu: download started");
        handler.notify(DfuEvent::StartDownload);
        self.transferred = 0;
        self.stage_download(req, data)
    }

    fn stage_download(&mut self, req: &DfuRequest, data: &[u8]) -> Outcome {
        let len = req.length as usize;
        if len != data.len() || len > self.transfer_size() {
            return self.stall();
        }
        if self.progress.is_busy() {
            warn!("dfu: download refused, previous block still programming");
            return self.stall();
        }

        self.buffer.clear();
        if self.buffer.extend_from_slice(data).is_err() {
            return self.stall();
        }
        self.block_num = req.block_num;
        self.download_pending = true;
        self.progress.begin(len as u32);
        self.state = DfuState::DfuDnloadSync;
        Outcome::Ack
    }

    fn finish_download(&mut self) -> Outcome {
        if self.transferred == self.config.image_size {
            info!("dfu: download complete, {} bytes", self.transferred);
            self.state = DfuState::DfuManifestSync;
        } else {
            warn!(
                "dfu: download ended at {} of {} bytes",
                self.transferred, self.config.image_size
            );
            self.fail(DfuStatusCode::ErrNotdone);
        }
        Outcome::Ack
    }

    fn manifest<H: DfuHandler>(&mut self, req: &DfuRequest, handler: &mut H) -> Outcome {
        if req.length < 6 {
            return self.stall();
        }
        if let Some(e) = self.progress.take_error() {
            self.fail(e);
            return self.report_status(req, 0);
        }

        info!("dfu: manifestation");
        match handler.manifest() {
            Ok(()) => {
                if self.state == DfuState::DfuManifestSync {
                    if self
                        .config
                        .attributes
                        .contains(DfuAttributes::MANIFESTATION_TOLERANT)
                    {
                        self.state = DfuState::DfuIdle;
                    } else {
                        self.state = DfuState::DfuManifestWaitReset;
                    }
                }
            }
            Err(e) => self.fail(e),
        }
        self.report_status(req, 0)
    }

    fn begin_upload<H: DfuHandler>(&mut self, req: &DfuRequest, handler: &mut H) -> Outcome {
        if !self.config.attributes.contains(DfuAttributes::CAN_UPLOAD) {
            return self.stall();
        }
        if self.progress.is_busy() {
            warn!("dfu: upload refused, programming in progress");
            return self.stall();
        }
        info!("dfu: upload started");
        handler.notify(DfuEvent::StartUpload);
        self.transferred = 0;
        self.upload(req, handler)
    }

    fn upload<H: DfuHandler>(&mut self, req: &DfuRequest, handler: &mut H) -> Outcome {
        let want = min(req.length as usize, self.transfer_size());
        if want == 0 || self.buffer.resize(want, 0).is_err() {
            return self.stall();
        }

        match handler.upload_block(self.transferred, &mut self.buffer[..]) {
            Ok(n) => {
                let n = min(n, want);
                self.buffer.truncate(n);
                self.transferred = self.transferred.saturating_add(n as u32);
                if n == want {
                    self.state = DfuState::DfuUploadIdle;
                } else {
                    // short frame, back to idle
                    self.state = DfuState::DfuIdle;
                }
                Outcome::Upload
            }
            Err(e) => {
                self.fail(e);
                Outcome::Stall
            }
        }
    }
}
