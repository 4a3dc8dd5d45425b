use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, error, info};

use framewire_core::{pool, FrameHandle, FrameInit, PinHandle, PinParams};
use framewire_proto::FrameEnvelope;

use crate::callback::{CallbackTarget, Command};
use crate::transport::{InputTransport, ParamScope, TransportError, TransportKind};

use super::{Polarity, RECV_POLL_INTERVAL};

/// Receiving endpoint of a module.
///
/// While started, a dedicated worker blocks on the transport, moves each
/// arriving frame into the pool and delivers it to the module callback as a
/// `Tick`. The worker holds one reference for the duration of the callback;
/// callbacks addref to retain the frame beyond their return.
pub(crate) struct InputPin {
    handle: PinHandle,
    kind: TransportKind,
    params: PinParams,
    target: CallbackTarget,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl InputPin {
    pub fn new(
        handle: PinHandle,
        config: &str,
        target: CallbackTarget,
    ) -> Result<Self, TransportError> {
        let params = PinParams::parse(config);
        let kind = TransportKind::parse(params.require("in_type")?)?;
        InputTransport::validate(kind, &ParamScope::new(&params, Polarity::Input.prefix()))?;
        Ok(Self {
            handle,
            kind,
            params,
            target,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    pub fn handle(&self) -> PinHandle {
        self.handle
    }

    pub fn polarity(&self) -> Polarity {
        Polarity::Input
    }

    pub fn params(&self) -> &PinParams {
        &self.params
    }

    pub fn start(&mut self) -> Result<(), TransportError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let scope = ParamScope::new(self.params(), self.polarity().prefix());
        let transport = InputTransport::open(self.kind, &scope)?;

        self.stop.store(false, Ordering::Release);
        let stop = Arc::clone(&self.stop);
        let target = self.target.clone();
        let pin = self.handle;
        let worker = std::thread::Builder::new()
            .name(format!("framewire-in-{}-{}", target.module, pin))
            .spawn(move || receive_loop(transport, stop, target, pin))?;
        self.worker = Some(worker);
        info!(pin = %self.handle, kind = ?self.kind, "input pin started");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(pin = %self.handle, "input worker panicked");
            }
            info!(pin = %self.handle, "input pin stopped");
        }
    }
}

impl Drop for InputPin {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    mut transport: InputTransport,
    stop: Arc<AtomicBool>,
    target: CallbackTarget,
    pin: PinHandle,
) {
    while !stop.load(Ordering::Acquire) {
        match transport.recv(RECV_POLL_INTERVAL) {
            Ok(Some(envelope)) => deliver(&target, pin, envelope),
            Ok(None) => {}
            Err(err) if err.is_fatal() => {
                error!(%pin, %err, "input transport failed, shutting the pin down");
                target.emit(pin, FrameHandle::INVALID, Command::Quit);
                return;
            }
            Err(err) => {
                error!(%pin, %err, "input transport error, frame skipped");
            }
        }
    }
    debug!(%pin, "input worker exiting");
}

fn deliver(target: &CallbackTarget, pin: PinHandle, envelope: FrameEnvelope) {
    let pool = pool::global();
    let received = envelope.headers;
    let init = FrameInit {
        media_format: Some(received.media_format),
        media_size: envelope.payload.len() as i64,
        width: received.width,
        height: received.height,
        depth: received.depth,
        sampling_fmt: received.sampling_fmt,
    };
    let handle = match pool.acquire_with_init(&init) {
        Ok(handle) => handle,
        Err(err) => {
            error!(%pin, %err, "dropping received frame");
            return;
        }
    };
    pool.with_frame(handle, |frame| {
        frame.fill(&envelope.payload);
        frame.headers_mut().timestamp = received.timestamp;
        frame.headers_mut().frame_index = received.frame_index;
    });

    target.emit(pin, handle, Command::Tick);
    pool.release(handle);
}
