use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, error, info};

use framewire_core::{pool, FrameHandle, ModuleHandle, OutputParameter, PinHandle, PinParams};
use framewire_proto::FrameEnvelope;

use crate::transport::{OutputTransport, ParamScope, TransportError, TransportKind};

use super::Polarity;

enum QueueItem {
    Frame(FrameHandle),
    SetParameter(OutputParameter, i64),
    /// Drains everything queued before it, then ends the worker.
    Flush,
}

/// Transmitting endpoint of a module.
///
/// `send` takes a reference on the frame and enqueues the handle; a dedicated
/// worker drains the queue in FIFO order, serializes each frame for the
/// transport and releases the reference after transmission.
pub(crate) struct OutputPin {
    handle: PinHandle,
    module: ModuleHandle,
    kind: TransportKind,
    params: PinParams,
    pending_params: Vec<(OutputParameter, i64)>,
    queue: Option<Sender<QueueItem>>,
    worker: Option<JoinHandle<()>>,
}

impl OutputPin {
    pub fn new(
        module: ModuleHandle,
        handle: PinHandle,
        config: &str,
    ) -> Result<Self, TransportError> {
        let params = PinParams::parse(config);
        let kind = TransportKind::parse(params.require("out_type")?)?;
        OutputTransport::validate(kind, &ParamScope::new(&params, Polarity::Output.prefix()))?;
        Ok(Self {
            handle,
            module,
            kind,
            params,
            pending_params: Vec::new(),
            queue: None,
            worker: None,
        })
    }

    pub fn handle(&self) -> PinHandle {
        self.handle
    }

    pub fn polarity(&self) -> Polarity {
        Polarity::Output
    }

    pub fn params(&self) -> &PinParams {
        &self.params
    }

    pub fn start(&mut self) -> Result<(), TransportError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let scope = ParamScope::new(self.params(), self.polarity().prefix());
        let mut transport = OutputTransport::open(self.kind, &scope)?;
        for (param, value) in self.pending_params.drain(..) {
            transport.set_parameter(param, value);
        }

        let (tx, rx) = unbounded::<QueueItem>();
        let pin = self.handle;
        let worker = std::thread::Builder::new()
            .name(format!("framewire-out-{}-{}", self.module, pin))
            .spawn(move || {
                let pool = pool::global();
                for item in rx {
                    match item {
                        QueueItem::Frame(handle) => {
                            let envelope = pool.with_frame(handle, |frame| {
                                FrameEnvelope::new(*frame.headers(), frame.buffer().to_vec())
                            });
                            match envelope {
                                Some(envelope) => {
                                    if let Err(err) = transport.send(&envelope) {
                                        error!(%pin, %handle, %err, "frame transmission failed");
                                    }
                                }
                                None => error!(%pin, %handle, "queued frame no longer in pool"),
                            }
                            pool.release(handle);
                        }
                        QueueItem::SetParameter(param, value) => {
                            transport.set_parameter(param, value);
                        }
                        QueueItem::Flush => break,
                    }
                }
                debug!(%pin, "output worker exiting");
            })?;
        self.queue = Some(tx);
        self.worker = Some(worker);
        info!(pin = %self.handle, kind = ?self.kind, "output pin started");
        Ok(())
    }

    /// Queues the frame for transmission and returns immediately. The frame's
    /// reference count is raised before enqueueing so the caller can release
    /// its own reference right away.
    pub fn send(&self, frame: FrameHandle) -> Result<(), TransportError> {
        let Some(queue) = &self.queue else {
            return Err(TransportError::NotStarted);
        };
        if pool::global().addref(frame) < 0 {
            return Err(TransportError::UnknownFrame(frame.raw()));
        }
        if queue.send(QueueItem::Frame(frame)).is_err() {
            pool::global().release(frame);
            return Err(TransportError::Disconnected);
        }
        Ok(())
    }

    pub fn set_parameter(&mut self, param: OutputParameter, value: i64) {
        match &self.queue {
            Some(queue) => {
                if queue.send(QueueItem::SetParameter(param, value)).is_err() {
                    error!(pin = %self.handle, "output worker gone, parameter dropped");
                }
            }
            None => self.pending_params.push((param, value)),
        }
    }

    /// Flushes everything already queued, then stops the worker.
    pub fn stop(&mut self) {
        if let Some(queue) = self.queue.take() {
            let _ = queue.send(QueueItem::Flush);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(pin = %self.handle, "output worker panicked");
            }
            info!(pin = %self.handle, "output pin stopped");
        }
    }
}

impl Drop for OutputPin {
    fn drop(&mut self) {
        self.stop();
    }
}
