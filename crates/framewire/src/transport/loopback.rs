use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use framewire_proto::FrameEnvelope;

use super::TransportError;

pub(crate) const DEFAULT_QUEUE_CAPACITY: usize = 32;

struct Channel {
    tx: Sender<FrameEnvelope>,
    rx: Receiver<FrameEnvelope>,
}

/// Named in-process channels shared by every loopback pin in the process.
///
/// The first endpoint to open a name fixes the queue capacity; later opens
/// join the existing channel.
fn channels() -> &'static Mutex<HashMap<String, Channel>> {
    static CHANNELS: OnceLock<Mutex<HashMap<String, Channel>>> = OnceLock::new();
    CHANNELS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn endpoints(name: &str, capacity: usize) -> (Sender<FrameEnvelope>, Receiver<FrameEnvelope>) {
    let mut map = channels().lock().expect("loopback registry poisoned");
    let channel = map.entry(name.to_string()).or_insert_with(|| {
        debug!(name, capacity, "creating loopback channel");
        let (tx, rx) = bounded(capacity);
        Channel { tx, rx }
    });
    (channel.tx.clone(), channel.rx.clone())
}

pub(crate) struct LoopbackInput {
    rx: Receiver<FrameEnvelope>,
}

impl LoopbackInput {
    pub fn open(name: &str, capacity: usize) -> Self {
        let (_tx, rx) = endpoints(name, capacity);
        Self { rx }
    }

    pub fn recv(&mut self, timeout: Duration) -> Result<Option<FrameEnvelope>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }
}

pub(crate) struct LoopbackOutput {
    tx: Sender<FrameEnvelope>,
}

impl LoopbackOutput {
    pub fn open(name: &str, capacity: usize) -> Self {
        let (tx, _rx) = endpoints(name, capacity);
        Self { tx }
    }

    /// Backpressure policy for this transport: block until the peer drains.
    pub fn send(&mut self, envelope: &FrameEnvelope) -> Result<(), TransportError> {
        self.tx
            .send(envelope.clone())
            .map_err(|_| TransportError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framewire_core::FrameHeaders;

    #[test]
    fn frames_cross_a_named_channel_in_order() {
        let mut output = LoopbackOutput::open("test-loopback-order", 4);
        let mut input = LoopbackInput::open("test-loopback-order", 4);

        for index in 0..3u8 {
            let mut headers = FrameHeaders::default();
            headers.media_size = 1;
            output
                .send(&FrameEnvelope::new(headers, vec![index]))
                .expect("send");
        }
        for index in 0..3u8 {
            let envelope = input
                .recv(Duration::from_millis(200))
                .expect("recv")
                .expect("frame available");
            assert_eq!(envelope.payload, vec![index]);
        }
    }

    #[test]
    fn empty_channel_times_out_with_no_frame() {
        let mut input = LoopbackInput::open("test-loopback-empty", 4);
        let got = input.recv(Duration::from_millis(10)).expect("recv");
        assert!(got.is_none());
    }
}
