use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use framewire_core::OutputParameter;
use framewire_proto::{read_frame, write_frame, FrameEnvelope, ProtoError, PROTOCOL_VERSION};

use super::TransportError;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Stream-socket receiver: binds the configured port, serves one peer at a
/// time, and reads length-framed envelopes.
pub(crate) struct TcpInput {
    listener: TcpListener,
    conn: Option<TcpStream>,
}

impl TcpInput {
    pub fn bind(port: u16) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        debug!(port, "tcp input listening");
        Ok(Self {
            listener,
            conn: None,
        })
    }

    #[cfg(test)]
    pub fn local_port(&self) -> u16 {
        self.listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(0)
    }

    pub fn recv(&mut self, timeout: Duration) -> Result<Option<FrameEnvelope>, TransportError> {
        if self.conn.is_none() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "tcp input peer connected");
                    stream.set_read_timeout(Some(timeout.max(ACCEPT_POLL_INTERVAL)))?;
                    self.conn = Some(stream);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(timeout.min(ACCEPT_POLL_INTERVAL));
                    return Ok(None);
                }
                Err(err) => return Err(err.into()),
            }
        }

        let stream = self.conn.as_mut().expect("connection just ensured");

        // Peek the length prefix so an idle wait consumes nothing and cannot
        // desynchronise the framing.
        let mut probe = [0u8; 4];
        match stream.peek(&mut probe) {
            Ok(0) => {
                debug!("tcp input peer closed");
                self.conn = None;
                return Ok(None);
            }
            Ok(n) if n < 4 => return Ok(None),
            Ok(_) => {}
            Err(err) if is_timeout(&err) => return Ok(None),
            Err(err) => {
                self.conn = None;
                return Err(err.into());
            }
        }

        match read_frame::<_, FrameEnvelope>(&mut *stream) {
            Ok(envelope) => {
                if envelope.version != PROTOCOL_VERSION {
                    return Err(ProtoError::VersionMismatch {
                        peer: envelope.version,
                        ours: PROTOCOL_VERSION,
                    }
                    .into());
                }
                Ok(Some(envelope))
            }
            Err(err) => {
                // Any failure mid-frame leaves the stream unframed; drop the
                // connection and wait for the peer to come back.
                self.conn = None;
                Err(err.into())
            }
        }
    }
}

/// Stream-socket sender: connects lazily and reconnects once per send.
pub(crate) struct TcpOutput {
    host: String,
    port: u16,
    conn: Option<TcpStream>,
}

impl TcpOutput {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            conn: None,
        }
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        let addr: SocketAddr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    ErrorKind::AddrNotAvailable,
                    format!("no address for {}:{}", self.host, self.port),
                )
            })?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_nodelay(true)?;
        debug!(%addr, "tcp output connected");
        self.conn = Some(stream);
        Ok(())
    }

    pub fn send(&mut self, envelope: &FrameEnvelope) -> Result<(), TransportError> {
        for attempt in 0..2 {
            if self.conn.is_none() {
                self.connect()?;
            }
            let stream = self.conn.as_mut().expect("connection just ensured");
            match write_frame(&mut *stream, envelope) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(attempt, %err, "tcp output send failed, reconnecting");
                    self.conn = None;
                }
            }
        }
        Err(TransportError::Disconnected)
    }

    pub fn set_parameter(&mut self, param: OutputParameter, value: i64) {
        match param {
            OutputParameter::DestinationPort if (1..=i64::from(u16::MAX)).contains(&value) => {
                self.port = value as u16;
                self.conn = None;
            }
            _ => debug!(?param, value, "output parameter ignored by tcp transport"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framewire_core::{FrameInit, SamplingFormat};

    #[test]
    fn envelopes_cross_a_local_socket() {
        let mut input = TcpInput::bind(0).expect("bind");
        let mut output = TcpOutput::new("127.0.0.1", input.local_port());

        let headers = FrameInit::video(8, 8, 8, SamplingFormat::Bgra)
            .resolve()
            .expect("valid init");
        let sent = FrameEnvelope::new(headers, vec![0x5A; headers.media_size]);
        output.send(&sent).expect("send");

        let mut received = None;
        for _ in 0..100 {
            if let Some(envelope) = input.recv(Duration::from_millis(20)).expect("recv") {
                received = Some(envelope);
                break;
            }
        }
        let received = received.expect("frame arrives");
        assert_eq!(received.headers, headers);
        assert_eq!(received.payload, sent.payload);
    }

    #[test]
    fn send_without_a_listener_is_an_error() {
        // Port reserved then dropped, so nobody is listening on it.
        let port = TcpListener::bind(("127.0.0.1", 0))
            .and_then(|listener| listener.local_addr())
            .map(|addr| addr.port())
            .expect("probe port");
        let mut output = TcpOutput::new("127.0.0.1", port);
        let envelope = FrameEnvelope::new(Default::default(), Vec::new());
        assert!(output.send(&envelope).is_err());
    }
}
