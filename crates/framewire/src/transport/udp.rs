use std::io::ErrorKind;
use std::net::{Ipv4Addr, UdpSocket};
use std::time::Duration;

use tracing::{debug, warn};

use framewire_core::OutputParameter;
use framewire_proto::{decode_datagram, encode_datagram, FrameEnvelope};

use super::TransportError;

/// Largest UDP payload we will emit; one envelope per datagram.
const MAX_DATAGRAM: usize = 65_507;

/// Datagram receiver, optionally joined to a multicast group.
pub(crate) struct UdpInput {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpInput {
    pub fn bind(port: u16, mcast_group: Option<&str>) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        if let Some(group) = mcast_group {
            let group: Ipv4Addr = group.parse().map_err(|_| {
                std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("invalid multicast group '{group}'"),
                )
            })?;
            socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
            debug!(%group, port, "udp input joined multicast group");
        } else {
            debug!(port, "udp input listening");
        }
        Ok(Self {
            socket,
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    #[cfg(test)]
    pub fn local_port(&self) -> u16 {
        self.socket
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(0)
    }

    pub fn recv(&mut self, timeout: Duration) -> Result<Option<FrameEnvelope>, TransportError> {
        self.socket.set_read_timeout(Some(timeout))?;
        match self.socket.recv(&mut self.buf) {
            Ok(len) => Ok(Some(decode_datagram(&self.buf[..len])?)),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Datagram sender. Frames that do not fit one datagram are refused; the
/// caller drops them with an error log rather than fragmenting.
pub(crate) struct UdpOutput {
    socket: UdpSocket,
    host: String,
    port: u16,
}

impl UdpOutput {
    pub fn open(host: &str, port: u16) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        Ok(Self {
            socket,
            host: host.to_string(),
            port,
        })
    }

    pub fn send(&mut self, envelope: &FrameEnvelope) -> Result<(), TransportError> {
        let datagram = encode_datagram(envelope)?;
        if datagram.len() > MAX_DATAGRAM {
            return Err(TransportError::Oversize {
                size: datagram.len(),
                limit: MAX_DATAGRAM,
            });
        }
        self.socket
            .send_to(&datagram, (self.host.as_str(), self.port))?;
        Ok(())
    }

    pub fn set_parameter(&mut self, param: OutputParameter, value: i64) {
        match param {
            OutputParameter::DestinationPort if (1..=i64::from(u16::MAX)).contains(&value) => {
                self.port = value as u16;
            }
            OutputParameter::Ttl if (0..=255).contains(&value) => {
                if let Err(err) = self.socket.set_multicast_ttl_v4(value as u32) {
                    warn!(%err, "failed to apply multicast ttl");
                }
            }
            _ => debug!(?param, value, "output parameter ignored by udp transport"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framewire_core::FrameInit;

    #[test]
    fn datagrams_cross_a_local_socket() {
        let mut input = UdpInput::bind(0, None).expect("bind");
        let mut output = UdpOutput::open("127.0.0.1", input.local_port()).expect("open");

        let headers = FrameInit::audio(32).resolve().expect("valid init");
        let sent = FrameEnvelope::new(headers, vec![0x11; 32]);
        output.send(&sent).expect("send");

        let mut received = None;
        for _ in 0..100 {
            if let Some(envelope) = input.recv(Duration::from_millis(20)).expect("recv") {
                received = Some(envelope);
                break;
            }
        }
        let received = received.expect("datagram arrives");
        assert_eq!(received.headers, headers);
        assert_eq!(received.payload, sent.payload);
    }

    #[test]
    fn oversize_frames_are_refused() {
        let mut output = UdpOutput::open("127.0.0.1", 9).expect("open");
        let headers = FrameInit::audio(MAX_DATAGRAM as i64 + 1)
            .resolve()
            .expect("valid init");
        let envelope = FrameEnvelope::new(headers, vec![0u8; MAX_DATAGRAM + 1]);
        assert!(matches!(
            output.send(&envelope),
            Err(TransportError::Oversize { .. })
        ));
    }
}
