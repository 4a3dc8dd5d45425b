mod loopback;
mod tcp;
mod udp;

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use framewire_core::{ConfigError, OutputParameter, PinParams};
use framewire_proto::{FrameEnvelope, ProtoError};

pub(crate) use loopback::{LoopbackInput, LoopbackOutput, DEFAULT_QUEUE_CAPACITY};
pub(crate) use tcp::{TcpInput, TcpOutput};
pub(crate) use udp::{UdpInput, UdpOutput};

/// Transport variant selected by a pin's `type` configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// In-process bounded queue addressed by channel name.
    Loopback,
    /// Stream socket carrying length-framed envelopes.
    Tcp,
    /// Datagram socket, one envelope per datagram, optional multicast.
    Udp,
    /// Output-only sink that counts and discards.
    DevNull,
}

impl TransportKind {
    pub fn parse(value: &str) -> Result<Self, TransportError> {
        match value {
            "loopback" | "mem" => Ok(Self::Loopback),
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "devnull" => Ok(Self::DevNull),
            other => Err(TransportError::Unsupported(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("envelope: {0}")]
    Envelope(#[from] ProtoError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("unsupported transport '{0}'")]
    Unsupported(String),

    #[error("transport '{0:?}' has no input side")]
    NotAnInput(TransportKind),

    #[error("frame of {size} bytes exceeds the {limit} byte datagram limit")]
    Oversize { size: usize, limit: usize },

    #[error("peer endpoint closed")]
    Disconnected,

    #[error("pin is not started")]
    NotStarted,

    #[error("frame handle {0} is unknown to the pool")]
    UnknownFrame(i32),
}

impl TransportError {
    /// Fatal errors end the pin's worker and surface as a `Quit` callback;
    /// everything else is logged and retried by the transport.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

/// View over a pin's parameter block with the polarity prefix applied, so
/// transports read `port` and resolve `in_port` or `out_port` as appropriate.
#[derive(Clone, Copy)]
pub(crate) struct ParamScope<'a> {
    params: &'a PinParams,
    prefix: &'a str,
}

impl<'a> ParamScope<'a> {
    pub fn new(params: &'a PinParams, prefix: &'a str) -> Self {
        Self { params, prefix }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.params.get(&self.full_key(key))
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.params.get_usize(&self.full_key(key))
    }

    pub fn require(&self, key: &str) -> Result<&'a str, ConfigError> {
        self.params.require(&self.full_key(key))
    }

    pub fn require_u16(&self, key: &str) -> Result<u16, ConfigError> {
        self.params.require_u16(&self.full_key(key))
    }
}

/// Receiving side of an input pin, dispatched on the configured variant.
pub(crate) enum InputTransport {
    Loopback(LoopbackInput),
    Tcp(TcpInput),
    Udp(UdpInput),
}

impl InputTransport {
    /// Checks the parameter block without opening any endpoint, so pin
    /// construction rejects a config its `start` could never satisfy.
    pub fn validate(kind: TransportKind, scope: &ParamScope<'_>) -> Result<(), TransportError> {
        match kind {
            TransportKind::Loopback => {
                scope.require("channel")?;
            }
            TransportKind::Tcp | TransportKind::Udp => {
                scope.require_u16("port")?;
            }
            TransportKind::DevNull => return Err(TransportError::NotAnInput(kind)),
        }
        Ok(())
    }

    pub fn open(kind: TransportKind, scope: &ParamScope<'_>) -> Result<Self, TransportError> {
        match kind {
            TransportKind::Loopback => {
                let name = scope.require("channel")?;
                let capacity = scope
                    .get_usize("queuesize")
                    .unwrap_or(DEFAULT_QUEUE_CAPACITY);
                Ok(Self::Loopback(LoopbackInput::open(name, capacity)))
            }
            TransportKind::Tcp => Ok(Self::Tcp(TcpInput::bind(scope.require_u16("port")?)?)),
            TransportKind::Udp => Ok(Self::Udp(UdpInput::bind(
                scope.require_u16("port")?,
                scope.get("mcast_group"),
            )?)),
            TransportKind::DevNull => Err(TransportError::NotAnInput(kind)),
        }
    }

    /// Waits up to `timeout` for the next frame. `Ok(None)` means "nothing
    /// yet" and is the worker's cancellation point.
    pub fn recv(&mut self, timeout: Duration) -> Result<Option<FrameEnvelope>, TransportError> {
        match self {
            Self::Loopback(inner) => inner.recv(timeout),
            Self::Tcp(inner) => inner.recv(timeout),
            Self::Udp(inner) => inner.recv(timeout),
        }
    }
}

/// Transmitting side of an output pin.
pub(crate) enum OutputTransport {
    Loopback(LoopbackOutput),
    Tcp(TcpOutput),
    Udp(UdpOutput),
    DevNull(DevNullOutput),
}

impl OutputTransport {
    /// Parameter-only counterpart of [`InputTransport::validate`].
    pub fn validate(kind: TransportKind, scope: &ParamScope<'_>) -> Result<(), TransportError> {
        match kind {
            TransportKind::Loopback => {
                scope.require("channel")?;
            }
            TransportKind::Tcp | TransportKind::Udp => {
                scope.require("host")?;
                scope.require_u16("port")?;
            }
            TransportKind::DevNull => {}
        }
        Ok(())
    }

    pub fn open(kind: TransportKind, scope: &ParamScope<'_>) -> Result<Self, TransportError> {
        match kind {
            TransportKind::Loopback => {
                let name = scope.require("channel")?;
                let capacity = scope
                    .get_usize("queuesize")
                    .unwrap_or(DEFAULT_QUEUE_CAPACITY);
                Ok(Self::Loopback(LoopbackOutput::open(name, capacity)))
            }
            TransportKind::Tcp => Ok(Self::Tcp(TcpOutput::new(
                scope.require("host")?,
                scope.require_u16("port")?,
            ))),
            TransportKind::Udp => Ok(Self::Udp(UdpOutput::open(
                scope.require("host")?,
                scope.require_u16("port")?,
            )?)),
            TransportKind::DevNull => Ok(Self::DevNull(DevNullOutput::default())),
        }
    }

    pub fn send(&mut self, envelope: &FrameEnvelope) -> Result<(), TransportError> {
        match self {
            Self::Loopback(inner) => inner.send(envelope),
            Self::Tcp(inner) => inner.send(envelope),
            Self::Udp(inner) => inner.send(envelope),
            Self::DevNull(inner) => {
                inner.sent += 1;
                debug!(frames_discarded = inner.sent, "devnull output consumed frame");
                Ok(())
            }
        }
    }

    /// Applies an output parameter; variants ignore kinds they have no use for.
    pub fn set_parameter(&mut self, param: OutputParameter, value: i64) {
        match self {
            Self::Tcp(inner) => inner.set_parameter(param, value),
            Self::Udp(inner) => inner.set_parameter(param, value),
            Self::Loopback(_) | Self::DevNull(_) => {
                debug!(?param, value, "output parameter ignored by transport");
            }
        }
    }
}

/// Sink that discards every frame, keeping only a count. Useful as the far
/// end of a throughput probe.
#[derive(Debug, Default)]
pub(crate) struct DevNullOutput {
    pub sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parsing_covers_the_registry() {
        assert_eq!(
            TransportKind::parse("loopback").unwrap(),
            TransportKind::Loopback
        );
        assert_eq!(TransportKind::parse("mem").unwrap(), TransportKind::Loopback);
        assert_eq!(TransportKind::parse("tcp").unwrap(), TransportKind::Tcp);
        assert_eq!(TransportKind::parse("udp").unwrap(), TransportKind::Udp);
        assert!(matches!(
            TransportKind::parse("rtp"),
            Err(TransportError::Unsupported(_))
        ));
    }

    #[test]
    fn devnull_has_no_input_side() {
        let params = PinParams::parse("in_type=devnull");
        let scope = ParamScope::new(&params, "in_");
        assert!(matches!(
            InputTransport::open(TransportKind::DevNull, &scope),
            Err(TransportError::NotAnInput(TransportKind::DevNull))
        ));
    }

    #[test]
    fn scoped_lookup_applies_the_polarity_prefix() {
        let params = PinParams::parse("in_type=udp,in_port=5000");
        let scope = ParamScope::new(&params, "in_");
        assert_eq!(scope.require_u16("port").unwrap(), 5000);
        assert!(scope.require("host").is_err());
    }
}
