use serde::{Deserialize, Serialize};
use thiserror::Error;

use framewire_core::FrameHeaders;

pub const PROTOCOL_VERSION: u32 = 1;

/// One frame as it crosses a socket transport: structured headers followed by
/// the raw media payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameEnvelope {
    pub version: u32,
    pub headers: FrameHeaders,
    pub payload: Vec<u8>,
}

impl FrameEnvelope {
    pub fn new(headers: FrameHeaders, payload: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            headers,
            payload,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("postcard: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("protocol version mismatch: peer={peer}, ours={ours}")]
    VersionMismatch { peer: u32, ours: u32 },
}

pub fn write_frame<W: std::io::Write, T: Serialize>(mut w: W, msg: &T) -> Result<(), ProtoError> {
    let payload = postcard::to_stdvec(msg)?;
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too large"))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&payload)?;
    w.flush()?;
    Ok(())
}

pub fn read_frame<R: std::io::Read, T: for<'de> Deserialize<'de>>(
    mut r: R,
) -> Result<T, ProtoError> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    // Basic sanity limit: 64 MiB.
    if len > 64 * 1024 * 1024 {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too large").into());
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(postcard::from_bytes(&payload)?)
}

/// Decodes a whole datagram (no length prefix) into an envelope, checking the
/// protocol version.
pub fn decode_datagram(buf: &[u8]) -> Result<FrameEnvelope, ProtoError> {
    let envelope: FrameEnvelope = postcard::from_bytes(buf)?;
    if envelope.version != PROTOCOL_VERSION {
        return Err(ProtoError::VersionMismatch {
            peer: envelope.version,
            ours: PROTOCOL_VERSION,
        });
    }
    Ok(envelope)
}

/// Encodes an envelope for datagram transports.
pub fn encode_datagram(envelope: &FrameEnvelope) -> Result<Vec<u8>, ProtoError> {
    Ok(postcard::to_stdvec(envelope)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use framewire_core::{FrameInit, SamplingFormat};

    fn sample_envelope() -> FrameEnvelope {
        let headers = FrameInit::video(4, 2, 8, SamplingFormat::Rgb)
            .resolve()
            .expect("valid init");
        FrameEnvelope::new(headers, vec![7u8; headers.media_size])
    }

    #[test]
    fn stream_framing_roundtrip() {
        let envelope = sample_envelope();
        let mut wire = Vec::new();
        write_frame(&mut wire, &envelope).expect("write");

        let decoded: FrameEnvelope = read_frame(wire.as_slice()).expect("read");
        assert_eq!(decoded.headers, envelope.headers);
        assert_eq!(decoded.payload, envelope.payload);
    }

    #[test]
    fn truncated_stream_is_an_io_error() {
        let envelope = sample_envelope();
        let mut wire = Vec::new();
        write_frame(&mut wire, &envelope).expect("write");
        wire.truncate(wire.len() - 1);

        let result: Result<FrameEnvelope, _> = read_frame(wire.as_slice());
        assert!(matches!(result, Err(ProtoError::Io(_))));
    }

    #[test]
    fn datagram_version_is_checked() {
        let mut envelope = sample_envelope();
        envelope.version = PROTOCOL_VERSION + 1;
        let buf = encode_datagram(&envelope).expect("encode");
        assert!(matches!(
            decode_datagram(&buf),
            Err(ProtoError::VersionMismatch { .. })
        ));
    }
}
