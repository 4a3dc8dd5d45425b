/// Process-level tunables readable (and partly writable) through the
/// parameter accessors of the public interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalParameter {
    /// Cap on the frame pool's slot table. Read-write.
    MaxFramesInList,
    /// Current number of slots in the frame pool. Read-only.
    CurFramesInList,
}

/// Transport-facing knobs settable per output pin.
///
/// The set is open: transports ignore kinds they have no use for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputParameter {
    /// Target bitrate in bits per second.
    Bitrate,
    /// Destination port override.
    DestinationPort,
    /// Program identifier stamped on outgoing frames.
    Pid,
    /// Multicast TTL.
    Ttl,
}
