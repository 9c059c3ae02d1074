//! Outbound transport seam.
//!
//! Connection lifecycle, framing and encryption live behind this trait.  The
//! core only ever calls `send`, fire-and-forget: there is no acknowledgement
//! and nothing is retried here.  Reconnection and resync (via the hello
//! watermark) belong to the connection layer.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Result, SyncError};
use crate::protocol::Packet;

pub trait Transport: Send + Sync {
    fn send(&self, packet: Packet) -> Result<()>;
}

/// Serialise a packet into one wire frame.
pub fn encode_frame(packet: &Packet) -> Result<Bytes> {
    Ok(Bytes::from(packet.encode()?))
}

pub fn decode_frame(frame: &[u8]) -> Result<Packet> {
    Ok(Packet::decode(frame)?)
}

/// Transport that writes encoded frames into an unbounded channel.  The
/// receiving half belongs to whatever owns the real connection (or to an
/// in-process server in the demo binary).
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, packet: Packet) -> Result<()> {
        let frame = encode_frame(&packet)?;
        self.tx
            .send(frame)
            .map_err(|_| SyncError::Transport(format!("connection closed, dropped {}", packet.kind())))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestEmpirePacket;

    #[test]
    fn channel_transport_frames_packets() {
        let (transport, mut rx) = ChannelTransport::new();
        transport
            .send(Packet::RequestEmpire(RequestEmpirePacket {
                empire_ids: vec![3],
            }))
            .unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(&frame[..], br#"{"request_empire":{"empire_ids":[3]}}"#);
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.kind(), "request_empire");
    }

    #[test]
    fn closed_channel_is_a_transport_error() {
        let (transport, rx) = ChannelTransport::new();
        drop(rx);
        let err = transport
            .send(Packet::RequestEmpire(RequestEmpirePacket { empire_ids: vec![] }))
            .unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
    }
}
