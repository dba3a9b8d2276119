//! # Control Wire Format
//!
//! Fixed-header binary frames exchanged on the control connection.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Packet Type (16)       |    Declared Payload Len (16)  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload (verbatim)                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! All header fields and all multi-byte payload fields are little-endian.
//! Zero-length payloads are valid and common (keepalive, heartbeat). The
//! codec never interprets payload bytes; that is the caller's job.

use std::io::{self, Read};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ControlError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP port of the host's control service.
pub const CONTROL_PORT: u16 = 47995;

/// Size of the fixed packet header: 2-byte type + 2-byte declared length.
pub const HEADER_SIZE: usize = 4;

/// Keepalive / handshake ping. Zero-length payload.
pub const PTYPE_KEEPALIVE: u16 = 0x13FF;
/// Steady-state heartbeat. Zero-length payload.
pub const PTYPE_HEARTBEAT: u16 = 0x1401;
/// Handshake finalize. Zero-length payload.
pub const PTYPE_HANDSHAKE_FINALIZE: u16 = 0x1405;
/// Resync / invalidate-reference-frames request. 16-byte payload.
pub const PTYPE_RESYNC: u16 = 0x1404;
/// Reserved configuration marker. The configuration blob itself is sent as a
/// raw pre-framed write, never through this packet type.
pub const PTYPE_CONFIG_MARKER: u16 = 0x1205;
/// Jitter probe. 16-byte payload.
pub const PTYPE_JITTER: u16 = 0x140C;

/// Declared payload length of a resync request: two little-endian u64 fields.
pub const PAYLEN_RESYNC: usize = 16;
/// Declared payload length of a jitter probe: four little-endian u32 fields.
pub const PAYLEN_JITTER: usize = 16;
/// Declared payload length carried by the configuration marker type.
pub const PAYLEN_CONFIG_MARKER: usize = 4;

// ─── Control Packet ──────────────────────────────────────────────────────────

/// One frame on the control connection. Immutable once constructed; the
/// declared length on the wire always equals the payload's actual size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    packet_type: u16,
    payload: Bytes,
}

impl ControlPacket {
    /// Create a packet with a payload.
    pub fn new(packet_type: u16, payload: Bytes) -> Self {
        ControlPacket {
            packet_type,
            payload,
        }
    }

    /// Create a packet with an empty payload.
    pub fn empty(packet_type: u16) -> Self {
        ControlPacket {
            packet_type,
            payload: Bytes::new(),
        }
    }

    /// Wire packet type.
    pub fn packet_type(&self) -> u16 {
        self.packet_type
    }

    /// Declared payload length as carried in the header.
    pub fn declared_len(&self) -> u16 {
        self.payload.len() as u16
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Encode to wire form: `HEADER_SIZE + payload.len()` bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u16_le(self.packet_type);
        buf.put_u16_le(self.payload.len() as u16);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Decode one packet from a blocking stream.
    ///
    /// Reads exactly [`HEADER_SIZE`] bytes, accumulating partial reads, then
    /// exactly the declared payload length. A stream that ends before either
    /// is satisfied fails with [`ControlError::ProtocolTruncated`]. The codec
    /// has no timeout of its own; deadlines belong to the stream.
    pub fn decode<R: Read>(reader: &mut R) -> Result<Self, ControlError> {
        let mut header = [0u8; HEADER_SIZE];
        read_full(reader, &mut header)?;

        let packet_type = u16::from_le_bytes([header[0], header[1]]);
        let declared_len = u16::from_le_bytes([header[2], header[3]]);

        let payload = if declared_len == 0 {
            Bytes::new()
        } else {
            let mut body = vec![0u8; declared_len as usize];
            read_full(reader, &mut body)?;
            Bytes::from(body)
        };

        Ok(ControlPacket {
            packet_type,
            payload,
        })
    }
}

/// Fill `buf` completely from `reader`, tolerating short reads.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), ControlError> {
    let mut offset = 0;
    while offset < buf.len() {
        match reader.read(&mut buf[offset..]) {
            Ok(0) => return Err(ControlError::ProtocolTruncated),
            Ok(n) => offset += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(ControlError::Io(e)),
        }
    }
    Ok(())
}

// ─── Control Response ────────────────────────────────────────────────────────

/// A packet received in reply to a request. Same decode contract as
/// [`ControlPacket`], plus a status code a caller may attach after the
/// exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    packet: ControlPacket,
    status: Option<u16>,
}

impl ControlResponse {
    /// Read one reply packet from a blocking stream.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, ControlError> {
        Ok(ControlResponse {
            packet: ControlPacket::decode(reader)?,
            status: None,
        })
    }

    /// The underlying packet.
    pub fn packet(&self) -> &ControlPacket {
        &self.packet
    }

    /// Status code attached by the caller, if any.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Attach a status code after the exchange.
    pub fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }
}

// ─── Packet Builders ─────────────────────────────────────────────────────────

/// Keepalive ping sent during the handshake.
pub fn keepalive() -> ControlPacket {
    ControlPacket::empty(PTYPE_KEEPALIVE)
}

/// Steady-state heartbeat.
pub fn heartbeat() -> ControlPacket {
    ControlPacket::empty(PTYPE_HEARTBEAT)
}

/// Handshake finalize.
pub fn handshake_finalize() -> ControlPacket {
    ControlPacket::empty(PTYPE_HANDSHAKE_FINALIZE)
}

/// First field of the resync payload as the host expects it on the wire.
pub const RESYNC_FIRST_FIELD: u64 = 0;
/// Second field of the resync payload as the host expects it on the wire.
pub const RESYNC_NEXT_FIELD: u64 = 0xFFFFF;

/// Invalidate-reference-frames request.
///
/// The host keys on the packet type alone and does not interpret the two
/// range fields, which are carried as fixed values. The coalesced range that
/// motivated the request is logged by the sender instead.
pub fn resync_request() -> ControlPacket {
    let mut payload = BytesMut::with_capacity(PAYLEN_RESYNC);
    payload.put_u64_le(RESYNC_FIRST_FIELD);
    payload.put_u64_le(RESYNC_NEXT_FIELD);
    ControlPacket::new(PTYPE_RESYNC, payload.freeze())
}

/// Jitter probe carrying the session-local sequence counter.
pub fn jitter_probe(seq: u32) -> ControlPacket {
    let mut payload = BytesMut::with_capacity(PAYLEN_JITTER);
    payload.put_u32_le(0);
    payload.put_u32_le(77);
    payload.put_u32_le(888);
    payload.put_u32_le(seq);
    ControlPacket::new(PTYPE_JITTER, payload.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// A reader that hands out one byte per call, to exercise partial-read
    /// accumulation in the decoder.
    struct OneByteReader(Cursor<Vec<u8>>);

    impl Read for OneByteReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(1);
            self.0.read(&mut buf[..len])
        }
    }

    #[test]
    fn roundtrip_with_payload() {
        let packet = ControlPacket::new(PTYPE_RESYNC, Bytes::from_static(&[1, 2, 3, 4, 5]));
        let wire = packet.encode();
        let decoded = ControlPacket::decode(&mut Cursor::new(wire.to_vec())).unwrap();
        assert_eq!(decoded.packet_type(), PTYPE_RESYNC);
        assert_eq!(decoded.declared_len(), 5);
        assert_eq!(decoded.payload(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn roundtrip_empty_payload() {
        let wire = keepalive().encode();
        assert_eq!(wire.len(), HEADER_SIZE);
        let decoded = ControlPacket::decode(&mut Cursor::new(wire.to_vec())).unwrap();
        assert_eq!(decoded.packet_type(), PTYPE_KEEPALIVE);
        assert_eq!(decoded.declared_len(), 0);
        assert!(decoded.payload().is_empty());
    }

    #[test]
    fn header_layout_is_little_endian() {
        let packet = ControlPacket::new(PTYPE_RESYNC, Bytes::from_static(&[0xAA, 0xBB, 0xCC]));
        let wire = packet.encode();
        assert_eq!(&wire[..], &[0x04, 0x14, 0x03, 0x00, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn decode_accumulates_partial_reads() {
        let wire = ControlPacket::new(0x1401, Bytes::from_static(b"abcd")).encode();
        let mut reader = OneByteReader(Cursor::new(wire.to_vec()));
        let decoded = ControlPacket::decode(&mut reader).unwrap();
        assert_eq!(decoded.packet_type(), 0x1401);
        assert_eq!(decoded.payload(), b"abcd");
    }

    #[test]
    fn truncated_header_fails() {
        let mut reader = Cursor::new(vec![0xFF, 0x13]);
        let err = ControlPacket::decode(&mut reader).unwrap_err();
        assert!(matches!(err, ControlError::ProtocolTruncated));
    }

    #[test]
    fn truncated_payload_fails() {
        // Header declares 10 payload bytes but only 4 arrive.
        let mut wire = vec![0x04, 0x14, 0x0A, 0x00];
        wire.extend_from_slice(&[1, 2, 3, 4]);
        let err = ControlPacket::decode(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(err, ControlError::ProtocolTruncated));
    }

    #[test]
    fn empty_stream_fails() {
        let err = ControlPacket::decode(&mut Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, ControlError::ProtocolTruncated));
    }

    #[test]
    fn response_carries_optional_status() {
        let wire = heartbeat().encode();
        let mut response = ControlResponse::read_from(&mut Cursor::new(wire.to_vec())).unwrap();
        assert_eq!(response.status(), None);
        response.set_status(0x0001);
        assert_eq!(response.status(), Some(0x0001));
        assert_eq!(response.packet().packet_type(), PTYPE_HEARTBEAT);
    }

    #[test]
    fn jitter_probe_layout() {
        let packet = jitter_probe(42);
        assert_eq!(packet.packet_type(), PTYPE_JITTER);
        assert_eq!(packet.declared_len() as usize, PAYLEN_JITTER);
        let p = packet.payload();
        assert_eq!(u32::from_le_bytes(p[0..4].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(p[4..8].try_into().unwrap()), 77);
        assert_eq!(u32::from_le_bytes(p[8..12].try_into().unwrap()), 888);
        assert_eq!(u32::from_le_bytes(p[12..16].try_into().unwrap()), 42);
    }

    #[test]
    fn resync_request_layout() {
        let packet = resync_request();
        assert_eq!(packet.packet_type(), PTYPE_RESYNC);
        assert_eq!(packet.declared_len() as usize, PAYLEN_RESYNC);
        let p = packet.payload();
        assert_eq!(u64::from_le_bytes(p[0..8].try_into().unwrap()), RESYNC_FIRST_FIELD);
        assert_eq!(u64::from_le_bytes(p[8..16].try_into().unwrap()), RESYNC_NEXT_FIELD);
    }

    #[test]
    fn handshake_packets_are_empty() {
        assert_eq!(keepalive().declared_len(), 0);
        assert_eq!(heartbeat().declared_len(), 0);
        assert_eq!(handshake_finalize().declared_len(), 0);
    }
}
