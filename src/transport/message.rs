//! Packet wire format.
//!
//! A packet is a bincode-encoded [`Frame`] followed by a little-endian CRC32
//! of every byte before it. The frame carries the magic, the version, the
//! header and the body bytes. The body is itself a bincode list of
//! [`WireEntry`] values, kept as opaque bytes in the frame so buffer filters
//! can rewrite it.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::record::{Record, Value};

pub(crate) const MAGIC: [u8; 4] = *b"SWKB";
pub(crate) const VERSION: u8 = 2;

const CRC_LEN: usize = 4;
/// Length prefix bincode puts in front of a sequence.
const SEQ_PREFIX: usize = 8;

/// Packet header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct MessageHeader {
    pub(crate) ttl: u8,
    pub(crate) domain: String,
    pub(crate) originator: String,
    pub(crate) timestamp_ms: i64,
    pub(crate) clock: u64,
    pub(crate) quality: u32,
    pub(crate) updates: u32,
}

#[derive(Serialize)]
struct FrameRef<'a> {
    magic: [u8; 4],
    version: u8,
    header: &'a MessageHeader,
    body: &'a [u8],
}

#[derive(Deserialize)]
struct Frame {
    magic: [u8; 4],
    version: u8,
    header: MessageHeader,
    body: Vec<u8>,
}

#[derive(Serialize)]
struct WireEntryRef<'a> {
    key: &'a str,
    clock: u64,
    quality: u32,
    value: &'a Value,
}

/// One record on the wire.
#[derive(Deserialize)]
struct WireEntry {
    key: String,
    clock: u64,
    quality: u32,
    value: Value,
}

impl<'a> WireEntryRef<'a> {
    fn new(key: &'a str, record: &'a Record) -> Self {
        Self {
            key,
            clock: record.clock,
            quality: record.quality,
            value: record.value(),
        }
    }
}

fn serialization_failed(e: &bincode::Error) -> TransportError {
    TransportError::SerializationFailed {
        message: e.to_string(),
    }
}

fn deserialization_failed(e: &bincode::Error) -> TransportError {
    TransportError::DeserializationFailed {
        message: e.to_string(),
    }
}

fn size_of<T: Serialize>(value: &T) -> usize {
    bincode::serialized_size(value)
        .ok()
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(usize::MAX)
}

impl MessageHeader {
    /// Bytes a packet spends outside its entries.
    ///
    /// Covers the frame around the body, the body's own entry count and the
    /// CRC trailer, so `overhead() + sum(entry_len)` is the packet size when
    /// no buffer filter rewrites the body.
    pub(crate) fn overhead(&self) -> usize {
        let frame = FrameRef {
            magic: MAGIC,
            version: VERSION,
            header: self,
            body: &[],
        };
        size_of(&frame)
            .saturating_add(SEQ_PREFIX)
            .saturating_add(CRC_LEN)
    }

    /// Identity of the packet regardless of TTL, for duplicate suppression.
    pub(crate) fn digest(&self, body: &[u8]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.originator.as_bytes());
        hasher.update(&[0]);
        hasher.update(&self.timestamp_ms.to_le_bytes());
        hasher.update(&self.clock.to_le_bytes());
        hasher.update(body);
        *hasher.finalize().as_bytes()
    }
}

/// Encoded size of one body entry.
pub(crate) fn entry_len(key: &str, record: &Record) -> usize {
    size_of(&WireEntryRef::new(key, record))
}

/// Encode records into a body.
pub(crate) fn encode_body(records: &[(String, Record)]) -> Result<Vec<u8>, TransportError> {
    let entries: Vec<WireEntryRef<'_>> = records
        .iter()
        .map(|(key, record)| WireEntryRef::new(key, record))
        .collect();
    bincode::serialize(&entries).map_err(|e| serialization_failed(&e))
}

/// Frame a header and body and append the CRC trailer.
pub(crate) fn encode_packet(header: &MessageHeader, body: &[u8]) -> Result<Vec<u8>, TransportError> {
    let frame = FrameRef {
        magic: MAGIC,
        version: VERSION,
        header,
        body,
    };
    let mut packet = bincode::serialize(&frame).map_err(|e| serialization_failed(&e))?;
    let mut hasher = Hasher::new();
    hasher.update(&packet);
    packet.extend_from_slice(&hasher.finalize().to_le_bytes());
    Ok(packet)
}

/// Parse and verify a packet, returning the header and the raw body.
pub(crate) fn decode_packet(packet: &[u8]) -> Result<(MessageHeader, Vec<u8>), TransportError> {
    if packet.len() < MAGIC.len() + CRC_LEN {
        return Err(TransportError::DeserializationFailed {
            message: format!("packet of {} bytes is too short", packet.len()),
        });
    }
    let (framed, crc_bytes) = packet.split_at(packet.len() - CRC_LEN);
    let mut stored = [0u8; CRC_LEN];
    stored.copy_from_slice(crc_bytes);
    let mut hasher = Hasher::new();
    hasher.update(framed);
    if u32::from_le_bytes(stored) != hasher.finalize() {
        return Err(TransportError::DeserializationFailed {
            message: "CRC mismatch".to_string(),
        });
    }
    if framed[..MAGIC.len()] != MAGIC {
        return Err(TransportError::DeserializationFailed {
            message: "bad magic".to_string(),
        });
    }

    let frame: Frame = bincode::deserialize(framed).map_err(|e| deserialization_failed(&e))?;
    if frame.version != VERSION {
        return Err(TransportError::DeserializationFailed {
            message: format!("unsupported packet version {}", frame.version),
        });
    }
    debug_assert_eq!(frame.magic, MAGIC);
    Ok((frame.header, frame.body))
}

/// Decode a body into records.
pub(crate) fn decode_body(body: &[u8]) -> Result<Vec<(String, Record)>, TransportError> {
    let entries: Vec<WireEntry> = bincode::deserialize(body).map_err(|e| deserialization_failed(&e))?;
    Ok(entries
        .into_iter()
        .map(|entry| {
            let record = Record::new(entry.value)
                .with_clock(entry.clock)
                .with_quality(entry.quality);
            (entry.key, record)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AnyValue;

    fn header() -> MessageHeader {
        MessageHeader {
            ttl: 2,
            domain: "field".to_string(),
            originator: "agent.0".to_string(),
            timestamp_ms: 1_700_000_000_000,
            clock: 42,
            quality: 1,
            updates: 0,
        }
    }

    fn with_crc(mut framed: Vec<u8>) -> Vec<u8> {
        let mut hasher = Hasher::new();
        hasher.update(&framed);
        framed.extend_from_slice(&hasher.finalize().to_le_bytes());
        framed
    }

    #[test]
    fn test_packet_preserves_every_kind() {
        let records = vec![
            ("i".to_string(), Record::new(-5).with_clock(3).with_quality(2)),
            ("d".to_string(), Record::new(2.5).with_clock(u64::MAX)),
            ("s".to_string(), Record::new("hello")),
            ("ia".to_string(), Record::new(vec![1i64, 2, 3])),
            ("da".to_string(), Record::new(vec![1.5, -0.0])),
            ("f".to_string(), Record::new(Value::File(vec![0, 1, 2]))),
            ("img".to_string(), Record::new(Value::Image(vec![9; 16]))),
            ("any".to_string(), Record::new(AnyValue::from_raw("pose", b"{}".to_vec()))),
            ("u".to_string(), Record::uninitialized()),
        ];
        let entries: usize = records.iter().map(|(k, r)| entry_len(k, r)).sum();
        let body = encode_body(&records).unwrap();
        assert_eq!(body.len(), SEQ_PREFIX + entries);

        let mut h = header();
        h.updates = 9;
        let packet = encode_packet(&h, &body).unwrap();
        assert_eq!(packet.len(), h.overhead() + entries);

        let (decoded_header, decoded_body) = decode_packet(&packet).unwrap();
        assert_eq!(decoded_header, h);
        assert_eq!(decode_body(&decoded_body).unwrap(), records);
    }

    #[test]
    fn test_corrupt_packet_rejected() {
        let body = encode_body(&[("k".to_string(), Record::new(1))]).unwrap();
        let mut packet = encode_packet(&header(), &body).unwrap();
        let last = packet.len() - 6;
        packet[last] ^= 0xff;
        let err = decode_packet(&packet).unwrap_err();
        assert!(err.to_string().contains("CRC"));
    }

    #[test]
    fn test_short_and_foreign_packets_rejected() {
        assert!(decode_packet(b"SW").is_err());
        let foreign = with_crc(b"ABCD\x02\x00".to_vec());
        assert!(decode_packet(&foreign).unwrap_err().to_string().contains("magic"));
    }

    #[test]
    fn test_other_version_rejected() {
        let frame = FrameRef {
            magic: MAGIC,
            version: VERSION + 1,
            header: &header(),
            body: &[],
        };
        let packet = with_crc(bincode::serialize(&frame).unwrap());
        let err = decode_packet(&packet).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_truncated_body_rejected() {
        let body = encode_body(&[("k".to_string(), Record::new("abcdef"))]).unwrap();
        assert!(decode_body(&body[..body.len() - 2]).is_err());
    }

    #[test]
    fn test_digest_ignores_ttl() {
        let mut a = header();
        let b = {
            let mut h = header();
            h.ttl = 0;
            h
        };
        assert_eq!(a.digest(b"x"), b.digest(b"x"));
        a.clock += 1;
        assert_ne!(a.digest(b"x"), b.digest(b"x"));
    }
}
