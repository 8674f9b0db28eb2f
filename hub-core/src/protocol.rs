//! Wire format helpers shared by the control, video, audio, and screen
//! endpoints: the roster serialization, and the 4-byte little-endian
//! participant-id envelope used by every datagram endpoint.

use crate::registry::ParticipantId;

/// Reads the 4-byte little-endian participant id prefix from a datagram.
///
/// Returns `None` if `packet` is shorter than 4 bytes (spec §4.3/§4.4: a
/// too-short datagram is a PROTOCOL error and is dropped).
#[must_use]
pub fn read_envelope(packet: &[u8]) -> Option<(ParticipantId, &[u8])> {
    if packet.len() < 4 {
        return None;
    }
    let id = u32::from_le_bytes([packet[0], packet[1], packet[2], packet[3]]);
    Some((id, &packet[4..]))
}

/// Prepends the 4-byte little-endian participant id envelope to `payload`.
#[must_use]
pub fn write_envelope(id: ParticipantId, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// One roster entry: a live participant's id and username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: ParticipantId,
    pub username: String,
}

/// Encodes a roster as the portable binary layout recommended by spec §6/§9:
/// a varint count, followed by, per record, a varint id and a
/// length-prefixed (varint length) UTF-8 username. The body is hex-encoded
/// by the caller into the `USERS:<hex>` notice.
///
/// This replaces the reference implementation's language-specific pickling,
/// which spec §9 flags as the one wire-compatibility hazard worth fixing in
/// a reimplementation.
#[must_use]
pub fn encode_roster(entries: &[RosterEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_varint(&mut buf, entries.len() as u64);
    for entry in entries {
        write_varint(&mut buf, u64::from(entry.id));
        let name_bytes = entry.username.as_bytes();
        write_varint(&mut buf, name_bytes.len() as u64);
        buf.extend_from_slice(name_bytes);
    }
    buf
}

/// Decodes a roster body produced by [`encode_roster`]. Exposed mainly for
/// tests, since the hub itself only ever encodes the roster (clients decode
/// it, and are out of scope).
pub fn decode_roster(mut body: &[u8]) -> Option<Vec<RosterEntry>> {
    let count = read_varint(&mut body)?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = read_varint(&mut body)?;
        let len = read_varint(&mut body)? as usize;
        if body.len() < len {
            return None;
        }
        let (name_bytes, rest) = body.split_at(len);
        let username = String::from_utf8(name_bytes.to_vec()).ok()?;
        body = rest;
        entries.push(RosterEntry {
            id: u32::try_from(id).ok()?,
            username,
        });
    }
    Some(entries)
}

/// Hex-encodes bytes for embedding in a `USERS:<hex>` notice body.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

fn read_varint(body: &mut &[u8]) -> Option<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let (&byte, rest) = body.split_first()?;
        *body = rest;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

/// Current local time formatted as `HH:MM:SS`, used for chat timestamps.
#[must_use]
pub fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips() {
        let packet = write_envelope(7, b"hello");
        let (id, payload) = read_envelope(&packet).unwrap();
        assert_eq!(id, 7);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn envelope_rejects_short_packets() {
        assert!(read_envelope(&[1, 2, 3]).is_none());
    }

    #[test]
    fn roster_round_trips() {
        let entries = vec![
            RosterEntry { id: 0, username: "alice".to_string() },
            RosterEntry { id: 1, username: "bob".to_string() },
        ];
        let encoded = encode_roster(&entries);
        let decoded = decode_roster(&encoded).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn roster_round_trips_empty() {
        let encoded = encode_roster(&[]);
        assert_eq!(decode_roster(&encoded).unwrap(), vec![]);
    }

    #[test]
    fn hex_matches_known_vector() {
        assert_eq!(to_hex(&[0x00, 0xff, 0x10]), "00ff10");
    }
}
