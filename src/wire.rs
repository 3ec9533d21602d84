//! Wire codec (spec.md §4.1): fixed SBN header plus opaque payload.
//!
//! Every frame is `[payload_size: u16][msg_type: u8][processor_id: u32]
//! [spacecraft_id: u32][payload bytes...]`, big-endian on the wire. This
//! mirrors the teacher's `pipe.rs` `RecvOperation`, which reads a fixed
//! byteorder-framed prefix before consuming a payload of the length it
//! announces; here the header carries the SBN-specific metadata in place
//! of the teacher's bare 8-byte length prefix.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{SbnError, SbnResult};

/// Size of the fixed header, in bytes: 2 (size) + 1 (type) + 4 (processor id)
/// + 4 (spacecraft id).
pub const HEADER_LEN: usize = 11;

/// Length of the null-padded ASCII version-identifier string carried in the
/// payload of PROTOCOL messages (spec.md §6).
pub const VERSION_ID_LEN: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Protocol,
    App,
    Subscribe,
    Unsubscribe,
    Heartbeat,
    Announce,
    Ack,
    Nack,
    /// Sentinel value meaning "no message available"; never actually placed
    /// on the wire by this codec, but protocol modules use it as a recv
    /// return value when their transport has nothing pending.
    NoMsg,
}

impl MsgType {
    fn to_u8(self) -> u8 {
        match self {
            MsgType::Protocol => 0,
            MsgType::App => 1,
            MsgType::Subscribe => 2,
            MsgType::Unsubscribe => 3,
            MsgType::Heartbeat => 4,
            MsgType::Announce => 5,
            MsgType::Ack => 6,
            MsgType::Nack => 7,
            MsgType::NoMsg => 8,
        }
    }

    fn from_u8(v: u8) -> SbnResult<MsgType> {
        Ok(match v {
            0 => MsgType::Protocol,
            1 => MsgType::App,
            2 => MsgType::Subscribe,
            3 => MsgType::Unsubscribe,
            4 => MsgType::Heartbeat,
            5 => MsgType::Announce,
            6 => MsgType::Ack,
            7 => MsgType::Nack,
            8 => MsgType::NoMsg,
            other => return Err(SbnError::Protocol(format!("unknown message type {other}"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub payload_size: u16,
    pub msg_type: MsgType,
    pub processor_id: u32,
    pub spacecraft_id: u32,
}

/// Packs a header into `buf`, returning the number of bytes written.
/// Refuses to write past `buf`'s length.
pub fn pack_header(buf: &mut [u8], header: &Header) -> SbnResult<usize> {
    if buf.len() < HEADER_LEN {
        return Err(SbnError::Protocol("buffer too small for header".into()));
    }

    BigEndian::write_u16(&mut buf[0..2], header.payload_size);
    buf[2] = header.msg_type.to_u8();
    BigEndian::write_u32(&mut buf[3..7], header.processor_id);
    BigEndian::write_u32(&mut buf[7..11], header.spacecraft_id);

    Ok(HEADER_LEN)
}

/// Unpacks a header from the front of `buf`. Returns a well-defined error
/// (never panics, never touches caller state) if `buf` is shorter than
/// `HEADER_LEN`.
pub fn unpack_header(buf: &[u8]) -> SbnResult<Header> {
    if buf.len() < HEADER_LEN {
        return Err(SbnError::Protocol(format!(
            "buffer of {} bytes shorter than header ({HEADER_LEN} bytes)",
            buf.len()
        )));
    }

    let payload_size = BigEndian::read_u16(&buf[0..2]);
    let msg_type = MsgType::from_u8(buf[2])?;
    let processor_id = BigEndian::read_u32(&buf[3..7]);
    let spacecraft_id = BigEndian::read_u32(&buf[7..11]);

    Ok(Header {
        payload_size,
        msg_type,
        processor_id,
        spacecraft_id,
    })
}

/// Packs a full frame (header + payload) into a freshly allocated buffer.
/// Fails if the payload does not fit in the 16-bit size field.
pub fn pack_frame(
    msg_type: MsgType,
    processor_id: u32,
    spacecraft_id: u32,
    payload: &[u8],
) -> SbnResult<Vec<u8>> {
    if payload.len() > u16::MAX as usize {
        return Err(SbnError::Protocol(format!(
            "payload of {} bytes exceeds maximum of {}",
            payload.len(),
            u16::MAX
        )));
    }

    let header = Header {
        payload_size: payload.len() as u16,
        msg_type,
        processor_id,
        spacecraft_id,
    };

    let mut buf = vec![0u8; HEADER_LEN + payload.len()];
    pack_header(&mut buf, &header)?;
    buf[HEADER_LEN..].copy_from_slice(payload);

    Ok(buf)
}

/// Unpacks a full frame. Returns the header and a slice pointing at the
/// payload within `buf`. Refuses to read past `buf`'s length, and refuses
/// a header claiming more payload than `buf` actually holds.
pub fn unpack_frame(buf: &[u8]) -> SbnResult<(Header, &[u8])> {
    let header = unpack_header(buf)?;
    let payload_end = HEADER_LEN
        .checked_add(header.payload_size as usize)
        .ok_or_else(|| SbnError::Protocol("payload size overflow".into()))?;

    if buf.len() < payload_end {
        return Err(SbnError::Protocol(format!(
            "buffer of {} bytes shorter than header-declared frame of {payload_end} bytes",
            buf.len()
        )));
    }

    Ok((header, &buf[HEADER_LEN..payload_end]))
}

/// Length of the sequence-number prefix carried inside the payload of
/// APP, ACK, and NACK frames. The fixed SBN header (above) has no room
/// for a sequence number — it is part of the core's ordering/reliability
/// layer, not the wire codec proper — so APP frames carry it (plus the
/// MID, opaque to the core's own data model but needed to republish the
/// message on the far side's local SB) as an 8-byte big-endian prefix
/// ahead of the opaque application payload; ACK/NACK frames carry a
/// sequence number as their entire payload.
pub const SEQ_LEN: usize = 4;
const APP_ENVELOPE_PREFIX_LEN: usize = SEQ_LEN + 4;

/// Prepends a sequence number and MID to an application payload for an
/// APP frame.
pub fn pack_app_envelope(seq: u32, mid: crate::mid::Mid, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(APP_ENVELOPE_PREFIX_LEN + payload.len());
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&mid.0.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Splits an APP frame's payload back into its sequence number, MID, and
/// the opaque application bytes.
pub fn unpack_app_envelope(buf: &[u8]) -> SbnResult<(u32, crate::mid::Mid, &[u8])> {
    if buf.len() < APP_ENVELOPE_PREFIX_LEN {
        return Err(SbnError::Protocol(format!(
            "app payload of {} bytes shorter than the {APP_ENVELOPE_PREFIX_LEN}-byte seq+mid prefix",
            buf.len()
        )));
    }
    let seq = BigEndian::read_u32(&buf[..SEQ_LEN]);
    let mid = crate::mid::Mid(BigEndian::read_u32(&buf[SEQ_LEN..APP_ENVELOPE_PREFIX_LEN]));
    Ok((seq, mid, &buf[APP_ENVELOPE_PREFIX_LEN..]))
}

/// Packs the sole payload of an ACK/NACK frame: the sequence being
/// acknowledged or negatively acknowledged.
pub fn pack_seq_payload(seq: u32) -> [u8; SEQ_LEN] {
    seq.to_be_bytes()
}

pub fn unpack_seq_payload(buf: &[u8]) -> SbnResult<u32> {
    if buf.len() < SEQ_LEN {
        return Err(SbnError::Protocol(format!(
            "ack/nack payload of {} bytes shorter than {SEQ_LEN} bytes",
            buf.len()
        )));
    }
    Ok(BigEndian::read_u32(&buf[..SEQ_LEN]))
}

/// Packs a fixed-length, null-padded ASCII version identifier.
pub fn pack_version_id(id: &str) -> SbnResult<[u8; VERSION_ID_LEN]> {
    if !id.is_ascii() {
        return Err(SbnError::Protocol("version id must be ASCII".into()));
    }
    if id.len() >= VERSION_ID_LEN {
        return Err(SbnError::Protocol(format!(
            "version id of {} bytes does not fit in {VERSION_ID_LEN} bytes",
            id.len()
        )));
    }

    let mut buf = [0u8; VERSION_ID_LEN];
    buf[..id.len()].copy_from_slice(id.as_bytes());
    Ok(buf)
}

pub fn unpack_version_id(buf: &[u8]) -> SbnResult<String> {
    if buf.len() < VERSION_ID_LEN {
        return Err(SbnError::Protocol("version id buffer too short".into()));
    }
    let end = buf[..VERSION_ID_LEN]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(VERSION_ID_LEN);
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_then_unpack_header_round_trips() {
        let header = Header {
            payload_size: 42,
            msg_type: MsgType::App,
            processor_id: 7,
            spacecraft_id: 99,
        };
        let mut buf = [0u8; HEADER_LEN];
        pack_header(&mut buf, &header).unwrap();
        let parsed = unpack_header(&buf).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn unpack_header_rejects_short_buffer() {
        let buf = [0u8; HEADER_LEN - 1];
        assert!(unpack_header(&buf).is_err());
    }

    #[test]
    fn pack_then_unpack_frame_round_trips_payload_bytes() {
        let payload = b"hi there";
        let frame = pack_frame(MsgType::App, 1, 2, payload).unwrap();
        let (header, parsed_payload) = unpack_frame(&frame).unwrap();

        assert_eq!(header.msg_type, MsgType::App);
        assert_eq!(header.processor_id, 1);
        assert_eq!(header.spacecraft_id, 2);
        assert_eq!(parsed_payload, payload);
    }

    #[test]
    fn unpack_frame_rejects_truncated_payload() {
        let payload = b"0123456789";
        let mut frame = pack_frame(MsgType::App, 1, 2, payload).unwrap();
        frame.truncate(frame.len() - 3);
        assert!(unpack_frame(&frame).is_err());
    }

    #[test]
    fn version_id_round_trips_and_is_null_padded() {
        let packed = pack_version_id("SBN 2.5.0").unwrap();
        assert_eq!(packed.len(), VERSION_ID_LEN);
        assert_eq!(packed[9], 0);
        assert_eq!(unpack_version_id(&packed).unwrap(), "SBN 2.5.0");
    }

    #[test]
    fn version_id_rejects_oversize_string() {
        let too_long = "x".repeat(VERSION_ID_LEN);
        assert!(pack_version_id(&too_long).is_err());
    }

    #[test]
    fn app_envelope_round_trips_sequence_mid_and_payload() {
        let envelope = pack_app_envelope(42, crate::mid::Mid(0x0811), b"hello");
        let (seq, mid, payload) = unpack_app_envelope(&envelope).unwrap();
        assert_eq!(seq, 42);
        assert_eq!(mid, crate::mid::Mid(0x0811));
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn app_envelope_rejects_buffer_shorter_than_seq_prefix() {
        assert!(unpack_app_envelope(&[0, 1]).is_err());
    }

    #[test]
    fn seq_payload_round_trips() {
        let packed = pack_seq_payload(7);
        assert_eq!(unpack_seq_payload(&packed).unwrap(), 7);
    }
}
