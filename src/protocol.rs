//! Binary framing for the HDHomeRun discovery and control protocol.
//!
//! A frame is a big-endian `u16` packet type, a `u16` payload length, a
//! tag-length-value payload and a trailing little-endian CRC-32 computed
//! over the header and payload. Decoding is all-or-nothing: a frame whose
//! checksum or declared length is inconsistent with the buffer is rejected
//! and never partially interpreted.

use super::error::{Error, Result};

pub use super::constants::{
    CONTROL_TCP_PORT, DEVICE_ID_WILDCARD, DEVICE_TYPE_STORAGE, DEVICE_TYPE_TUNER,
    DEVICE_TYPE_WILDCARD, DISCOVER_UDP_PORT, TAG_BASE_URL, TAG_DEVICE_AUTH_STR, TAG_DEVICE_ID,
    TAG_DEVICE_TYPE, TAG_ERROR_MESSAGE, TAG_GETSET_NAME, TAG_GETSET_VALUE, TAG_LINEUP_URL,
    TAG_TUNER_COUNT, TYPE_DISCOVER_REQ, TYPE_DISCOVER_RPY, TYPE_GETSET_REQ, TYPE_GETSET_RPY,
};

/// A single protocol frame: packet type plus TLV payload.
///
/// Unknown tags survive a decode untouched so that newer firmware can add
/// fields without breaking older clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    frame_type: u16,
    tags: Vec<(u8, Vec<u8>)>,
}

impl Frame {
    pub fn new(frame_type: u16) -> Self {
        Self {
            frame_type,
            tags: Vec::new(),
        }
    }

    pub fn frame_type(&self) -> u16 {
        self.frame_type
    }

    pub fn put_bytes<V: Into<Vec<u8>>>(mut self, tag: u8, value: V) -> Self {
        self.tags.push((tag, value.into()));
        self
    }

    pub fn put_u8(self, tag: u8, value: u8) -> Self {
        self.put_bytes(tag, vec![value])
    }

    pub fn put_u32(self, tag: u8, value: u32) -> Self {
        self.put_bytes(tag, value.to_be_bytes().to_vec())
    }

    /// Append a string value terminated by a NUL, as the getset tags expect.
    pub fn put_cstr<S: AsRef<str>>(self, tag: u8, value: S) -> Self {
        let mut bytes = value.as_ref().as_bytes().to_vec();
        bytes.push(0);
        self.put_bytes(tag, bytes)
    }

    pub fn get(&self, tag: u8) -> Option<&[u8]> {
        self.tags
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_slice())
    }

    pub fn get_u8(&self, tag: u8) -> Option<u8> {
        match self.get(tag) {
            Some([value]) => Some(*value),
            _ => None,
        }
    }

    pub fn get_u32(&self, tag: u8) -> Option<u32> {
        match self.get(tag) {
            Some(&[a, b, c, d]) => Some(u32::from_be_bytes([a, b, c, d])),
            _ => None,
        }
    }

    /// Read a string value, trimming any trailing NUL terminators.
    pub fn get_str(&self, tag: u8) -> Option<String> {
        self.get(tag).and_then(|value| {
            let end = value
                .iter()
                .rposition(|b| *b != 0)
                .map(|pos| pos + 1)
                .unwrap_or(0);
            String::from_utf8(value[..end].to_vec()).ok()
        })
    }

    /// Encode the frame into wire bytes with the trailing checksum.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload: Vec<u8> = Vec::new();
        for (tag, value) in &self.tags {
            payload.push(*tag);
            encode_varlen(&mut payload, value.len());
            payload.extend_from_slice(value);
        }

        assert!(
            payload.len() <= u16::MAX as usize,
            "payload of {} bytes exceeds the u16 frame length field",
            payload.len()
        );

        let mut buf = Vec::with_capacity(payload.len() + 8);
        buf.extend_from_slice(&self.frame_type.to_be_bytes());
        buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&payload);
        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decode wire bytes, validating length and checksum before any tag is
    /// interpreted.
    pub fn decode(buf: &[u8]) -> Result<Frame> {
        if buf.len() < 8 {
            return Err(Error::MalformedPacket(format!(
                "frame too short ({} bytes)",
                buf.len()
            )));
        }

        let frame_type = u16::from_be_bytes([buf[0], buf[1]]);
        let payload_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if 4 + payload_len + 4 != buf.len() {
            return Err(Error::MalformedPacket(format!(
                "declared payload length {} does not match buffer of {} bytes",
                payload_len,
                buf.len()
            )));
        }

        let crc_offset = 4 + payload_len;
        let expected = u32::from_le_bytes([
            buf[crc_offset],
            buf[crc_offset + 1],
            buf[crc_offset + 2],
            buf[crc_offset + 3],
        ]);
        let actual = crc32(&buf[..crc_offset]);
        if actual != expected {
            return Err(Error::MalformedPacket(format!(
                "checksum mismatch (expected {:08x}, computed {:08x})",
                expected, actual
            )));
        }

        let payload = &buf[4..crc_offset];
        let mut tags = Vec::new();
        let mut pos = 0;
        while pos < payload.len() {
            let tag = payload[pos];
            pos += 1;
            let (len, consumed) = decode_varlen(&payload[pos..]).ok_or_else(|| {
                Error::MalformedPacket(format!("truncated length for tag {:#04x}", tag))
            })?;
            pos += consumed;
            if pos + len > payload.len() {
                return Err(Error::MalformedPacket(format!(
                    "tag {:#04x} value runs past end of payload",
                    tag
                )));
            }
            tags.push((tag, payload[pos..pos + len].to_vec()));
            pos += len;
        }

        Ok(Frame { frame_type, tags })
    }
}

/// Build the broadcast discovery request datagram.
pub fn discover_request(device_type: u32, device_id: u32) -> Vec<u8> {
    Frame::new(TYPE_DISCOVER_REQ)
        .put_u32(TAG_DEVICE_TYPE, device_type)
        .put_u32(TAG_DEVICE_ID, device_id)
        .encode()
}

// Tag lengths up to 127 fit in one byte; longer values spill the low seven
// bits into the first byte with the high bit set.
fn encode_varlen(buf: &mut Vec<u8>, len: usize) {
    if len <= 0x7f {
        buf.push(len as u8);
    } else {
        buf.push(0x80 | (len & 0x7f) as u8);
        buf.push((len >> 7) as u8);
    }
}

fn decode_varlen(buf: &[u8]) -> Option<(usize, usize)> {
    match buf {
        [first, rest @ ..] if *first & 0x80 != 0 => {
            let msb = *rest.first()?;
            Some((((*first & 0x7f) as usize) | ((msb as usize) << 7), 2))
        }
        [first, ..] => Some((*first as usize, 1)),
        [] => None,
    }
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xffff_ffffu32;
    for byte in data {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xedb8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discover_reply() -> Frame {
        Frame::new(TYPE_DISCOVER_RPY)
            .put_u32(TAG_DEVICE_TYPE, DEVICE_TYPE_TUNER)
            .put_u32(TAG_DEVICE_ID, 0x1234_abcd)
            .put_u8(TAG_TUNER_COUNT, 2)
            .put_bytes(TAG_BASE_URL, "http://192.168.0.20:80".as_bytes())
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
    }

    #[test]
    fn round_trip() {
        let frame = discover_reply();
        let decoded = Frame::decode(&frame.encode()).unwrap();

        assert_eq!(decoded.frame_type(), TYPE_DISCOVER_RPY);
        assert_eq!(decoded.get_u32(TAG_DEVICE_TYPE), Some(DEVICE_TYPE_TUNER));
        assert_eq!(decoded.get_u32(TAG_DEVICE_ID), Some(0x1234_abcd));
        assert_eq!(decoded.get_u8(TAG_TUNER_COUNT), Some(2));
        assert_eq!(
            decoded.get_str(TAG_BASE_URL).as_deref(),
            Some("http://192.168.0.20:80")
        );
        assert_eq!(decoded, frame);
    }

    #[test]
    fn round_trip_long_value() {
        let long = vec![0x55u8; 300];
        let frame = Frame::new(TYPE_GETSET_RPY).put_bytes(TAG_GETSET_VALUE, long.clone());
        let bytes = frame.encode();

        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.get(TAG_GETSET_VALUE), Some(long.as_slice()));
    }

    #[test]
    #[should_panic(expected = "exceeds the u16 frame length field")]
    fn oversized_payload_cannot_be_encoded() {
        Frame::new(TYPE_GETSET_RPY)
            .put_bytes(TAG_GETSET_VALUE, vec![0u8; 70_000])
            .encode();
    }

    #[test]
    fn every_single_byte_flip_is_rejected() {
        let bytes = discover_reply().encode();
        for pos in 0..bytes.len() {
            let mut corrupt = bytes.clone();
            corrupt[pos] ^= 0x01;
            let err = Frame::decode(&corrupt)
                .err()
                .unwrap_or_else(|| panic!("flip at byte {} decoded successfully", pos));
            assert!(err.is_malformed_packet(), "flip at byte {}: {}", pos, err);
        }
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let bytes = discover_reply().encode();
        for len in 0..bytes.len() {
            assert!(Frame::decode(&bytes[..len]).is_err(), "accepted {} bytes", len);
        }
    }

    #[test]
    fn declared_length_exceeding_buffer_is_rejected() {
        let mut bytes = discover_reply().encode();
        // Inflate the declared payload length past the buffer end
        bytes[2] = 0xff;
        bytes[3] = 0xff;
        assert!(Frame::decode(&bytes).unwrap_err().is_malformed_packet());
    }

    #[test]
    fn unknown_tags_are_preserved_not_fatal() {
        let frame = Frame::new(TYPE_DISCOVER_RPY)
            .put_u32(TAG_DEVICE_ID, 0x1020_3040)
            .put_bytes(0x7e, vec![1, 2, 3]);

        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.get_u32(TAG_DEVICE_ID), Some(0x1020_3040));
        assert_eq!(decoded.get(0x7e), Some([1u8, 2, 3].as_slice()));
    }

    #[test]
    fn discovery_request_layout() {
        let bytes = discover_request(DEVICE_TYPE_WILDCARD, DEVICE_ID_WILDCARD);
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.frame_type(), TYPE_DISCOVER_REQ);
        assert_eq!(frame.get_u32(TAG_DEVICE_TYPE), Some(DEVICE_TYPE_WILDCARD));
        assert_eq!(frame.get_u32(TAG_DEVICE_ID), Some(DEVICE_ID_WILDCARD));
    }

    #[test]
    fn mismatched_typed_accessors_return_none() {
        let frame = Frame::new(TYPE_DISCOVER_RPY).put_u8(TAG_TUNER_COUNT, 4);
        assert_eq!(frame.get_u32(TAG_TUNER_COUNT), None);
        assert_eq!(frame.get_u8(TAG_DEVICE_ID), None);
    }
}
