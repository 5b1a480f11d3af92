//! WebSocket frame codec (RFC 6455 section 5.2)
//!
//! Pure functions, no I/O. Wire layout:
//!
//! ```text
//! byte 0: FIN(1) RSV(3) OPCODE(4)
//! byte 1: MASK(1) LEN(7)
//! LEN == 126 -> 2 more bytes, big-endian payload length
//! LEN == 127 -> 8 more bytes (rejected: unsupported size)
//! MASK == 1  -> 4 mask-key bytes
//! payload
//! ```
//!
//! Only the 7-bit and 16-bit length tiers are supported in either direction.

use bytes::{BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::types::Role;

/// Largest payload the codec will decode or encode
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Control frames (Close, Ping, Pong) may carry at most 125 bytes
pub const MAX_CONTROL_PAYLOAD_LEN: usize = 125;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Frame opcode (4 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Parse the low nibble of byte 0
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(ProtocolError::InvalidOpcode(other)),
        }
    }

    /// Close, Ping and Pong
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// One WebSocket frame
///
/// `payload` always holds the unmasked bytes. A frame is masked iff
/// `mask_key` is set; masking is applied on the wire only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag
    pub fin: bool,
    pub opcode: Opcode,
    /// Mask key, present iff the frame is masked
    pub mask_key: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a final, unmasked frame
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode,
            mask_key: None,
            payload: payload.into(),
        }
    }

    /// Create a text frame
    pub fn text(text: &str) -> Self {
        Self::new(Opcode::Text, text.as_bytes())
    }

    /// Create a close frame carrying a status code and optional reason
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        payload.truncate(MAX_CONTROL_PAYLOAD_LEN);
        Self::new(Opcode::Close, payload)
    }

    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// Attach a mask key
    pub fn masked_with(mut self, key: [u8; 4]) -> Self {
        self.mask_key = Some(key);
        self
    }

    pub fn is_masked(&self) -> bool {
        self.mask_key.is_some()
    }

    /// Status code of a Close frame, if it carries one
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != Opcode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
    }

    /// Decode exactly one frame from the start of `buf`
    ///
    /// Trailing bytes are ignored; use [`decode`] to learn how many
    /// bytes the frame occupied.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        decode(buf).map(|(frame, _)| frame)
    }

    /// Serialize to wire bytes, masking the payload if a key is set
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = BytesMut::new();
        self.encode_into(&mut out)?;
        Ok(out.to_vec())
    }

    /// Append the wire form of this frame to `dst`
    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let len = self.payload.len();
        if len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::UnsupportedFrameSize);
        }
        dst.reserve(2 + 2 + 4 + len);

        let mut byte0 = self.opcode as u8;
        if self.fin {
            byte0 |= FIN_BIT;
        }
        dst.put_u8(byte0);

        let mask_bit = if self.is_masked() { MASK_BIT } else { 0 };
        if len < LEN_16 as usize {
            dst.put_u8(mask_bit | len as u8);
        } else {
            dst.put_u8(mask_bit | LEN_16);
            dst.put_u16(len as u16);
        }

        match self.mask_key {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&self.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.put_slice(&self.payload),
        }

        Ok(())
    }

    /// Check a received frame against what `local` is allowed to accept
    pub fn validate(&self, local: Role) -> Result<(), ProtocolError> {
        match (local.expects_masked_inbound(), self.is_masked()) {
            (true, false) => return Err(ProtocolError::UnmaskedClientFrame),
            (false, true) => return Err(ProtocolError::MaskedServerFrame),
            _ => {}
        }

        if !self.fin || self.opcode == Opcode::Continuation {
            return Err(ProtocolError::Fragmented);
        }

        if self.opcode.is_control() && self.payload.len() > MAX_CONTROL_PAYLOAD_LEN {
            return Err(ProtocolError::ControlFrameTooLarge(self.payload.len()));
        }

        Ok(())
    }
}

/// XOR `data` with the repeating 4-byte key (its own inverse)
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Total header length implied by the first two bytes
///
/// Covers the extended length and the mask key. Rejects the 64-bit tier
/// without needing any further input.
pub fn header_len(head: [u8; 2]) -> Result<usize, ProtocolError> {
    let mut len = 2;
    match head[1] & LEN_BITS {
        LEN_16 => len += 2,
        LEN_64 => return Err(ProtocolError::UnsupportedFrameSize),
        _ => {}
    }
    if head[1] & MASK_BIT != 0 {
        len += 4;
    }
    Ok(len)
}

/// Payload length declared by a complete header
pub fn declared_payload_len(header: &[u8]) -> Result<usize, ProtocolError> {
    if header.len() < 2 {
        return Err(ProtocolError::TruncatedFrame);
    }
    match header[1] & LEN_BITS {
        LEN_16 => {
            if header.len() < 4 {
                return Err(ProtocolError::TruncatedFrame);
            }
            Ok(u16::from_be_bytes([header[2], header[3]]) as usize)
        }
        LEN_64 => Err(ProtocolError::UnsupportedFrameSize),
        short => Ok(short as usize),
    }
}

/// Decode one frame from the start of `buf`
///
/// Returns the frame and the number of bytes it occupied.
pub fn decode(buf: &[u8]) -> Result<(Frame, usize), ProtocolError> {
    if buf.len() < 2 {
        return Err(ProtocolError::TruncatedFrame);
    }

    let header_len = header_len([buf[0], buf[1]])?;
    if buf.len() < header_len {
        return Err(ProtocolError::TruncatedFrame);
    }

    if buf[0] & RSV_BITS != 0 {
        return Err(ProtocolError::ReservedBits);
    }

    let fin = buf[0] & FIN_BIT != 0;
    let opcode = Opcode::from_u8(buf[0] & OPCODE_BITS)?;
    let payload_len = declared_payload_len(&buf[..header_len])?;

    let mask_key = if buf[1] & MASK_BIT != 0 {
        let k = header_len - 4;
        Some([buf[k], buf[k + 1], buf[k + 2], buf[k + 3]])
    } else {
        None
    };

    let total = header_len + payload_len;
    if buf.len() < total {
        return Err(ProtocolError::TruncatedFrame);
    }

    let mut payload = buf[header_len..total].to_vec();
    if let Some(key) = mask_key {
        apply_mask(&mut payload, key);
    }

    Ok((
        Frame {
            fin,
            opcode,
            mask_key,
            payload,
        },
        total,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    #[test]
    fn test_encode_unmasked_hello() {
        let bytes = Frame::text("Hello").encode().unwrap();
        assert_eq!(bytes, vec![0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    }

    #[test]
    fn test_decode_masked_hello() {
        // RFC 6455 section 5.7
        let wire = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let (frame, used) = decode(&wire).unwrap();
        assert_eq!(used, wire.len());
        assert!(frame.fin);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.mask_key, Some(KEY));
        assert_eq!(frame.payload, b"Hello");
    }

    #[test]
    fn test_encode_masked_matches_rfc() {
        let bytes = Frame::text("Hello").masked_with(KEY).encode().unwrap();
        assert_eq!(
            bytes,
            vec![0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_round_trip_across_length_tiers() {
        for len in [0usize, 1, 125, 126, 127, 300, MAX_PAYLOAD_LEN] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            for frame in [
                Frame::new(Opcode::Binary, payload.clone()),
                Frame::new(Opcode::Binary, payload.clone()).masked_with(KEY),
            ] {
                let bytes = frame.encode().unwrap();
                assert_eq!(Frame::decode(&bytes).unwrap(), frame, "len {len}");
            }
        }
    }

    #[test]
    fn test_extended_length_header() {
        let bytes = Frame::new(Opcode::Binary, vec![0u8; 256]).encode().unwrap();
        assert_eq!(&bytes[..4], &[0x82, 0x7e, 0x01, 0x00]);
        assert_eq!(bytes.len(), 4 + 256);
    }

    #[test]
    fn test_mask_is_its_own_inverse() {
        let plain = b"the quick brown fox".to_vec();
        let mut data = plain.clone();
        apply_mask(&mut data, KEY);
        assert_ne!(data, plain);
        apply_mask(&mut data, KEY);
        assert_eq!(data, plain);
    }

    #[test]
    fn test_64bit_length_is_unsupported() {
        // Only the two header bytes: must fail immediately, not wait for more
        assert_eq!(decode(&[0x82, 0x7f]), Err(ProtocolError::UnsupportedFrameSize));

        let mut wire = vec![0x82, 0xff];
        wire.extend_from_slice(&70_000u64.to_be_bytes());
        wire.extend_from_slice(&KEY);
        assert_eq!(decode(&wire), Err(ProtocolError::UnsupportedFrameSize));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let frame = Frame::new(Opcode::Binary, vec![0u8; MAX_PAYLOAD_LEN + 1]);
        assert_eq!(frame.encode(), Err(ProtocolError::UnsupportedFrameSize));
    }

    #[test]
    fn test_truncated_input() {
        assert_eq!(decode(&[]), Err(ProtocolError::TruncatedFrame));
        assert_eq!(decode(&[0x81]), Err(ProtocolError::TruncatedFrame));
        // declares 5 bytes, carries 3
        assert_eq!(
            decode(&[0x81, 0x05, b'a', b'b', b'c']),
            Err(ProtocolError::TruncatedFrame)
        );
        // 16-bit tier with the extension cut short
        assert_eq!(decode(&[0x81, 0x7e, 0x01]), Err(ProtocolError::TruncatedFrame));
        // mask key cut short
        assert_eq!(decode(&[0x81, 0x85, 0x37]), Err(ProtocolError::TruncatedFrame));
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let mut wire = Frame::text("one").encode().unwrap();
        let first_len = wire.len();
        wire.extend(Frame::text("two").encode().unwrap());

        let (first, used) = decode(&wire).unwrap();
        assert_eq!(first.payload, b"one");
        assert_eq!(used, first_len);
        assert_eq!(Frame::decode(&wire[used..]).unwrap().payload, b"two");
    }

    #[test]
    fn test_reserved_bits_and_bad_opcode() {
        assert_eq!(decode(&[0xc1, 0x00]), Err(ProtocolError::ReservedBits));
        assert_eq!(decode(&[0x83, 0x00]), Err(ProtocolError::InvalidOpcode(0x3)));
    }

    #[test]
    fn test_validate_mask_direction() {
        let masked = Frame::text("hi").masked_with(KEY);
        let plain = Frame::text("hi");

        assert!(masked.validate(Role::Server).is_ok());
        assert_eq!(
            plain.validate(Role::Server),
            Err(ProtocolError::UnmaskedClientFrame)
        );
        assert!(plain.validate(Role::Client).is_ok());
        assert_eq!(
            masked.validate(Role::Client),
            Err(ProtocolError::MaskedServerFrame)
        );
    }

    #[test]
    fn test_validate_rejects_fragments_and_big_control_frames() {
        let mut fragment = Frame::text("part");
        fragment.fin = false;
        assert_eq!(fragment.validate(Role::Client), Err(ProtocolError::Fragmented));

        let ping = Frame::ping(vec![0u8; 126]);
        assert_eq!(
            ping.validate(Role::Client),
            Err(ProtocolError::ControlFrameTooLarge(126))
        );
    }

    #[test]
    fn test_close_frame_code() {
        let frame = Frame::close(1000, "bye");
        assert_eq!(frame.close_code(), Some(1000));
        assert_eq!(&frame.payload[2..], b"bye");

        let empty = Frame::new(Opcode::Close, Vec::new());
        assert_eq!(empty.close_code(), None);
    }
}
