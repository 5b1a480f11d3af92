//! `tokio_util` codec for WebSocket frames
//!
//! Wraps the pure functions in [`crate::frame`] so the socket halves can be
//! driven by `FramedRead` / `FramedWrite`. Decoding waits (`Ok(None)`) until
//! a whole frame is buffered; only the 64-bit length tier is refused from
//! the first two bytes alone. Every decoded frame is checked against the
//! local role, and the encoder applies a fresh mask key when the local role
//! is the client.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{AppError, ProtocolError};
use crate::frame::{self, Frame};
use crate::types::Role;

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    role: Role,
}

impl FrameCodec {
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, AppError> {
        if src.len() < 2 {
            return Ok(None);
        }

        let header_len = frame::header_len([src[0], src[1]])?;
        if src.len() < header_len {
            return Ok(None);
        }

        let total = header_len + frame::declared_payload_len(&src[..header_len])?;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let (frame, used) = frame::decode(&src[..total])?;
        src.advance(used);
        frame.validate(self.role)?;
        Ok(Some(frame))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, AppError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::TruncatedFrame.into()),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, mut frame: Frame, dst: &mut BytesMut) -> Result<(), AppError> {
        frame.mask_key = if self.role.masks_outbound() {
            Some(rand::random())
        } else {
            None
        };
        frame.encode_into(dst)?;
        Ok(())
    }
}
