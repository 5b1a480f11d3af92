//! Established WebSocket connection
//!
//! `SessionReader` and `SessionWriter` own the two halves of the socket.
//! The server splits them across tasks so that one writer serializes every
//! outbound frame; the client and the echo mode use the combined
//! `Session`, which also answers Ping and Close on its own.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

use crate::codec::FrameCodec;
use crate::error::{AppError, ProtocolError};
use crate::frame::{Frame, Opcode};
use crate::types::{close_code, Role, SessionId};

/// Session over a TCP socket whose read half is buffered
pub type TcpSession = Session<BufReader<OwnedReadHalf>, OwnedWriteHalf>;

/// What [`Session::recv`] hands back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A complete text message
    Text(String),
    /// The peer closed the connection, with its status code if it sent one
    Closed(Option<u16>),
}

/// Decode a text frame payload
pub fn text_payload(frame: Frame) -> Result<String, ProtocolError> {
    String::from_utf8(frame.payload).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Read side: turns the byte stream into validated frames
#[derive(Debug)]
pub struct SessionReader<R> {
    frames: FramedRead<R, FrameCodec>,
}

impl<R: AsyncRead + Unpin> SessionReader<R> {
    pub fn new(role: Role, reader: R) -> Self {
        Self {
            frames: FramedRead::new(reader, FrameCodec::new(role)),
        }
    }

    /// Read exactly one frame
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames and
    /// `TruncatedFrame` when it ends inside one.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, AppError> {
        self.frames.next().await.transpose()
    }
}

/// Write side: each frame is encoded and flushed before `send_frame` returns
#[derive(Debug)]
pub struct SessionWriter<W> {
    frames: FramedWrite<W, FrameCodec>,
}

impl<W: AsyncWrite + Unpin> SessionWriter<W> {
    pub fn new(role: Role, writer: W) -> Self {
        Self {
            frames: FramedWrite::new(writer, FrameCodec::new(role)),
        }
    }

    /// Encode and write one frame, masking it if we are the client
    pub async fn send_frame(&mut self, frame: Frame) -> Result<(), AppError> {
        self.frames.send(frame).await
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), AppError> {
        self.send_frame(Frame::text(text)).await
    }

    pub async fn send_close(&mut self, code: u16) -> Result<(), AppError> {
        self.send_frame(Frame::close(code, "")).await
    }

    /// Flush and shut down the write direction of the socket
    pub async fn shutdown(&mut self) -> Result<(), AppError> {
        self.frames.close().await
    }
}

/// A live connection after the handshake
#[derive(Debug)]
pub struct Session<R, W> {
    id: SessionId,
    reader: SessionReader<R>,
    writer: SessionWriter<W>,
    close_sent: bool,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(id: SessionId, role: Role, reader: R, writer: W) -> Self {
        Self {
            id,
            reader: SessionReader::new(role, reader),
            writer: SessionWriter::new(role, writer),
            close_sent: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Send one text message
    pub async fn send(&mut self, text: &str) -> Result<(), AppError> {
        self.writer.send_text(text).await
    }

    /// Wait for the next text message or the end of the connection
    ///
    /// Pings are answered, Pongs and Binary frames skipped. A Close frame
    /// is answered with a Close carrying the same code, or 1000 when the
    /// peer's code is one that may not be sent. On error the
    /// socket is shut down (after a 1002 Close for protocol violations).
    pub async fn recv(&mut self) -> Result<Received, AppError> {
        match self.recv_inner().await {
            Ok(received) => Ok(received),
            Err(err) => {
                if matches!(err, AppError::Protocol(_)) && !self.close_sent {
                    self.close_sent = true;
                    let _ = self.writer.send_close(close_code::PROTOCOL_ERROR).await;
                }
                let _ = self.writer.shutdown().await;
                Err(err)
            }
        }
    }

    async fn recv_inner(&mut self) -> Result<Received, AppError> {
        loop {
            let Some(frame) = self.reader.next_frame().await? else {
                debug!("Session {} reached end of stream", self.id);
                return Ok(Received::Closed(None));
            };

            match frame.opcode {
                Opcode::Text => return Ok(Received::Text(text_payload(frame)?)),
                Opcode::Ping => self.writer.send_frame(Frame::pong(frame.payload)).await?,
                Opcode::Close => {
                    let code = frame.close_code();
                    if !self.close_sent {
                        self.close_sent = true;
                        // the peer may already be gone
                        let _ = self.writer.send_close(close_code::reply_to(code)).await;
                    }
                    let _ = self.writer.shutdown().await;
                    return Ok(Received::Closed(code));
                }
                other => debug!("Session {} ignoring {:?} frame", self.id, other),
            }
        }
    }

    /// Start the close handshake and release the write side
    ///
    /// Consumes the session; the read side is dropped with it.
    pub async fn close(mut self) -> Result<(), AppError> {
        if !self.close_sent {
            self.close_sent = true;
            self.writer.send_close(close_code::NORMAL).await?;
        }
        self.writer.shutdown().await
    }

    /// Separate the halves for independent reader and writer tasks
    pub fn into_split(self) -> (SessionReader<R>, SessionWriter<W>) {
        (self.reader, self.writer)
    }
}
