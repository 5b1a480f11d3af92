//! WebSocket connection handler
//!
//! Handles individual connections: upgrade handshake, then either the echo
//! loop or a chat session. A chat session is split into a reader loop
//! (frames -> router) and a writer task (outbound queue -> socket); the
//! writer is the only code that writes to the socket after the handshake.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::client::{Client, Outbound};
use crate::config::{ChatMode, ServerConfig};
use crate::envelope::{self, ChatMessage};
use crate::error::AppError;
use crate::frame::{Frame, Opcode};
use crate::handshake;
use crate::registry::Registry;
use crate::session::{text_payload, Received, Session, SessionReader, SessionWriter};
use crate::types::{close_code, Role, SessionId};

/// How long a finished session's writer may keep draining its queue
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Everything a connection task needs from the server
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub registry: Arc<Registry>,
    /// Feeds the broadcast router
    pub publisher: mpsc::Sender<ChatMessage>,
    pub mode: ChatMode,
    pub read_timeout: Duration,
    pub handshake_timeout: Duration,
    pub outbound_capacity: usize,
}

impl ConnectionContext {
    pub fn new(
        config: &ServerConfig,
        registry: Arc<Registry>,
        publisher: mpsc::Sender<ChatMessage>,
    ) -> Self {
        Self {
            registry,
            publisher,
            mode: config.mode,
            read_timeout: config.read_timeout(),
            handshake_timeout: config.handshake_timeout(),
            outbound_capacity: config.outbound_capacity,
        }
    }
}

/// Handle a new TCP connection
pub async fn handle_connection(
    stream: TcpStream,
    ctx: Arc<ConnectionContext>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    let (read_half, write_half) = stream.into_split();
    serve(BufReader::new(read_half), write_half, &peer_addr, &ctx).await
}

/// Run the handshake and the session over any byte stream
pub async fn serve<R, W>(
    mut reader: R,
    mut writer: W,
    peer_addr: &str,
    ctx: &ConnectionContext,
) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let head = timeout(
        ctx.handshake_timeout,
        handshake::accept(&mut reader, &mut writer),
    )
    .await
    .map_err(|_| AppError::Timeout("handshake"))??;

    let id = SessionId::new();
    info!("Session {} opened from {} ({})", id, peer_addr, head.path);

    match ctx.mode {
        ChatMode::Echo => run_echo(Session::new(id, Role::Server, reader, writer), ctx).await,
        ChatMode::Relaxed | ChatMode::Advanced => {
            let reader = SessionReader::new(Role::Server, reader);
            let writer = SessionWriter::new(Role::Server, writer);
            run_chat(id, reader, writer, ctx).await
        }
    }
}

async fn next_frame_within<R>(
    reader: &mut SessionReader<R>,
    limit: Duration,
) -> Result<Option<Frame>, AppError>
where
    R: AsyncRead + Unpin,
{
    timeout(limit, reader.next_frame())
        .await
        .map_err(|_| AppError::Timeout("next frame"))?
}

/// Bare echo: every text message goes straight back
async fn run_echo<R, W>(
    mut session: Session<R, W>,
    ctx: &ConnectionContext,
) -> Result<(), AppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let received = timeout(ctx.read_timeout, session.recv())
            .await
            .map_err(|_| AppError::Timeout("next frame"))??;

        match received {
            Received::Text(text) => {
                debug!("Echo {} bytes to {}", text.len(), session.id());
                session.send(&text).await?;
            }
            Received::Closed(code) => {
                info!("Session {} closed ({:?})", session.id(), code);
                return Ok(());
            }
        }
    }
}

/// What a finished writer task hands back
///
/// `Some(writer)` when the queue closed before a Close frame went out, so
/// the caller still owns an open write side.
type WriteTask<W> = JoinHandle<Result<Option<SessionWriter<W>>, AppError>>;

/// How the chat session's main select ended
enum Ended<W> {
    Reader(Result<Option<u16>, AppError>),
    Evicted,
    Writer(Result<Option<SessionWriter<W>>, AppError>),
}

async fn run_chat<R, W>(
    id: SessionId,
    mut reader: SessionReader<R>,
    mut writer: SessionWriter<W>,
    ctx: &ConnectionContext,
) -> Result<(), AppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let user = match ctx.mode {
        ChatMode::Advanced => match read_join(&mut reader, &mut writer, ctx.read_timeout).await {
            Ok(Some(user)) => Some(user),
            Ok(None) => {
                debug!("Session {} closed before joining", id);
                return Ok(());
            }
            Err(e) => {
                warn!("Session {} rejected: {}", id, e);
                let code = match e {
                    AppError::Protocol(_) => close_code::PROTOCOL_ERROR,
                    _ => close_code::POLICY_VIOLATION,
                };
                let _ = writer.send_close(code).await;
                let _ = writer.shutdown().await;
                return Err(e);
            }
        },
        _ => None,
    };

    let (tx, rx) = mpsc::channel(ctx.outbound_capacity);
    let client = Client::new(id, user, tx);
    let members = ctx.registry.register(client.clone());
    info!("{} joined the chat ({} connected)", client.display_name(), members);

    let mut write_task: WriteTask<W> = tokio::spawn(write_loop(id, writer, rx));

    let ended = tokio::select! {
        res = read_loop(&mut reader, &client, ctx) => Ended::Reader(res),
        _ = client.evicted() => Ended::Evicted,
        res = &mut write_task => Ended::Writer(flatten(res)),
    };

    let reply = match &ended {
        Ended::Reader(Ok(code)) => *code,
        Ended::Reader(Err(AppError::Protocol(_))) => Some(close_code::PROTOCOL_ERROR),
        Ended::Reader(Err(AppError::Timeout(_))) => Some(close_code::NORMAL),
        _ => None,
    };
    // a full queue cannot take the Close; it is written once the queue drains
    let mut pending_close = None;
    if let Some(code) = reply {
        if let Err(e) = client.try_send(Outbound::Close(code)) {
            debug!("Close for {} not queued ({}), sending after drain", id, e);
            pending_close = Some(code);
        }
    }

    // the registry entry carries the name learned from the first message
    let name = match ctx.registry.unregister(id) {
        Some(entry) => entry.display_name().to_string(),
        None => client.display_name().to_string(),
    };
    info!("{} left the chat", name);
    // last sender gone: the writer drains what is queued and stops
    drop(client);

    let result = match ended {
        Ended::Writer(res) => res.map(|_| ()),
        Ended::Evicted => {
            finish_writer(id, write_task, None).await;
            Ok(())
        }
        Ended::Reader(res) => {
            finish_writer(id, write_task, pending_close).await;
            res.map(|_| ())
        }
    };

    debug!("Session {} finished", id);
    result
}

/// Give the writer [`CLOSE_GRACE`] to drain, then release the write side
async fn finish_writer<W>(
    id: SessionId,
    mut write_task: WriteTask<W>,
    pending_close: Option<u16>,
) where
    W: AsyncWrite + Unpin,
{
    match timeout(CLOSE_GRACE, &mut write_task).await {
        Ok(res) => match flatten(res) {
            Ok(Some(mut writer)) => {
                if let Some(code) = pending_close {
                    let _ = writer.send_close(code).await;
                }
                let _ = writer.shutdown().await;
            }
            Ok(None) => {}
            Err(e) => debug!("Writer for {} ended with error: {}", id, e),
        },
        Err(_) => {
            debug!("Writer for {} did not drain in time, aborting", id);
            write_task.abort();
        }
    }
}

fn flatten<T>(res: Result<Result<T, AppError>, tokio::task::JoinError>) -> Result<T, AppError> {
    res.unwrap_or_else(|e| Err(AppError::Io(std::io::Error::other(e))))
}

/// Wait for the join message of an advanced-mode session
///
/// `Ok(None)` means the peer left before declaring a name.
async fn read_join<R, W>(
    reader: &mut SessionReader<R>,
    writer: &mut SessionWriter<W>,
    limit: Duration,
) -> Result<Option<String>, AppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let Some(frame) = next_frame_within(reader, limit).await? else {
            return Ok(None);
        };

        match frame.opcode {
            Opcode::Text => {
                let payload = text_payload(frame)?;
                return Ok(Some(envelope::parse_join(&payload)?));
            }
            Opcode::Ping => writer.send_frame(Frame::pong(frame.payload)).await?,
            Opcode::Close => {
                let code = close_code::reply_to(frame.close_code());
                let _ = writer.send_close(code).await;
                return Ok(None);
            }
            _ => {}
        }
    }
}

/// Frames -> router
///
/// Returns the code to answer a Close frame with, or `None` when the
/// stream simply ended. A relaxed session is named after the `user` of its
/// first valid envelope.
async fn read_loop<R>(
    reader: &mut SessionReader<R>,
    client: &Client,
    ctx: &ConnectionContext,
) -> Result<Option<u16>, AppError>
where
    R: AsyncRead + Unpin,
{
    let mut named = client.user.is_some();

    loop {
        let Some(frame) = next_frame_within(reader, ctx.read_timeout).await? else {
            return Ok(None);
        };

        match frame.opcode {
            Opcode::Text => {
                let payload = text_payload(frame)?;
                let parsed = match &client.user {
                    Some(user) => envelope::parse_for(user, &payload),
                    None => envelope::parse(&payload),
                };

                match parsed {
                    Ok(msg) => {
                        if !named {
                            named = true;
                            if ctx.registry.set_user(client.id, &msg.user) {
                                debug!("Session {} speaks as {}", client.id, msg.user);
                            }
                        }
                        ctx.publisher
                            .send(msg)
                            .await
                            .map_err(|_| AppError::ChannelSend)?;
                    }
                    Err(e) => warn!("Dropping frame from {}: {}", client.id, e),
                }
            }
            Opcode::Ping => {
                let _ = client.try_send(Outbound::Pong(frame.payload));
            }
            Opcode::Close => {
                debug!("Client {} sent close frame", client.id);
                return Ok(Some(close_code::reply_to(frame.close_code())));
            }
            other => debug!("Ignoring {:?} frame from {}", other, client.id),
        }
    }
}

/// Outbound queue -> socket
///
/// Stops after writing a Close, or hands the writer back once every
/// sender is gone and the queue is empty.
async fn write_loop<W>(
    id: SessionId,
    mut writer: SessionWriter<W>,
    mut rx: mpsc::Receiver<Outbound>,
) -> Result<Option<SessionWriter<W>>, AppError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(out) = rx.recv().await {
        match out {
            Outbound::Text(payload) => writer.send_text(&payload).await?,
            Outbound::Pong(payload) => writer.send_frame(Frame::pong(payload)).await?,
            Outbound::Close(code) => {
                let _ = writer.send_close(code).await;
                let _ = writer.shutdown().await;
                debug!("Write task ended for {}", id);
                return Ok(None);
            }
        }
    }

    debug!("Write task for {} drained its queue", id);
    Ok(Some(writer))
}
