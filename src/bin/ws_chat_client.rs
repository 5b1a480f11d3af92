//! WebSocket Chat Client - Entry Point
//!
//! Dials the server with the hand-rolled handshake, declares a username
//! when the server runs in advanced mode, prints every broadcast and sends
//! each stdin line as a chat message.
//! Ctrl+C performs the close handshake.

use std::io::Write;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use ws_chat_server::envelope::{self, ChatMessage};
use ws_chat_server::frame::Opcode;
use ws_chat_server::handshake::dial;
use ws_chat_server::session::text_payload;
use ws_chat_server::types::close_code;
use ws_chat_server::{ChatMode, ClientConfig};

fn render(payload: &str) -> String {
    match ChatMessage::from_payload(payload) {
        Ok(msg) => {
            let local = msg.time.with_timezone(&chrono::Local);
            format!("[{}] {}: {}", local.format("%H:%M"), msg.user, msg.text)
        }
        Err(_) => format!("[Server]: {payload}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::parse();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let user = match config.user {
        Some(user) => user,
        None => {
            print!("Username: ");
            std::io::stdout().flush()?;
            stdin.next_line().await?.unwrap_or_default()
        }
    };
    let user = user.trim().to_string();
    if user.is_empty() {
        eprintln!("Username must not be empty.");
        return Ok(());
    }

    println!("Connecting to {}...", config.url);
    let session = dial(&config.url).await?;
    let (mut reader, mut writer) = session.into_split();

    if config.mode == ChatMode::Advanced {
        // declare the username first
        writer.send_text(&envelope::request(&user, "")?).await?;
    }
    println!("Connected. Type messages and press Enter to send, Ctrl+C to quit.");

    let mut read_task = tokio::spawn(async move {
        loop {
            match reader.next_frame().await {
                Ok(Some(frame)) => match frame.opcode {
                    Opcode::Text => match text_payload(frame) {
                        Ok(payload) => println!("{}", render(&payload)),
                        Err(e) => error!("Bad text frame: {}", e),
                    },
                    Opcode::Close => {
                        debug!("Server closed with {:?}", frame.close_code());
                        break;
                    }
                    _ => {}
                },
                Ok(None) => break,
                Err(e) => {
                    error!("Read error: {}", e);
                    break;
                }
            }
        }
        println!("[Disconnected from server]");
    });

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                if let Err(e) = writer.send_text(&envelope::request(&user, text)?).await {
                    eprintln!("Send error: {e}");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n[Leaving the chat]");
                break;
            }
            _ = &mut read_task => return Ok(()),
        }
    }

    let _ = writer.send_close(close_code::NORMAL).await;
    let _ = writer.shutdown().await;
    // give the server a moment to answer the close
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), read_task).await;
    Ok(())
}
