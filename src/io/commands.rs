//! Command TCP listener
//!
//! Line protocol, one command per line:
//! - `RESET`  -> `OK RESET previous=<n>` or `ERR RESET_TOO_SOON remaining=<secs>`
//! - `STATUS` -> `OK STATUS count=<n> state=<zone> time=<rfc3339> synced=<bool>`
//!
//! Commands are forwarded to the engine loop, which owns all state and replies
//! over a oneshot channel. A line longer than `MAX_LINE_BYTES` gets
//! `ERR LINE_TOO_LONG` and the connection is closed.

use crate::domain::types::ZoneState;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Longest accepted command line, newline excluded
pub const MAX_LINE_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reset,
    Status,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_uppercase().as_str() {
            "RESET" => Some(Command::Reset),
            "STATUS" => Some(Command::Status),
            _ => None,
        }
    }
}

/// Engine state as seen by a STATUS request
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub visitor_count: u32,
    pub zone_state: ZoneState,
    pub local_time: String,
    pub synced: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    ResetAccepted { previous: u32 },
    ResetRejected { remaining_secs: u64 },
    Failed(String),
    Status(StatusSnapshot),
}

impl CommandReply {
    pub fn to_line(&self) -> String {
        match self {
            CommandReply::ResetAccepted { previous } => format!("OK RESET previous={previous}"),
            CommandReply::ResetRejected { remaining_secs } => {
                format!("ERR RESET_TOO_SOON remaining={remaining_secs}")
            }
            CommandReply::Failed(reason) => format!("ERR {reason}"),
            CommandReply::Status(s) => format!(
                "OK STATUS count={} state={} time={} synced={}",
                s.visitor_count,
                s.zone_state.as_str(),
                s.local_time,
                s.synced
            ),
        }
    }
}

/// A command plus the channel the engine answers on
#[derive(Debug)]
pub struct CommandRequest {
    pub command: Command,
    pub reply: oneshot::Sender<CommandReply>,
}

pub type CommandSender = mpsc::Sender<CommandRequest>;

/// Bind the listener and serve until shutdown. Port 0 disables it.
pub async fn start_command_listener(
    port: u16,
    cmd_tx: CommandSender,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if port == 0 {
        info!("command_listener_disabled");
        return Ok(());
    }

    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(port = %port, "command_listener_started");
    serve_commands(listener, cmd_tx, shutdown).await;
    Ok(())
}

pub async fn serve_commands(
    listener: TcpListener,
    cmd_tx: CommandSender,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("command_listener_shutdown");
                    return;
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let tx = cmd_tx.clone();
                        tokio::spawn(async move {
                            handle_connection(socket, addr, tx).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "command_listener_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, addr: SocketAddr, cmd_tx: CommandSender) {
    let peer = addr.to_string();
    debug!(peer = %peer, "command_connection_accepted");

    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::with_capacity(MAX_LINE_BYTES + 1);

    loop {
        buf.clear();
        // One byte past the cap is enough to tell an overlong line
        let limit = (MAX_LINE_BYTES + 1) as u64;
        match (&mut reader).take(limit).read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(peer = %peer, error = %e, "command_read_failed");
                break;
            }
        }

        if !buf.ends_with(b"\n") && buf.len() > MAX_LINE_BYTES {
            warn!(peer = %peer, "command_line_too_long");
            let _ = write_half.write_all(b"ERR LINE_TOO_LONG\n").await;
            break;
        }

        let text = String::from_utf8_lossy(&buf);
        let line = text.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match Command::parse(line) {
            Some(command) => {
                info!(peer = %peer, command = ?command, "command_received");
                dispatch(command, &cmd_tx).await
            }
            None => {
                debug!(peer = %peer, line = %line, "command_unknown");
                CommandReply::Failed("UNKNOWN_COMMAND".to_string())
            }
        };

        let mut out = reply.to_line();
        out.push('\n');
        if let Err(e) = write_half.write_all(out.as_bytes()).await {
            warn!(peer = %peer, error = %e, "command_reply_failed");
            break;
        }
    }

    debug!(peer = %peer, "command_connection_closed");
}

async fn dispatch(command: Command, cmd_tx: &CommandSender) -> CommandReply {
    let (reply_tx, reply_rx) = oneshot::channel();
    // Never block the connection on a busy engine
    match cmd_tx.try_send(CommandRequest { command, reply: reply_tx }) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(command = ?command, "command_dropped: channel full");
            return CommandReply::Failed("BUSY".to_string());
        }
        Err(TrySendError::Closed(_)) => {
            return CommandReply::Failed("SHUTTING_DOWN".to_string());
        }
    }

    reply_rx
        .await
        .unwrap_or_else(|_| CommandReply::Failed("NO_REPLY".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("RESET"), Some(Command::Reset));
        assert_eq!(Command::parse("  status \r"), Some(Command::Status));
        assert_eq!(Command::parse("RESET NOW"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_reply_lines() {
        assert_eq!(CommandReply::ResetAccepted { previous: 12 }.to_line(), "OK RESET previous=12");
        assert_eq!(
            CommandReply::ResetRejected { remaining_secs: 600 }.to_line(),
            "ERR RESET_TOO_SOON remaining=600"
        );
        let status = CommandReply::Status(StatusSnapshot {
            visitor_count: 4,
            zone_state: ZoneState::Idle,
            local_time: "2026-10-18T15:00:00+03:00".to_string(),
            synced: true,
        });
        assert_eq!(
            status.to_line(),
            "OK STATUS count=4 state=idle time=2026-10-18T15:00:00+03:00 synced=true"
        );
    }

    #[tokio::test]
    async fn test_round_trip_through_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<CommandRequest>(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(serve_commands(listener, cmd_tx, shutdown_rx));

        // Stand-in engine: accept one reset, reject the next
        tokio::spawn(async move {
            let mut resets = 0u32;
            while let Some(req) = cmd_rx.recv().await {
                let reply = match req.command {
                    Command::Reset if resets == 0 => {
                        resets += 1;
                        CommandReply::ResetAccepted { previous: 7 }
                    }
                    Command::Reset => CommandReply::ResetRejected { remaining_secs: 43_200 },
                    Command::Status => CommandReply::Failed("UNSUPPORTED".to_string()),
                };
                let _ = req.reply.send(reply);
            }
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half.write_all(b"RESET\nRESET\nHELLO\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "OK RESET previous=7");
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "ERR RESET_TOO_SOON remaining=43200"
        );
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "ERR UNKNOWN_COMMAND");

        shutdown_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_overlong_line_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (cmd_tx, _cmd_rx) = mpsc::channel::<CommandRequest>(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(serve_commands(listener, cmd_tx, shutdown_rx));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        // One byte past the cap and still no newline
        write_half.write_all(&[b'A'; MAX_LINE_BYTES + 1]).await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "ERR LINE_TOO_LONG");
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_closed_engine_reports_shutdown() {
        let (cmd_tx, cmd_rx) = mpsc::channel::<CommandRequest>(1);
        drop(cmd_rx);
        assert_eq!(
            dispatch(Command::Status, &cmd_tx).await,
            CommandReply::Failed("SHUTTING_DOWN".to_string())
        );
    }
}
