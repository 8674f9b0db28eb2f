//! Control Session (spec §4.2): the newline-delimited TCP stream each
//! participant holds for the whole call. Owns the `CONNECT` handshake,
//! command dispatch, and the per-stream writer task that drains a
//! participant's notice channel in issue order.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::audio::AudioMixer;
use crate::chat::{ChatEntry, ChatHistory};
use crate::connections::ConnectionRegistry;
use crate::error::HubError;
use crate::protocol::{encode_roster, timestamp, to_hex, RosterEntry};
use crate::registry::{ParticipantId, Registry};
use crate::screen::{LeaseOutcome, ScreenCoordinator};

/// Shared references every control session needs; cheap to clone (all
/// interior `Arc`s), passed down from the Hub Supervisor.
#[derive(Clone)]
pub struct ControlContext {
    pub registry: Arc<Registry>,
    pub screen: Arc<ScreenCoordinator>,
    pub audio: Arc<AudioMixer>,
    pub chat: Arc<ChatHistory>,
}

/// Runs the control-session TCP acceptor until `cancel` fires.
pub async fn run(
    listener: TcpListener,
    ctx: ControlContext,
    connections: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("control acceptor shutting down");
                return;
            }
            accepted = listener.accept() => {
                let Ok((stream, addr)) = accepted else { continue };
                let ctx = ctx.clone();
                let guard = connections.register();
                tokio::spawn(async move {
                    let session_cancel = guard.cancel_token().clone();
                    if let Err(err) = handle_session(stream, ctx, session_cancel).await {
                        debug!("control session from {addr} ended: {err}");
                    }
                });
            }
        }
    }
}

async fn handle_session(
    stream: TcpStream,
    ctx: ControlContext,
    cancel: CancellationToken,
) -> crate::error::HubResult<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut handshake = String::new();
    tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        n = reader.read_line(&mut handshake) => {
            if n.map_err(HubError::StreamIo)? == 0 {
                return Ok(());
            }
        }
    }
    let handshake = handshake.trim_end_matches(['\r', '\n']);
    let Some(username) = handshake.strip_prefix("CONNECT:") else {
        return Err(HubError::Protocol(format!(
            "expected CONNECT, got: {handshake}"
        )));
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let participant = match ctx.registry.register(username.to_string(), tx) {
        Ok(p) => p,
        Err(err) => {
            let _ = write_half.write_all(format!("ERROR:{err}\n").as_bytes()).await;
            return Err(err);
        }
    };
    let pid = participant.id;
    info!("participant {pid} ({username}) connected");

    participant.notify(format!("ID:{pid}"));
    broadcast_roster(&ctx.registry);

    let writer_cancel = cancel.clone();
    let writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                line = rx.recv() => {
                    match line {
                        Some(line) => {
                            if write_half.write_all(line.as_bytes()).await.is_err() {
                                break;
                            }
                            if write_half.write_all(b"\n").await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    loop {
        let mut line = String::new();
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            n = reader.read_line(&mut line) => n,
        };
        match read {
            Ok(0) => {
                debug!("{}", HubError::PeerGone(format!("participant {pid} closed control stream")));
                break;
            }
            Err(err) => {
                debug!("{}", HubError::PeerGone(format!("participant {pid} stream error: {err}")));
                break;
            }
            Ok(_) => {}
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            continue;
        }
        dispatch(line, pid, &participant.username, &ctx);
    }

    writer_task.abort();
    ctx.registry.deregister(pid);
    ctx.screen.release(pid);
    ctx.audio.remove_participant(pid);
    broadcast_roster(&ctx.registry);
    info!("participant {pid} ({username}) disconnected");
    Ok(())
}

fn dispatch(line: &str, pid: ParticipantId, username: &str, ctx: &ControlContext) {
    if line == "PING" {
        if let Some(participant) = ctx.registry.lookup(pid) {
            participant.notify("PONG");
        }
    } else if let Some(text) = line.strip_prefix("CHAT:") {
        handle_chat(text, pid, username, ctx);
    } else if let Some(rest) = line.strip_prefix("PRIVATE_CHAT:") {
        handle_private_chat(rest, pid, username, ctx);
    } else if line == "REQUEST_PRESENTER" {
        if ctx.screen.request(pid) == LeaseOutcome::Denied {
            debug!("{}", HubError::ResourceConflict);
        }
    } else if line == "STOP_PRESENTING" {
        ctx.screen.release(pid);
    } else {
        warn!("unrecognized control command from {pid}: {line}");
    }
}

fn handle_chat(text: &str, pid: ParticipantId, username: &str, ctx: &ControlContext) {
    let ts = timestamp();
    ctx.chat.append(ChatEntry {
        sender_id: pid,
        sender_username: username.to_string(),
        text: text.to_string(),
        timestamp: ts.clone(),
    });
    let line = format!("CHAT:{pid}:{username}:{ts}:{text}");
    ctx.registry.broadcast(&line);
}

fn handle_private_chat(rest: &str, pid: ParticipantId, username: &str, ctx: &ControlContext) {
    // Grammar: "<id>(,<id>)*:<text>" — split on the first colon only, since
    // the text may itself contain colons.
    let Some((ids_part, text)) = rest.split_once(':') else {
        warn!("malformed PRIVATE_CHAT from {pid}: {rest}");
        return;
    };
    let recipients: Vec<ParticipantId> = ids_part
        .split(',')
        .filter_map(|s| s.parse::<ParticipantId>().ok())
        .collect();

    let ts = timestamp();
    ctx.chat.append(ChatEntry {
        sender_id: pid,
        sender_username: username.to_string(),
        text: text.to_string(),
        timestamp: ts.clone(),
    });

    let line = format!("PRIVATE_CHAT:{pid}|{username}|{ts}|{ids_part}|{text}");
    if let Some(sender) = ctx.registry.lookup(pid) {
        sender.notify(line.clone());
    }
    for recipient_id in recipients {
        if recipient_id == pid {
            continue;
        }
        if let Some(recipient) = ctx.registry.lookup(recipient_id) {
            recipient.notify(line.clone());
        }
    }
}

fn broadcast_roster(registry: &Registry) {
    let entries: Vec<RosterEntry> = registry
        .snapshot()
        .iter()
        .map(|p| RosterEntry {
            id: p.id,
            username: p.username.clone(),
        })
        .collect();
    let body = to_hex(&encode_roster(&entries));
    registry.broadcast(&format!("USERS:{body}"));
}
