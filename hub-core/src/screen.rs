//! Screen Coordinator (spec §4.5): the single-slot presenter lease plus the
//! screen-data fan-out that only the leaseholder may originate.
//!
//! The lease and the current frame share one lock (spec §5's lock table),
//! and every broadcast of a `PRESENTER:` notice happens after that lock is
//! released, per spec §4.5 edge case (b) and §9's note on the cyclic
//! dependency between the coordinator and the control sessions: mutate
//! under the lease lock, release it, then iterate sessions to broadcast.

use std::sync::Arc;

use log::{debug, info};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;

use crate::connections::ConnectionRegistry;
use crate::registry::{AddrKind, ParticipantId, Registry};

const GRANTED: &[u8] = b"GRANTED";
const DENIED: &[u8] = b"DENIED";

/// Outcome of a lease request, used by both the control-command path and
/// the dedicated screen-control handshake to decide what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    Granted,
    Denied,
}

struct ScreenState {
    lease: Option<ParticipantId>,
    frame: Option<Vec<u8>>,
}

/// Owns the presenter lease and the most recent screen frame.
pub struct ScreenCoordinator {
    state: parking_lot::Mutex<ScreenState>,
    registry: Arc<Registry>,
}

impl ScreenCoordinator {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            state: parking_lot::Mutex::new(ScreenState {
                lease: None,
                frame: None,
            }),
            registry,
        }
    }

    /// Current leaseholder, if any.
    #[must_use]
    pub fn current(&self) -> Option<ParticipantId> {
        self.state.lock().lease
    }

    /// Attempts to grant the lease to `pid`.
    ///
    /// FREE -> BUSY(pid): granted, broadcasts `PRESENTER:pid`.
    /// BUSY(pid) -> BUSY(pid): granted (idempotent reconnect, spec §9), no
    /// broadcast since nothing changed.
    /// BUSY(other) -> unchanged: denied.
    pub fn request(&self, pid: ParticipantId) -> LeaseOutcome {
        let transitioned = {
            let mut state = self.state.lock();
            match state.lease {
                None => {
                    state.lease = Some(pid);
                    true
                }
                Some(holder) if holder == pid => false,
                Some(_) => return LeaseOutcome::Denied,
            }
        };
        if transitioned {
            self.broadcast_presenter(Some(pid));
        }
        LeaseOutcome::Granted
    }

    /// Releases the lease if `pid` currently holds it. Returns `true` if a
    /// FREE transition happened (and was broadcast).
    pub fn release(&self, pid: ParticipantId) -> bool {
        let released = {
            let mut state = self.state.lock();
            if state.lease == Some(pid) {
                state.lease = None;
                state.frame = None;
                true
            } else {
                false
            }
        };
        if released {
            self.broadcast_presenter(None);
        }
        released
    }

    fn broadcast_presenter(&self, pid: Option<ParticipantId>) {
        let line = match pid {
            Some(id) => format!("PRESENTER:{id}"),
            None => "PRESENTER:None".to_string(),
        };
        self.registry.broadcast(&line);
    }

    /// Runs the screen-control TCP acceptor: handshake + `STOP` handling
    /// (spec §4.5, §6).
    pub async fn run_control_listener(
        self: Arc<Self>,
        listener: TcpListener,
        connections: Arc<ConnectionRegistry>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("screen-control acceptor shutting down");
                    return;
                }
                accepted = listener.accept() => {
                    let Ok((stream, addr)) = accepted else { continue };
                    let coordinator = Arc::clone(&self);
                    let guard = connections.register();
                    tokio::spawn(async move {
                        coordinator.handle_control_stream(stream, guard.cancel_token().clone()).await;
                        debug!("screen-control session from {addr} closed");
                    });
                }
            }
        }
    }

    async fn handle_control_stream(&self, mut stream: TcpStream, cancel: CancellationToken) {
        let mut id_buf = [0u8; 4];
        tokio::select! {
            _ = cancel.cancelled() => return,
            result = stream.read_exact(&mut id_buf) => {
                if result.is_err() {
                    return;
                }
            }
        }
        let pid = u32::from_le_bytes(id_buf);

        match self.request(pid) {
            LeaseOutcome::Denied => {
                let _ = stream.write_all(DENIED).await;
                return;
            }
            LeaseOutcome::Granted => {
                if stream.write_all(GRANTED).await.is_err() {
                    self.release(pid);
                    return;
                }
            }
        }

        let mut buf = [0u8; 64];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                read = stream.read(&mut buf) => {
                    match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            // Spec §6: any recv containing "STOP" as a
                            // substring triggers release.
                            if buf[..n].windows(4).any(|w| w == b"STOP") {
                                self.release(pid);
                                break;
                            }
                        }
                    }
                }
            }
        }
        self.release(pid);
    }

    /// Runs the screen-data UDP receive/fan-out loop (spec §4.5, §6).
    pub async fn run_data_endpoint(
        self: Arc<Self>,
        socket: UdpSocket,
        max_packet: usize,
        cancel: CancellationToken,
    ) {
        let mut buf = vec![0u8; max_packet];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("screen-data receiver shutting down");
                    return;
                }
                received = socket.recv_from(&mut buf) => {
                    let Ok((n, addr)) = received else { continue };
                    self.handle_datagram(&socket, &buf[..n], addr).await;
                }
            }
        }
    }

    async fn handle_datagram(
        &self,
        socket: &UdpSocket,
        packet: &[u8],
        addr: std::net::SocketAddr,
    ) {
        let Some((sender_id, payload)) = crate::protocol::read_envelope(packet) else {
            return;
        };
        self.registry.update_addr(sender_id, AddrKind::Screen, addr);

        // A zero-payload datagram is a beacon used solely to register the
        // source address; it must never be forwarded (spec §4.5 edge case a).
        if payload.is_empty() {
            return;
        }
        if self.current() != Some(sender_id) {
            return;
        }

        {
            let mut state = self.state.lock();
            state.frame = Some(payload.to_vec());
        }

        for participant in self.registry.snapshot() {
            if let Some(dest) = participant.addresses().screen {
                if let Err(err) = socket.send_to(packet, dest).await {
                    debug!("screen send to {dest} failed: {err}");
                }
            }
        }
    }
}
