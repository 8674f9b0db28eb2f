//! Video Router (spec §4.3): learns each participant's video source address
//! from the first packet it sends and fans every frame out to every other
//! participant with a known video address. Stateless per packet beyond
//! address learning; no ordering, no dedup, no ACK.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::protocol::read_envelope;
use crate::registry::{AddrKind, Registry};

/// Runs the video UDP receive/fan-out loop until `cancel` fires.
pub async fn run(
    socket: UdpSocket,
    registry: Arc<Registry>,
    max_packet: usize,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; max_packet];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("video receiver shutting down");
                return;
            }
            received = socket.recv_from(&mut buf) => {
                let Ok((n, addr)) = received else { continue };
                handle_packet(&socket, &registry, &buf[..n], addr).await;
            }
        }
    }
}

async fn handle_packet(socket: &UdpSocket, registry: &Registry, packet: &[u8], addr: SocketAddr) {
    let Some((sender_id, _payload)) = read_envelope(packet) else {
        return;
    };
    // Overwrite every time: handles client restarts changing source port.
    registry.update_addr(sender_id, AddrKind::Video, addr);

    for participant in registry.snapshot() {
        if participant.id == sender_id {
            continue;
        }
        if let Some(dest) = participant.addresses().video {
            if let Err(err) = socket.send_to(packet, dest).await {
                debug!("video send to {dest} failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::write_envelope;

    #[tokio::test]
    async fn forwards_to_known_peers_excluding_sender() {
        let registry = Arc::new(Registry::new(10));
        let (tx0, _rx0) = tokio::sync::mpsc::unbounded_channel();
        let (tx1, _rx1) = tokio::sync::mpsc::unbounded_channel();
        registry.register("alice".into(), tx0).unwrap();
        registry.register("bob".into(), tx1).unwrap();

        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let bob_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let bob_addr = bob_sock.local_addr().unwrap();
        registry.update_addr(1, AddrKind::Video, bob_addr);

        let packet = write_envelope(0, b"frame-a");
        let alice_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        alice_sock.send_to(&packet, server_addr).await.unwrap();

        let (n, from) = server.recv_from(&mut [0u8; 1500]).await.unwrap();
        assert!(n > 0);
        handle_packet(&server, &registry, &packet, from).await;

        let mut out = [0u8; 1500];
        let (n, _) = bob_sock.recv_from(&mut out).await.unwrap();
        assert_eq!(&out[..n], packet.as_slice());
    }

    #[tokio::test]
    async fn unknown_sender_still_learns_address_without_panicking() {
        let registry = Arc::new(Registry::new(10));
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = write_envelope(99, b"x");
        handle_packet(&server, &registry, &packet, "127.0.0.1:1".parse().unwrap()).await;
    }
}
