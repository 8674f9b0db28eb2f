//! Audio Mixer (spec §4.4): buffers the latest PCM chunk per participant and
//! periodically produces a per-listener mix that excludes the listener's own
//! contribution, so "own voice" echo can't happen regardless of packet loss
//! or chunk-length skew (spec §4.4 rationale).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::protocol::read_envelope;
use crate::registry::{AddrKind, ParticipantId, Registry};

struct ChunkEntry {
    pcm: Vec<u8>,
    received_at: Instant,
}

/// Audio Chunk Buffer (spec §3): latest PCM chunk per participant, with a
/// receive timestamp used to evict stale contributions before mixing.
#[derive(Default)]
struct AudioBuffer {
    chunks: RwLock<HashMap<ParticipantId, ChunkEntry>>,
}

impl AudioBuffer {
    fn store(&self, id: ParticipantId, pcm: Vec<u8>) {
        self.chunks.write().insert(
            id,
            ChunkEntry {
                pcm,
                received_at: Instant::now(),
            },
        );
    }

    fn remove(&self, id: ParticipantId) {
        self.chunks.write().remove(&id);
    }

    /// Drops entries older than `max_age`.
    fn evict_stale(&self, max_age: Duration) {
        let now = Instant::now();
        self.chunks
            .write()
            .retain(|_, entry| now.duration_since(entry.received_at) <= max_age);
    }

    /// Non-stale PCM contributions from every participant except `exclude`.
    fn contributions_excluding(&self, exclude: ParticipantId) -> Vec<Vec<i16>> {
        self.chunks
            .read()
            .iter()
            .filter(|(&id, _)| id != exclude)
            .map(|(_, entry)| bytes_to_i16(&entry.pcm))
            .collect()
    }
}

fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

fn i16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Produces the per-listener mean mix of `contributions`, clipped and
/// re-quantized to 16-bit signed samples (spec §4.4 steps 3-4). Returns
/// `None` if there is nothing to mix (spec §4.4 step 2).
#[must_use]
pub fn mix(contributions: &[Vec<i16>]) -> Option<Vec<i16>> {
    let min_len = contributions.iter().map(Vec::len).min()?;
    if min_len == 0 {
        return None;
    }
    let mut mixed = Vec::with_capacity(min_len);
    for i in 0..min_len {
        let sum: f32 = contributions.iter().map(|c| f32::from(c[i])).sum();
        let mean = sum / contributions.len() as f32;
        mixed.push(mean.clamp(-32768.0, 32767.0) as i16);
    }
    Some(mixed)
}

/// Periodic mixer plus the UDP receive loop for incoming PCM chunks.
pub struct AudioMixer {
    buffer: AudioBuffer,
    registry: Arc<Registry>,
    stale_after: Duration,
}

impl AudioMixer {
    #[must_use]
    pub fn new(registry: Arc<Registry>, stale_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            buffer: AudioBuffer::default(),
            registry,
            stale_after,
        })
    }

    /// Drops a departed participant's buffered chunk (spec §3 lifecycle).
    pub fn remove_participant(&self, id: ParticipantId) {
        self.buffer.remove(id);
    }

    /// Runs the audio UDP receive loop until `cancel` fires.
    pub async fn run_receiver(
        self: Arc<Self>,
        socket: Arc<UdpSocket>,
        max_packet: usize,
        cancel: CancellationToken,
    ) {
        let mut buf = vec![0u8; max_packet];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("audio receiver shutting down");
                    return;
                }
                received = socket.recv_from(&mut buf) => {
                    let Ok((n, addr)) = received else { continue };
                    self.handle_packet(&buf[..n], addr);
                }
            }
        }
    }

    fn handle_packet(&self, packet: &[u8], addr: SocketAddr) {
        let Some((sender_id, payload)) = read_envelope(packet) else {
            return;
        };
        self.registry.update_addr(sender_id, AddrKind::Audio, addr);
        self.buffer.store(sender_id, payload.to_vec());
    }

    /// Runs the periodic mix-and-emit loop until `cancel` fires.
    pub async fn run_mixer(
        self: Arc<Self>,
        socket: Arc<UdpSocket>,
        tick: Duration,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("audio mixer shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.mix_tick(&socket).await;
                }
            }
        }
    }

    async fn mix_tick(&self, socket: &UdpSocket) {
        self.buffer.evict_stale(self.stale_after);

        for listener in self.registry.snapshot() {
            let Some(dest) = listener.addresses().audio else {
                continue;
            };
            let contributions = self.buffer.contributions_excluding(listener.id);
            if contributions.is_empty() {
                continue;
            }
            let Some(mixed) = mix(&contributions) else {
                continue;
            };
            let payload = i16_to_bytes(&mixed);
            if let Err(err) = socket.send_to(&payload, dest).await {
                debug!("audio send to {dest} failed: {err}");
            }
        }
    }
}
