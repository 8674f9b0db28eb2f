//! Participant Registry (spec §3, §4.1).
//!
//! Grounded on the teacher's `state::SonosState`: a single
//! `parking_lot::RwLock`-guarded ordered collection for data that needs an
//! atomic read-increment-insert and an ordered whole-collection snapshot,
//! with a small interior lock per element for the independently-updated
//! address slots. This keeps locking leaf-level, per spec §5: a caller never
//! holds the registry lock while also holding the video/audio/screen/file
//! locks, and the per-participant address-slot lock is nested data of the
//! registry, not a separate top-level lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::error::{HubError, HubResult};

/// Unique, process-lifetime participant identifier.
pub type ParticipantId = u32;

/// Which media endpoint is reporting a learned source address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrKind {
    Control,
    Video,
    Audio,
    Screen,
}

/// The four lazily-learned peer addresses for a participant (spec §3).
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerAddresses {
    pub control: Option<SocketAddr>,
    pub video: Option<SocketAddr>,
    pub audio: Option<SocketAddr>,
    pub screen: Option<SocketAddr>,
}

impl PeerAddresses {
    fn set(&mut self, kind: AddrKind, addr: SocketAddr) {
        match kind {
            AddrKind::Control => self.control = Some(addr),
            AddrKind::Video => self.video = Some(addr),
            AddrKind::Audio => self.audio = Some(addr),
            AddrKind::Screen => self.screen = Some(addr),
        }
    }
}

/// A live participant: identity plus the channel its control session
/// writer task drains to deliver notices in issue order.
pub struct Participant {
    pub id: ParticipantId,
    pub username: String,
    /// Outbound notice/command-reply lines for this participant's control
    /// stream. A single writer task owns the receiving end, which is what
    /// gives per-stream ordering (spec §4.2) without holding any lock
    /// across a network write.
    pub notices: mpsc::UnboundedSender<String>,
    addrs: Mutex<PeerAddresses>,
}

impl Participant {
    /// Sends a notice line to this participant. Write errors on the
    /// underlying socket surface later, in the writer task; a full receiver
    /// (dropped session) just means the line is discarded, which is the
    /// correct behavior for a session that's already torn down.
    pub fn notify(&self, line: impl Into<String>) {
        let _ = self.notices.send(line.into());
    }

    /// Snapshot of this participant's learned peer addresses.
    #[must_use]
    pub fn addresses(&self) -> PeerAddresses {
        *self.addrs.lock()
    }
}

struct Inner {
    next_id: ParticipantId,
    order: Vec<ParticipantId>,
    by_id: HashMap<ParticipantId, Arc<Participant>>,
}

/// The Participant Registry: assigns ids, tracks usernames and learned
/// addresses, and produces roster snapshots in join order.
pub struct Registry {
    inner: RwLock<Inner>,
    max_users: usize,
}

impl Registry {
    #[must_use]
    pub fn new(max_users: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 0,
                order: Vec::new(),
                by_id: HashMap::new(),
            }),
            max_users,
        }
    }

    /// Registers a new participant, atomically assigning the next id.
    ///
    /// # Errors
    /// Returns [`HubError::HubFull`] if the registry already holds
    /// `max_users` live participants.
    pub fn register(
        &self,
        username: String,
        notices: mpsc::UnboundedSender<String>,
    ) -> HubResult<Arc<Participant>> {
        let mut inner = self.inner.write();
        if inner.order.len() >= self.max_users {
            return Err(HubError::HubFull {
                max_users: self.max_users,
            });
        }
        let id = inner.next_id;
        inner.next_id += 1;

        let participant = Arc::new(Participant {
            id,
            username,
            notices,
            addrs: Mutex::new(PeerAddresses::default()),
        });
        inner.order.push(id);
        inner.by_id.insert(id, Arc::clone(&participant));
        Ok(participant)
    }

    /// Removes a participant. Idempotent: returns `None` if already gone.
    pub fn deregister(&self, id: ParticipantId) -> Option<Arc<Participant>> {
        let mut inner = self.inner.write();
        let removed = inner.by_id.remove(&id);
        if removed.is_some() {
            inner.order.retain(|&existing| existing != id);
        }
        removed
    }

    /// Looks up a live participant by id.
    #[must_use]
    pub fn lookup(&self, id: ParticipantId) -> Option<Arc<Participant>> {
        self.inner.read().by_id.get(&id).map(Arc::clone)
    }

    /// Ordered (by join time) snapshot of every live participant.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Participant>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .map(Arc::clone)
            .collect()
    }

    /// Records a learned peer address for `id`'s `kind` endpoint. A no-op if
    /// the participant has already departed (the packet just arrived late).
    pub fn update_addr(&self, id: ParticipantId, kind: AddrKind, addr: SocketAddr) {
        if let Some(participant) = self.inner.read().by_id.get(&id) {
            participant.addrs.lock().set(kind, addr);
        }
    }

    /// Sends `line` to every live participant's control stream.
    pub fn broadcast(&self, line: &str) {
        for participant in self.snapshot() {
            participant.notify(line.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> mpsc::UnboundedSender<String> {
        mpsc::unbounded_channel().0
    }

    #[test]
    fn ids_increase_monotonically() {
        let registry = Registry::new(10);
        let a = registry.register("alice".into(), channel()).unwrap();
        let b = registry.register("bob".into(), channel()).unwrap();
        assert_eq!(a.id, 0);
        assert_eq!(b.id, 1);
    }

    #[test]
    fn snapshot_preserves_join_order() {
        let registry = Registry::new(10);
        registry.register("alice".into(), channel()).unwrap();
        registry.register("bob".into(), channel()).unwrap();
        let names: Vec<_> = registry.snapshot().iter().map(|p| p.username.clone()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn deregister_is_idempotent() {
        let registry = Registry::new(10);
        let a = registry.register("alice".into(), channel()).unwrap();
        assert!(registry.deregister(a.id).is_some());
        assert!(registry.deregister(a.id).is_none());
    }

    #[test]
    fn deregister_removes_from_snapshot() {
        let registry = Registry::new(10);
        let a = registry.register("alice".into(), channel()).unwrap();
        registry.register("bob".into(), channel()).unwrap();
        registry.deregister(a.id);
        let names: Vec<_> = registry.snapshot().iter().map(|p| p.username.clone()).collect();
        assert_eq!(names, vec!["bob"]);
    }

    #[test]
    fn register_fails_when_full() {
        let registry = Registry::new(1);
        registry.register("alice".into(), channel()).unwrap();
        assert!(matches!(
            registry.register("bob".into(), channel()),
            Err(HubError::HubFull { max_users: 1 })
        ));
    }

    #[test]
    fn addr_updates_are_scoped_per_kind() {
        let registry = Registry::new(10);
        let a = registry.register("alice".into(), channel()).unwrap();
        let video_addr: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        registry.update_addr(a.id, AddrKind::Video, video_addr);
        let addrs = a.addresses();
        assert_eq!(addrs.video, Some(video_addr));
        assert_eq!(addrs.audio, None);
    }

    #[test]
    fn addr_update_on_departed_participant_is_noop() {
        let registry = Registry::new(10);
        let a = registry.register("alice".into(), channel()).unwrap();
        registry.deregister(a.id);
        registry.update_addr(a.id, AddrKind::Video, "127.0.0.1:1".parse().unwrap());
        // No panic, and the stale Arc is unaffected (nothing asserts on it
        // beyond "doesn't crash" since the participant is already gone).
    }
}
