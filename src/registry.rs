//! Peer registry: one entry per remote participant with a live (or pending)
//! connection.
//!
//! The registry is owned by the session actor and is only touched from its
//! dispatch loop, so it holds no locks.  Every entry is stamped with an
//! epoch; results produced by asynchronous work carry the epoch they were
//! started under and are refused once the entry is gone or replaced.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::media::{RemoteStream, RemoteTrack};
use crate::protocol::ParticipantId;
use crate::signaling::{RemoteOp, SignalingMachine, SignalingState};
use crate::transport::PeerTransport;

pub struct PeerEntry {
    pub epoch: u64,
    seq: u64,
    pub display_name: String,
    pub machine: SignalingMachine,
    handle: Option<Arc<dyn PeerTransport>>,
    ops: Option<mpsc::UnboundedSender<RemoteOp>>,
    pending: Vec<RemoteOp>,
    primary: Option<RemoteStream>,
    screen: Option<RemoteStream>,
    screen_sharing: bool,
}

impl PeerEntry {
    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub fn screen_sharing(&self) -> bool {
        self.screen_sharing
    }

    pub fn pending_ops(&self) -> usize {
        self.pending.len()
    }
}

/// Which logical stream a remote track landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSlot {
    Primary,
    Screen,
}

/// Presentation copy of one entry.
#[derive(Debug, Clone)]
pub struct PeerView {
    pub id: ParticipantId,
    pub display_name: String,
    pub state: SignalingState,
    pub screen_sharing: bool,
    pub primary: Option<RemoteStream>,
    pub screen: Option<RemoteStream>,
}

#[derive(Default)]
pub struct PeerRegistry {
    entries: HashMap<ParticipantId, PeerEntry>,
    next_epoch: u64,
    next_seq: u64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer.  Returns the new entry's epoch, or `None` when the id
    /// is already registered (the existing entry is left untouched).
    pub fn upsert(
        &mut self,
        peer_id: &ParticipantId,
        display_name: &str,
        machine: SignalingMachine,
        screen_sharing: bool,
    ) -> Option<u64> {
        if self.entries.contains_key(peer_id) {
            debug!(peer_id = %peer_id, "peer already registered");
            return None;
        }
        self.next_epoch += 1;
        self.next_seq += 1;
        let epoch = self.next_epoch;
        self.entries.insert(
            peer_id.clone(),
            PeerEntry {
                epoch,
                seq: self.next_seq,
                display_name: display_name.to_string(),
                machine,
                handle: None,
                ops: None,
                pending: Vec::new(),
                primary: None,
                screen: None,
                screen_sharing,
            },
        );
        Some(epoch)
    }

    pub fn get(&self, peer_id: &ParticipantId) -> Option<&PeerEntry> {
        self.entries.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &ParticipantId) -> Option<&mut PeerEntry> {
        self.entries.get_mut(peer_id)
    }

    /// Entry for `peer_id` if it is still the lifetime identified by `epoch`.
    pub fn current_mut(&mut self, peer_id: &ParticipantId, epoch: u64) -> Option<&mut PeerEntry> {
        self.entries.get_mut(peer_id).filter(|e| e.epoch == epoch)
    }

    pub fn contains(&self, peer_id: &ParticipantId) -> bool {
        self.entries.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<ParticipantId> {
        self.entries.keys().cloned().collect()
    }

    /// Install the transport handle produced by a negotiation, flushing any
    /// remote ops queued while it was being created.  A handle for a removed
    /// or replaced entry is handed back so the caller can close it.
    pub fn install_handle(
        &mut self,
        peer_id: &ParticipantId,
        epoch: u64,
        handle: Arc<dyn PeerTransport>,
        ops: mpsc::UnboundedSender<RemoteOp>,
    ) -> Result<(), Arc<dyn PeerTransport>> {
        let Some(entry) = self.current_mut(peer_id, epoch) else {
            return Err(handle);
        };
        if entry.handle.is_some() {
            warn!(peer_id = %peer_id, "peer already has a connection");
            return Err(handle);
        }
        for op in entry.pending.drain(..) {
            let _ = ops.send(op);
        }
        entry.handle = Some(handle);
        entry.ops = Some(ops);
        Ok(())
    }

    /// Forward a remote op to the peer's connection, or queue it until the
    /// connection exists.  Returns `false` for an unknown peer.
    pub fn push_remote_op(&mut self, peer_id: &ParticipantId, op: RemoteOp) -> bool {
        let Some(entry) = self.entries.get_mut(peer_id) else {
            return false;
        };
        match &entry.ops {
            Some(ops) => {
                let _ = ops.send(op);
            }
            None => entry.pending.push(op),
        }
        true
    }

    /// Route a remote track: the first stream id seen becomes the primary
    /// stream, any other stream id is the screen share.
    pub fn attach_remote_track(
        &mut self,
        peer_id: &ParticipantId,
        epoch: u64,
        track: RemoteTrack,
    ) -> Option<StreamSlot> {
        let entry = self.current_mut(peer_id, epoch)?;
        let is_primary = entry
            .primary
            .as_ref()
            .map_or(true, |primary| primary.id == track.stream_id);
        let stream = RemoteStream::from_track(track);
        if is_primary {
            self.attach_primary_stream(peer_id, epoch, stream)
                .then_some(StreamSlot::Primary)
        } else {
            self.attach_screen_stream(peer_id, epoch, stream)
                .then_some(StreamSlot::Screen)
        }
    }

    /// Attach (or extend) the primary stream.  Dropped for a removed or
    /// replaced entry.
    pub fn attach_primary_stream(
        &mut self,
        peer_id: &ParticipantId,
        epoch: u64,
        stream: RemoteStream,
    ) -> bool {
        let Some(entry) = self.current_mut(peer_id, epoch) else {
            return false;
        };
        match &mut entry.primary {
            Some(existing) if existing.id == stream.id => existing.merge(stream),
            slot => *slot = Some(stream),
        }
        true
    }

    pub fn attach_screen_stream(
        &mut self,
        peer_id: &ParticipantId,
        epoch: u64,
        stream: RemoteStream,
    ) -> bool {
        let Some(entry) = self.current_mut(peer_id, epoch) else {
            return false;
        };
        match &mut entry.screen {
            Some(existing) if existing.id == stream.id => existing.merge(stream),
            slot => *slot = Some(stream),
        }
        true
    }

    /// Unknown ids are ignored; a screen-share flag never creates a peer.
    /// Clearing the flag also drops the screen stream.
    pub fn set_screen_sharing(&mut self, peer_id: &ParticipantId, sharing: bool) -> bool {
        let Some(entry) = self.entries.get_mut(peer_id) else {
            return false;
        };
        entry.screen_sharing = sharing;
        if !sharing {
            entry.screen = None;
        }
        true
    }

    /// Remove the entry and tear down its connection.
    pub fn remove(&mut self, peer_id: &ParticipantId) -> Option<PeerEntry> {
        let mut entry = self.entries.remove(peer_id)?;
        entry.machine.close();
        entry.ops = None;
        if let Some(handle) = entry.handle.take() {
            tokio::spawn(async move { handle.close().await });
        }
        debug!(peer_id = %peer_id, epoch = entry.epoch, "peer removed");
        Some(entry)
    }

    /// Remove every entry, closing all connections.
    pub fn drain(&mut self) -> usize {
        let ids = self.ids();
        for id in &ids {
            self.remove(id);
        }
        ids.len()
    }

    /// Entries in registration order.
    pub fn snapshot(&self) -> Vec<PeerView> {
        let mut entries: Vec<(&ParticipantId, &PeerEntry)> = self.entries.iter().collect();
        entries.sort_by_key(|(_, e)| e.seq);
        entries
            .into_iter()
            .map(|(id, e)| PeerView {
                id: id.clone(),
                display_name: e.display_name.clone(),
                state: e.machine.state(),
                screen_sharing: e.screen_sharing,
                primary: e.primary.clone(),
                screen: e.screen.clone(),
            })
            .collect()
    }
}
