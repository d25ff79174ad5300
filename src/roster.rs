// Room membership as announced by the relay.

use serde::Serialize;

use crate::protocol::{ParticipantId, ParticipantInfo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub screen_sharing: bool,
}

impl From<ParticipantInfo> for Participant {
    fn from(info: ParticipantInfo) -> Self {
        Self {
            id: info.id,
            display_name: info.display_name,
            screen_sharing: info.screen_sharing,
        }
    }
}

/// Result of reconciling the roster with a fresh relay snapshot.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RosterDiff {
    pub added: Vec<Participant>,
    pub removed: Vec<ParticipantId>,
}

/// Remote participants of the room, in arrival order.  Never contains the
/// local participant.
#[derive(Debug, Clone)]
pub struct RoomMembership {
    pub room_id: String,
    pub local_id: ParticipantId,
    remote: Vec<Participant>,
}

impl RoomMembership {
    pub fn new(room_id: impl Into<String>, local_id: ParticipantId) -> Self {
        Self {
            room_id: room_id.into(),
            local_id,
            remote: Vec::new(),
        }
    }

    /// Add a participant.  Returns `false` for the local id or an id already
    /// present.
    pub fn insert(&mut self, participant: Participant) -> bool {
        if participant.id == self.local_id || self.contains(&participant.id) {
            return false;
        }
        self.remote.push(participant);
        true
    }

    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        let idx = self.remote.iter().position(|p| &p.id == id)?;
        Some(self.remote.remove(idx))
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.remote.iter().any(|p| &p.id == id)
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.remote.iter().find(|p| &p.id == id)
    }

    pub fn set_screen_sharing(&mut self, id: &ParticipantId, sharing: bool) -> bool {
        match self.remote.iter_mut().find(|p| &p.id == id) {
            Some(p) => {
                p.screen_sharing = sharing;
                true
            }
            None => false,
        }
    }

    pub fn remote(&self) -> &[Participant] {
        &self.remote
    }

    pub fn len(&self) -> usize {
        self.remote.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remote.is_empty()
    }

    pub fn clear(&mut self) {
        self.remote.clear();
    }

    /// Replace the roster with `snapshot` (self entry filtered out) and report
    /// who appeared and who vanished.  Screen flags of retained participants
    /// are refreshed from the snapshot.
    pub fn reconcile(&mut self, snapshot: Vec<Participant>) -> RosterDiff {
        let snapshot: Vec<Participant> = snapshot
            .into_iter()
            .filter(|p| p.id != self.local_id)
            .collect();

        let removed: Vec<ParticipantId> = self
            .remote
            .iter()
            .filter(|p| !snapshot.iter().any(|s| s.id == p.id))
            .map(|p| p.id.clone())
            .collect();
        for id in &removed {
            self.remove(id);
        }

        let mut added = Vec::new();
        for participant in snapshot {
            if let Some(existing) = self.remote.iter_mut().find(|p| p.id == participant.id) {
                existing.screen_sharing = participant.screen_sharing;
            } else if self.insert(participant.clone()) {
                added.push(participant);
            }
        }

        RosterDiff { added, removed }
    }
}
