use super::message::ParticipantId;
use super::quorum::Quorum;

/// The known participants, kept sorted so that every participant derives
/// the same leader rotation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Peers {
    members: Vec<ParticipantId>,
}

impl Peers {
    pub fn new(members: impl IntoIterator<Item = ParticipantId>) -> Self {
        let mut members: Vec<ParticipantId> = members.into_iter().collect();
        members.sort();
        members.dedup();
        Peers { members }
    }

    pub fn members(&self) -> &[ParticipantId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn quorum(&self) -> Quorum {
        Quorum::new(self.members.len())
    }

    /// Leader of `round` in the execution started by `initiator`: the
    /// initiator leads round 0 and leadership rotates through the sorted
    /// set from there.
    pub fn get_leader(&self, initiator: &ParticipantId, round: u64) -> Option<&ParticipantId> {
        if self.members.is_empty() {
            return None;
        }
        let start = self.members.iter().position(|m| m == initiator).unwrap_or(0);
        let len = self.members.len() as u64;
        let index = (start as u64 + round % len) % len;
        self.members.get(index as usize)
    }

    pub fn is_member(&self, id: &ParticipantId) -> bool {
        self.members.binary_search(id).is_ok()
    }

    /// Adds a newly discovered participant. Returns false if it was known.
    pub fn add(&mut self, id: ParticipantId) -> bool {
        match self.members.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.members.insert(pos, id);
                true
            }
        }
    }
}
