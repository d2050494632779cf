use std::collections::BTreeMap;
use uuid::Uuid;

use crate::protocol::{Participant, ReactionKind};

/// Live, deduplicated participant set for the party. Presence is coarse:
/// `is_online` changes only on explicit join/leave frames, never on a
/// heartbeat or timeout.
#[derive(Debug, Default)]
pub struct Roster {
    entries: BTreeMap<Uuid, Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole roster from an authoritative snapshot.
    pub fn seed(&mut self, participants: impl IntoIterator<Item = Participant>) {
        self.entries.clear();
        for participant in participants {
            self.entries.insert(participant.id, participant);
        }
    }

    /// Apply a `participant_joined` frame. Duplicate joins are idempotent:
    /// an existing entry is marked online but never duplicated. Returns true
    /// only when a new entry was inserted (callers append the system chat
    /// event on that signal).
    pub fn apply_join(&mut self, participant: Participant) -> bool {
        match self.entries.get_mut(&participant.id) {
            Some(existing) => {
                existing.is_online = true;
                false
            }
            None => {
                self.entries.insert(participant.id, participant);
                true
            }
        }
    }

    /// Apply a `participant_left` frame or an acknowledged kick. Returns the
    /// removed entry so callers can append the system chat event.
    pub fn apply_leave(&mut self, id: Uuid) -> Option<Participant> {
        self.entries.remove(&id)
    }

    /// Bump a reaction counter. Counters only grow locally; a decrease can
    /// only come from an authoritative resync through `seed`.
    pub fn apply_reaction(&mut self, id: Uuid, kind: ReactionKind) -> bool {
        let Some(participant) = self.entries.get_mut(&id) else {
            return false;
        };
        match kind {
            ReactionKind::Heart => participant.reaction_counters.hearts += 1,
            ReactionKind::Like => participant.reaction_counters.likes += 1,
        }
        true
    }

    pub fn get(&self, id: Uuid) -> Option<&Participant> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.entries.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ReactionCounters, Role};

    fn participant(id: Uuid, name: &str, role: Role) -> Participant {
        Participant {
            id,
            name: name.into(),
            role,
            is_online: true,
            is_muted: false,
            has_video: false,
            reaction_counters: ReactionCounters::default(),
        }
    }

    #[test]
    fn duplicate_join_keeps_one_entry() {
        let id = Uuid::new_v4();
        let mut roster = Roster::new();
        assert!(roster.apply_join(participant(id, "Ada", Role::Host)));
        assert!(!roster.apply_join(participant(id, "Ada", Role::Host)));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn rejoin_marks_snapshot_entry_online() {
        let id = Uuid::new_v4();
        let mut roster = Roster::new();
        let mut offline = participant(id, "Ada", Role::Participant);
        offline.is_online = false;
        roster.seed([offline]);

        assert!(!roster.apply_join(participant(id, "Ada", Role::Participant)));
        assert!(roster.get(id).unwrap().is_online);
    }

    #[test]
    fn leave_removes_entry() {
        let id = Uuid::new_v4();
        let mut roster = Roster::new();
        roster.apply_join(participant(id, "Ada", Role::Participant));
        let removed = roster.apply_leave(id).unwrap();
        assert_eq!(removed.name, "Ada");
        assert!(roster.is_empty());
        assert!(roster.apply_leave(id).is_none());
    }

    #[test]
    fn reactions_increment_counters() {
        let id = Uuid::new_v4();
        let mut roster = Roster::new();
        roster.apply_join(participant(id, "Ada", Role::Participant));

        assert!(roster.apply_reaction(id, ReactionKind::Heart));
        assert!(roster.apply_reaction(id, ReactionKind::Heart));
        assert!(roster.apply_reaction(id, ReactionKind::Like));
        let counters = roster.get(id).unwrap().reaction_counters;
        assert_eq!(counters.hearts, 2);
        assert_eq!(counters.likes, 1);

        assert!(!roster.apply_reaction(Uuid::new_v4(), ReactionKind::Like));
    }

    #[test]
    fn seed_replaces_previous_entries() {
        let mut roster = Roster::new();
        roster.apply_join(participant(Uuid::new_v4(), "Old", Role::Participant));
        let kept = participant(Uuid::new_v4(), "New", Role::Host);
        roster.seed([kept.clone()]);
        assert_eq!(roster.participants(), vec![kept]);
    }
}
