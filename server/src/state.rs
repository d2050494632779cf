use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::protocol::{
    ControlAction, Participant, PartySettings, PartySnapshot, ReactionCounters, ReactionKind,
    Role, SyncState, VideoMetadata,
};

const LOG_TAG: &str = "[Matinee Relay]";
const DEFAULT_VIDEO_DURATION_SECS: f64 = 2.0 * 60.0 * 60.0;

/// Shared relay state. Parties are created lazily on first contact (REST or
/// WebSocket); the first identity to touch a party becomes its host.
#[derive(Clone)]
pub struct ServerState {
    /// All known parties: party_id -> Party
    parties: Arc<DashMap<String, Party>>,
    /// Whether newly created parties allow non-host playback control.
    open_controls: bool,
}

impl ServerState {
    pub fn new(open_controls: bool) -> Self {
        Self {
            parties: Arc::new(DashMap::new()),
            open_controls,
        }
    }

    /// Build the REST snapshot for a party, creating party and identity as
    /// needed. Returns the participant id bound to the token.
    pub fn snapshot(&self, party_id: &str, token: &str) -> (PartySnapshot, Uuid) {
        let mut party = self.ensure_party(party_id);
        let participant_id = party.identity_for(token);
        let snapshot = PartySnapshot {
            party_id: party_id.to_string(),
            host_id: party.host_id,
            video: party.video.clone(),
            settings: party.settings,
            participants: party.participants(),
            sync_state: party.playback.sync_state(),
        };
        (snapshot, participant_id)
    }

    /// Bind a WebSocket to the identity behind `token` and mark it online.
    /// Returns the roster entry for the join broadcast.
    pub fn attach(&self, party_id: &str, token: &str) -> Result<(Uuid, Participant), String> {
        let mut party = self.ensure_party(party_id);
        let participant_id = party.identity_for(token);
        let Some(member) = party.members.get_mut(&participant_id) else {
            return Err("identity registration failed".to_string());
        };
        member.online = true;
        tracing::info!("{LOG_TAG} Participant {} joined party {}", participant_id, party_id);
        let participant = party
            .participant(participant_id)
            .ok_or_else(|| "identity registration failed".to_string())?;
        Ok((participant_id, participant))
    }

    /// Mark a participant offline. Returns false when it already was (so a
    /// kick followed by the socket teardown broadcasts only one leave).
    pub fn detach(&self, party_id: &str, participant_id: Uuid) -> bool {
        let Some(mut party) = self.parties.get_mut(party_id) else {
            return false;
        };
        let Some(member) = party.members.get_mut(&participant_id) else {
            return false;
        };
        let was_online = member.online;
        member.online = false;
        if was_online {
            tracing::info!("{LOG_TAG} Participant {} left party {}", participant_id, party_id);
        }
        was_online
    }

    pub fn playback_state(&self, party_id: &str) -> Option<SyncState> {
        self.parties
            .get(party_id)
            .map(|party| party.playback.sync_state())
    }

    /// Apply a playback control command and return the new authoritative
    /// state for broadcast.
    pub fn apply_control(
        &self,
        party_id: &str,
        sender: Uuid,
        action: ControlAction,
        value: Option<f64>,
    ) -> Result<SyncState, String> {
        let mut party = self
            .parties
            .get_mut(party_id)
            .ok_or_else(|| "party not found".to_string())?;
        let member = party
            .members
            .get(&sender)
            .ok_or_else(|| "sender is not a member".to_string())?;
        if member.role != Role::Host && !party.settings.allow_participant_controls {
            return Err("playback control is restricted to the host".to_string());
        }
        party.playback.apply(action, value)?;
        Ok(party.playback.sync_state())
    }

    pub fn apply_reaction(&self, party_id: &str, sender: Uuid, reaction: ReactionKind) {
        if let Some(mut party) = self.parties.get_mut(party_id) {
            if let Some(member) = party.members.get_mut(&sender) {
                match reaction {
                    ReactionKind::Heart => member.hearts += 1,
                    ReactionKind::Like => member.likes += 1,
                }
            }
        }
    }

    pub fn authorize_kick(
        &self,
        party_id: &str,
        sender: Uuid,
        target: Uuid,
    ) -> Result<(), String> {
        let party = self
            .parties
            .get(party_id)
            .ok_or_else(|| "party not found".to_string())?;
        let sender_role = party
            .members
            .get(&sender)
            .map(|m| m.role)
            .ok_or_else(|| "sender is not a member".to_string())?;
        let target_role = party
            .members
            .get(&target)
            .map(|m| m.role)
            .ok_or_else(|| "target is not a member".to_string())?;
        if !matches!(sender_role, Role::Host | Role::Moderator) {
            return Err("only the host or a moderator can kick".to_string());
        }
        if target_role == Role::Host {
            return Err("the host cannot be kicked".to_string());
        }
        Ok(())
    }

    pub fn online_members(&self, party_id: &str) -> Vec<Uuid> {
        self.parties
            .get(party_id)
            .map(|party| {
                party
                    .members
                    .iter()
                    .filter(|(_, m)| m.online)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn party_ids(&self) -> Vec<String> {
        self.parties.iter().map(|entry| entry.key().clone()).collect()
    }

    fn ensure_party(&self, party_id: &str) -> dashmap::mapref::one::RefMut<'_, String, Party> {
        self.parties
            .entry(party_id.to_string())
            .or_insert_with(|| {
                tracing::info!("{LOG_TAG} Party {} created", party_id);
                Party::new(party_id, self.open_controls)
            })
    }
}

struct Party {
    host_id: Uuid,
    settings: PartySettings,
    video: VideoMetadata,
    members: HashMap<Uuid, Member>,
    tokens: HashMap<String, Uuid>,
    playback: Playback,
}

impl Party {
    fn new(party_id: &str, open_controls: bool) -> Self {
        Self {
            // Assigned for real when the first identity registers.
            host_id: Uuid::nil(),
            settings: PartySettings {
                allow_participant_controls: open_controls,
            },
            video: VideoMetadata {
                title: format!("Party {party_id}"),
                duration_seconds: DEFAULT_VIDEO_DURATION_SECS,
            },
            members: HashMap::new(),
            tokens: HashMap::new(),
            playback: Playback::new(),
        }
    }

    /// Resolve a token to its participant id, registering a new member on
    /// first sight. The first member of a party is its host.
    fn identity_for(&mut self, token: &str) -> Uuid {
        if let Some(id) = self.tokens.get(token) {
            return *id;
        }
        let id = Uuid::new_v4();
        let role = if self.members.is_empty() {
            self.host_id = id;
            Role::Host
        } else {
            Role::Participant
        };
        self.members.insert(
            id,
            Member {
                name: default_display_name(id),
                role,
                online: false,
                muted: false,
                has_video: false,
                hearts: 0,
                likes: 0,
            },
        );
        self.tokens.insert(token.to_string(), id);
        id
    }

    fn participant(&self, id: Uuid) -> Option<Participant> {
        self.members.get(&id).map(|member| Participant {
            id,
            name: member.name.clone(),
            role: member.role,
            is_online: member.online,
            is_muted: member.muted,
            has_video: member.has_video,
            reaction_counters: ReactionCounters {
                hearts: member.hearts,
                likes: member.likes,
            },
        })
    }

    fn participants(&self) -> Vec<Participant> {
        let mut roster: Vec<Participant> = self
            .members
            .keys()
            .filter_map(|id| self.participant(*id))
            .collect();
        roster.sort_by_key(|p| p.id);
        roster
    }
}

struct Member {
    name: String,
    role: Role,
    online: bool,
    muted: bool,
    has_video: bool,
    hearts: u64,
    likes: u64,
}

/// Authoritative playback clock. The stored position is anchored at the
/// last mutation; while playing, reads extrapolate with wall time.
struct Playback {
    is_playing: bool,
    position: f64,
    rate: f64,
    anchored_at: Instant,
}

impl Playback {
    fn new() -> Self {
        Self {
            is_playing: false,
            position: 0.0,
            rate: 1.0,
            anchored_at: Instant::now(),
        }
    }

    fn current_position(&self) -> f64 {
        if self.is_playing {
            self.position + self.anchored_at.elapsed().as_secs_f64() * self.rate
        } else {
            self.position
        }
    }

    fn sync_state(&self) -> SyncState {
        SyncState {
            is_playing: self.is_playing,
            current_time: self.current_position(),
            playback_rate: self.rate,
            last_update: unix_millis(),
        }
    }

    fn apply(&mut self, action: ControlAction, value: Option<f64>) -> Result<(), String> {
        let position = self.current_position();
        match action {
            ControlAction::Play => {
                self.position = position;
                self.is_playing = true;
            }
            ControlAction::Pause => {
                self.position = position;
                self.is_playing = false;
            }
            ControlAction::Seek => {
                let target = value.ok_or_else(|| "seek without a target".to_string())?;
                if !target.is_finite() || target < 0.0 {
                    return Err(format!("seek target out of range: {target}"));
                }
                self.position = target;
            }
        }
        self.anchored_at = Instant::now();
        Ok(())
    }
}

fn default_display_name(id: Uuid) -> String {
    let short = &id.to_string()[..8];
    format!("Guest {short}")
}

fn unix_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}
