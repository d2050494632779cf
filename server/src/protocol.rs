use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames exchanged with clients (must match client protocol).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    // Server -> Client
    SyncState {
        sync_state: SyncState,
    },
    ParticipantJoined {
        participant: Participant,
    },
    ParticipantLeft {
        participant_id: Uuid,
    },

    // Either direction
    ChatMessage {
        message: ChatEvent,
    },
    Reaction {
        reaction: ReactionKind,
        participant_id: Uuid,
    },

    // Client -> Server
    KickParticipant {
        participant_id: Uuid,
    },
    VideoControl {
        action: ControlAction,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub is_playing: bool,
    pub current_time: f64,
    pub playback_rate: f64,
    pub last_update: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub is_online: bool,
    pub is_muted: bool,
    pub has_video: bool,
    #[serde(default)]
    pub reaction_counters: ReactionCounters,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReactionCounters {
    pub hearts: u64,
    pub likes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Moderator,
    Participant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionKind {
    Heart,
    Like,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    pub id: Uuid,
    pub author: Uuid,
    pub body: String,
    pub timestamp: u64,
    pub kind: ChatEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatEventKind {
    Message,
    System,
    Reaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Play,
    Pause,
    Seek,
}

/// REST view of a party served to joining clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartySnapshot {
    pub party_id: String,
    pub host_id: Uuid,
    pub video: VideoMetadata,
    pub settings: PartySettings,
    pub participants: Vec<Participant>,
    pub sync_state: SyncState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub title: String,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartySettings {
    pub allow_participant_controls: bool,
}
