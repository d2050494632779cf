use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ClientError;

/// Frames exchanged with the relay (must match server protocol). Each frame
/// serializes as `{"type": "...", ...}` with the payload fields inlined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

/// Authoritative playback state as distributed by the relay. Written locally
/// only by the inbound `sync_state` handler; local playback events never
/// touch it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub is_playing: bool,
    /// Playback position in seconds.
    pub current_time: f64,
    pub playback_rate: f64,
    /// Unix milliseconds at which the relay captured this state.
    pub last_update: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
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

/// A chat log entry. Immutable once appended; ordering is local arrival
/// order, not sender timestamp order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub id: Uuid,
    pub author: Uuid,
    pub body: String,
    /// Unix milliseconds, as stamped by the sender.
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

/// User intent, produced by UI actions and consumed by the dispatcher.
/// Transient: guarded, encoded, sent, then discarded.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Seek { seconds: f64 },
    Chat { body: String },
    React { reaction: ReactionKind },
    Kick { participant_id: Uuid },
}

/// Decode one inbound text frame. Unknown `type` values and malformed or
/// semantically invalid payloads come back as `ClientError::Protocol`; the
/// session logs and drops them rather than letting them reach routing.
pub fn decode(text: &str) -> Result<Frame, ClientError> {
    let frame: Frame =
        serde_json::from_str(text).map_err(|e| ClientError::Protocol(e.to_string()))?;
    validate(&frame)?;
    Ok(frame)
}

/// Serialize an outbound frame.
pub fn encode(frame: &Frame) -> Result<String, ClientError> {
    serde_json::to_string(frame).map_err(|e| ClientError::Protocol(e.to_string()))
}

fn validate(frame: &Frame) -> Result<(), ClientError> {
    match frame {
        Frame::SyncState { sync_state } => {
            if !sync_state.current_time.is_finite() || sync_state.current_time < 0.0 {
                return Err(ClientError::Protocol(format!(
                    "currentTime out of range: {}",
                    sync_state.current_time
                )));
            }
            if !sync_state.playback_rate.is_finite() || sync_state.playback_rate <= 0.0 {
                return Err(ClientError::Protocol(format!(
                    "playbackRate out of range: {}",
                    sync_state.playback_rate
                )));
            }
        }
        Frame::ChatMessage { message } => {
            if message.body.trim().is_empty() {
                return Err(ClientError::Protocol("empty chat body".into()));
            }
        }
        Frame::VideoControl {
            action: ControlAction::Seek,
            value: None,
        } => {
            return Err(ClientError::Protocol("seek without a target".into()));
        }
        _ => {}
    }
    Ok(())
}
