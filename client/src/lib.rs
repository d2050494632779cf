//! Client core for Matinee watch parties: keeps many independently-rendering
//! video players perceptually in sync over one persistent relay connection,
//! while participants chat and react.
//!
//! [`PartyRoom`] is the entry point. It fetches the party snapshot, opens
//! the sync channel, reconciles the local [`media::MediaPlayer`] against the
//! authoritative playback state, and guards control commands by role.

pub mod chat;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod guard;
pub mod media;
pub mod party;
pub mod protocol;
pub mod reconciler;
pub mod roster;
pub mod session;
pub mod snapshot;

pub use config::ClientConfig;
pub use error::ClientError;
pub use media::{MediaPlayer, SimulatedPlayer};
pub use party::PartyRoom;
pub use protocol::{
    ChatEvent, ChatEventKind, Command, Frame, Participant, ReactionKind, Role, SyncState,
};
pub use session::{ConnectionState, SessionManager, SessionStatsSnapshot};
pub use snapshot::{PartySettings, PartySnapshot, VideoMetadata};
