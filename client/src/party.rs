use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::ChatLog;
use crate::config::ClientConfig;
use crate::dispatcher::CommandDispatcher;
use crate::error::ClientError;
use crate::media::MediaPlayer;
use crate::protocol::{ChatEvent, Command, Frame, Participant, ReactionKind, Role, SyncState};
use crate::reconciler::PlaybackReconciler;
use crate::roster::Roster;
use crate::session::{ConnectionState, SessionManager, SessionStatsSnapshot};
use crate::snapshot::{fetch_party_snapshot, PartySettings, VideoMetadata};

/// Party state shared between the frame router, the dispatcher and the
/// resync task. SyncState is deliberately absent: the reconciler is its one
/// writer and its one owner.
pub(crate) struct PartyShared {
    pub(crate) local_id: Uuid,
    pub(crate) settings: Mutex<PartySettings>,
    pub(crate) roster: Mutex<Roster>,
    pub(crate) chat: Mutex<ChatLog>,
}

impl PartyShared {
    pub(crate) fn local_role(&self) -> Role {
        self.roster
            .lock()
            .get(self.local_id)
            .map(|p| p.role)
            .unwrap_or(Role::Participant)
    }
}

/// A live watch party, scoped to the room view's lifetime.
///
/// `join` acquires everything (snapshot, media alignment, sync channel);
/// dropping the room releases it all and cancels any pending reconnect.
/// After every reconnect the roster, chat and settings are rebuilt from a
/// fresh snapshot; nothing is diffed against stale local copies.
pub struct PartyRoom {
    party_id: String,
    video: VideoMetadata,
    shared: Arc<PartyShared>,
    session: Arc<SessionManager>,
    reconciler: Arc<PlaybackReconciler>,
    dispatcher: CommandDispatcher,
    resync_task: tokio::task::JoinHandle<()>,
}

impl PartyRoom {
    /// Enter a party: fetch the initial snapshot, seed local state, align
    /// the player, and open the sync channel. A snapshot failure surfaces
    /// as a retryable `DataLoad` error; no placeholder party is fabricated.
    pub async fn join(
        config: ClientConfig,
        party_id: &str,
        token: &str,
        media: Arc<dyn MediaPlayer>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("matinee-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::DataLoad(e.to_string()))?;

        let (snapshot, local_id) = fetch_party_snapshot(&http, &config, party_id, token).await?;
        info!(party_id, "joined party \"{}\"", snapshot.video.title);

        let shared = Arc::new(PartyShared {
            local_id,
            settings: Mutex::new(snapshot.settings),
            roster: Mutex::new(Roster::new()),
            chat: Mutex::new(ChatLog::new()),
        });
        shared.roster.lock().seed(snapshot.participants);

        let reconciler = Arc::new(PlaybackReconciler::new(media));
        reconciler.apply(snapshot.sync_state);

        let route_shared = Arc::clone(&shared);
        let route_reconciler = Arc::clone(&reconciler);
        let session = Arc::new(SessionManager::connect(
            &config,
            party_id,
            token,
            move |frame| route_frame(&route_shared, &route_reconciler, frame),
        )?);

        let resync_task = tokio::spawn(resync_loop(
            session.connection(),
            http,
            config,
            party_id.to_string(),
            token.to_string(),
            Arc::clone(&shared),
            Arc::clone(&reconciler),
        ));

        let dispatcher = CommandDispatcher::new(
            Arc::clone(&shared),
            Arc::clone(&session),
            Arc::clone(&reconciler),
        );

        Ok(Self {
            party_id: party_id.to_string(),
            video: snapshot.video,
            shared,
            session,
            reconciler,
            dispatcher,
            resync_task,
        })
    }

    // Commands

    pub fn play(&self) -> Result<(), ClientError> {
        self.dispatcher.dispatch(Command::Play)
    }

    pub fn pause(&self) -> Result<(), ClientError> {
        self.dispatcher.dispatch(Command::Pause)
    }

    pub fn seek(&self, seconds: f64) -> Result<(), ClientError> {
        self.dispatcher.dispatch(Command::Seek { seconds })
    }

    pub fn send_chat(&self, body: impl Into<String>) -> Result<(), ClientError> {
        self.dispatcher.dispatch(Command::Chat { body: body.into() })
    }

    pub fn send_reaction(&self, reaction: ReactionKind) -> Result<(), ClientError> {
        self.dispatcher.dispatch(Command::React { reaction })
    }

    pub fn kick(&self, participant_id: Uuid) -> Result<(), ClientError> {
        self.dispatcher.dispatch(Command::Kick { participant_id })
    }

    // Read side

    pub fn party_id(&self) -> &str {
        &self.party_id
    }

    pub fn video(&self) -> &VideoMetadata {
        &self.video
    }

    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.session.connection()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn stats(&self) -> SessionStatsSnapshot {
        self.session.stats_snapshot()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.shared.roster.lock().participants()
    }

    pub fn local_participant(&self) -> Option<Participant> {
        self.shared.roster.lock().get(self.shared.local_id).cloned()
    }

    pub fn settings(&self) -> PartySettings {
        *self.shared.settings.lock()
    }

    pub fn chat_events(&self) -> Vec<ChatEvent> {
        self.shared.chat.lock().events()
    }

    pub fn sync_state(&self) -> Option<SyncState> {
        self.reconciler.authoritative()
    }

    /// Publish a local `timeupdate` for progress display. Never fed back
    /// into the authoritative state.
    pub fn note_local_position(&self, seconds: f64) {
        self.reconciler.note_local_position(seconds);
    }

    pub fn local_position(&self) -> f64 {
        self.reconciler.local_position()
    }

    /// Leave the party. Idempotent; also invoked on drop.
    pub fn close(&self) {
        self.session.close();
        self.resync_task.abort();
    }
}

impl Drop for PartyRoom {
    fn drop(&mut self) {
        self.close();
    }
}

/// Route one decoded frame. Runs inline on the session reader task, so the
/// log and roster observe strict local arrival order.
fn route_frame(shared: &PartyShared, reconciler: &PlaybackReconciler, frame: Frame) {
    match frame {
        Frame::SyncState { sync_state } => reconciler.apply(sync_state),
        Frame::ParticipantJoined { participant } => {
            let id = participant.id;
            let name = participant.name.clone();
            let inserted = shared.roster.lock().apply_join(participant);
            if inserted {
                shared
                    .chat
                    .lock()
                    .append_system(id, format!("{name} joined the party"));
            }
        }
        Frame::ParticipantLeft { participant_id } => {
            let removed = shared.roster.lock().apply_leave(participant_id);
            if let Some(participant) = removed {
                shared
                    .chat
                    .lock()
                    .append_system(participant_id, format!("{} left the party", participant.name));
            }
        }
        Frame::ChatMessage { message } => shared.chat.lock().append(message),
        Frame::Reaction {
            reaction,
            participant_id,
        } => {
            if !shared.roster.lock().apply_reaction(participant_id, reaction) {
                debug!(%participant_id, "reaction from unknown participant");
            }
        }
        Frame::KickParticipant { .. } | Frame::VideoControl { .. } => {
            debug!("ignoring client-bound frame arriving inbound");
        }
    }
}

/// Watch the connection; whenever the channel comes back after a loss,
/// rebuild party state from a fresh snapshot.
async fn resync_loop(
    mut conn_rx: watch::Receiver<ConnectionState>,
    http: reqwest::Client,
    config: ClientConfig,
    party_id: String,
    token: String,
    shared: Arc<PartyShared>,
    reconciler: Arc<PlaybackReconciler>,
) {
    let mut connects_seen: u32 = 0;
    let mut last = ConnectionState::Disconnected;
    loop {
        if conn_rx.changed().await.is_err() {
            return;
        }
        let state = *conn_rx.borrow_and_update();
        if state == ConnectionState::Connected && last != ConnectionState::Connected {
            connects_seen += 1;
            // join() already seeded state for the first connect.
            if connects_seen > 1 {
                resync(&http, &config, &party_id, &token, &shared, &reconciler).await;
            }
        }
        if state == ConnectionState::Disconnected {
            return;
        }
        last = state;
    }
}

async fn resync(
    http: &reqwest::Client,
    config: &ClientConfig,
    party_id: &str,
    token: &str,
    shared: &PartyShared,
    reconciler: &PlaybackReconciler,
) {
    loop {
        match fetch_party_snapshot(http, config, party_id, token).await {
            Ok((snapshot, _)) => {
                shared.roster.lock().seed(snapshot.participants);
                shared.chat.lock().clear();
                *shared.settings.lock() = snapshot.settings;
                reconciler.apply(snapshot.sync_state);
                info!("party state rebuilt after reconnect");
                return;
            }
            Err(e) => {
                warn!("post-reconnect snapshot failed, retrying: {e}");
                sleep(config.reconnect_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SimulatedPlayer;
    use crate::protocol::{ChatEventKind, ReactionCounters};

    fn shared_with(local_id: Uuid) -> PartyShared {
        PartyShared {
            local_id,
            settings: Mutex::new(PartySettings::default()),
            roster: Mutex::new(Roster::new()),
            chat: Mutex::new(ChatLog::new()),
        }
    }

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
    fn join_and_leave_frames_write_roster_and_system_chat() {
        let shared = shared_with(Uuid::new_v4());
        let reconciler = PlaybackReconciler::new(Arc::new(SimulatedPlayer::new()));
        let id = Uuid::new_v4();

        route_frame(
            &shared,
            &reconciler,
            Frame::ParticipantJoined {
                participant: participant(id, "Ada", Role::Participant),
            },
        );
        // A duplicate join neither duplicates the entry nor the notice.
        route_frame(
            &shared,
            &reconciler,
            Frame::ParticipantJoined {
                participant: participant(id, "Ada", Role::Participant),
            },
        );
        route_frame(
            &shared,
            &reconciler,
            Frame::ParticipantLeft { participant_id: id },
        );

        assert!(shared.roster.lock().is_empty());
        let chat = shared.chat.lock().events();
        assert_eq!(chat.len(), 2);
        assert!(chat.iter().all(|e| e.kind == ChatEventKind::System));
        assert!(chat[0].body.contains("joined"));
        assert!(chat[1].body.contains("left"));
    }

    #[test]
    fn sync_state_frames_reach_the_reconciler() {
        let shared = shared_with(Uuid::new_v4());
        let player = Arc::new(SimulatedPlayer::new());
        let reconciler = PlaybackReconciler::new(player.clone());

        route_frame(
            &shared,
            &reconciler,
            Frame::SyncState {
                sync_state: SyncState {
                    is_playing: true,
                    current_time: 77.0,
                    playback_rate: 1.0,
                    last_update: 0,
                },
            },
        );
        assert!(!player.is_paused().unwrap());
        assert!((player.position().unwrap() - 77.0).abs() < 0.1);
    }

    #[test]
    fn inbound_reaction_bumps_counters_only() {
        let id = Uuid::new_v4();
        let shared = shared_with(id);
        shared
            .roster
            .lock()
            .apply_join(participant(id, "Ada", Role::Participant));
        let reconciler = PlaybackReconciler::new(Arc::new(SimulatedPlayer::new()));

        route_frame(
            &shared,
            &reconciler,
            Frame::Reaction {
                reaction: ReactionKind::Like,
                participant_id: id,
            },
        );

        assert_eq!(shared.roster.lock().get(id).unwrap().reaction_counters.likes, 1);
        assert!(shared.chat.lock().is_empty());
    }

    #[test]
    fn outbound_only_frames_are_ignored_inbound() {
        let shared = shared_with(Uuid::new_v4());
        let player = Arc::new(SimulatedPlayer::new());
        let reconciler = PlaybackReconciler::new(player.clone());

        route_frame(
            &shared,
            &reconciler,
            Frame::VideoControl {
                action: crate::protocol::ControlAction::Seek,
                value: Some(500.0),
            },
        );
        assert_eq!(player.position().unwrap(), 0.0);
    }
}
