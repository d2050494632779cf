use std::sync::Arc;
use uuid::Uuid;

use crate::chat::unix_millis;
use crate::error::ClientError;
use crate::guard::{authorize_control, authorize_kick};
use crate::party::PartyShared;
use crate::protocol::{
    ChatEvent, ChatEventKind, Command, ControlAction, Frame,
};
use crate::reconciler::PlaybackReconciler;
use crate::session::SessionManager;

/// Turns user intent into guarded outbound frames.
///
/// Playback-control commands additionally apply an optimistic local update
/// before the frame leaves, hiding perceived latency; the next authoritative
/// sync_state confirms or overrides it through the reconciler. Denied
/// commands never reach the encoder, so no round trip is spent on them.
pub struct CommandDispatcher {
    shared: Arc<PartyShared>,
    session: Arc<SessionManager>,
    reconciler: Arc<PlaybackReconciler>,
}

impl CommandDispatcher {
    pub(crate) fn new(
        shared: Arc<PartyShared>,
        session: Arc<SessionManager>,
        reconciler: Arc<PlaybackReconciler>,
    ) -> Self {
        Self {
            shared,
            session,
            reconciler,
        }
    }

    pub fn dispatch(&self, command: Command) -> Result<(), ClientError> {
        let frame = self.prepare(command)?;
        self.session.send(&frame)
    }

    fn prepare(&self, command: Command) -> Result<Frame, ClientError> {
        match command {
            Command::Play => {
                self.authorize_control()?;
                self.reconciler.optimistic_play();
                Ok(Frame::VideoControl {
                    action: ControlAction::Play,
                    value: None,
                })
            }
            Command::Pause => {
                self.authorize_control()?;
                self.reconciler.optimistic_pause();
                Ok(Frame::VideoControl {
                    action: ControlAction::Pause,
                    value: None,
                })
            }
            Command::Seek { seconds } => {
                self.authorize_control()?;
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(ClientError::Protocol(format!(
                        "seek target out of range: {seconds}"
                    )));
                }
                self.reconciler.optimistic_seek(seconds);
                Ok(Frame::VideoControl {
                    action: ControlAction::Seek,
                    value: Some(seconds),
                })
            }
            Command::Chat { body } => {
                let body = body.trim().to_string();
                if body.is_empty() {
                    return Err(ClientError::Protocol("empty chat body".into()));
                }
                Ok(Frame::ChatMessage {
                    message: ChatEvent {
                        id: Uuid::new_v4(),
                        author: self.shared.local_id,
                        body,
                        timestamp: unix_millis(),
                        kind: ChatEventKind::Message,
                    },
                })
            }
            Command::React { reaction } => Ok(Frame::Reaction {
                reaction,
                participant_id: self.shared.local_id,
            }),
            Command::Kick { participant_id } => {
                let target_role = self
                    .shared
                    .roster
                    .lock()
                    .get(participant_id)
                    .map(|p| p.role)
                    .ok_or_else(|| {
                        ClientError::Forbidden("participant is not in the party".into())
                    })?;
                authorize_kick(self.shared.local_role(), target_role)?;
                Ok(Frame::KickParticipant { participant_id })
            }
        }
    }

    fn authorize_control(&self) -> Result<(), ClientError> {
        let settings = *self.shared.settings.lock();
        authorize_control(self.shared.local_role(), &settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::media::{MediaPlayer, SimulatedPlayer};
    use crate::protocol::{Participant, ReactionCounters, ReactionKind, Role};
    use crate::snapshot::PartySettings;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Fixture {
        dispatcher: CommandDispatcher,
        session: Arc<SessionManager>,
        player: Arc<SimulatedPlayer>,
        guest_id: Uuid,
        host_id: Uuid,
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

    /// Session pointed at a closed port: every send is a connectionless
    /// no-op, so `messages_out` counts frames that actually left the guard.
    async fn fixture(local_role: Role, allow_participant_controls: bool) -> Fixture {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let config = ClientConfig::new(format!("http://{addr}"))
            .with_reconnect_delay(Duration::from_secs(60));

        let local_id = Uuid::new_v4();
        let host_id = if local_role == Role::Host {
            local_id
        } else {
            Uuid::new_v4()
        };
        let guest_id = Uuid::new_v4();

        let shared = Arc::new(PartyShared {
            local_id,
            settings: Mutex::new(PartySettings {
                allow_participant_controls,
            }),
            roster: Mutex::new(Default::default()),
            chat: Mutex::new(Default::default()),
        });
        {
            let mut roster = shared.roster.lock();
            roster.apply_join(participant(local_id, "Local", local_role));
            if host_id != local_id {
                roster.apply_join(participant(host_id, "Host", Role::Host));
            }
            roster.apply_join(participant(guest_id, "Guest", Role::Participant));
        }

        let session =
            Arc::new(SessionManager::connect(&config, "412-877", "token", |_| {}).unwrap());
        let player = Arc::new(SimulatedPlayer::new());
        let reconciler = Arc::new(PlaybackReconciler::new(player.clone()));
        let dispatcher =
            CommandDispatcher::new(shared, Arc::clone(&session), reconciler);

        Fixture {
            dispatcher,
            session,
            player,
            guest_id,
            host_id,
        }
    }

    #[tokio::test]
    async fn denied_control_produces_no_frame_and_no_local_change() {
        let fx = fixture(Role::Participant, false).await;

        for command in [
            Command::Play,
            Command::Pause,
            Command::Seek { seconds: 45.0 },
        ] {
            let err = fx.dispatcher.dispatch(command).unwrap_err();
            assert!(matches!(err, ClientError::Forbidden(_)));
        }

        assert_eq!(fx.session.stats_snapshot().messages_out, 0);
        assert!(fx.player.is_paused().unwrap());
        assert_eq!(fx.player.position().unwrap(), 0.0);
        fx.session.close();
    }

    #[tokio::test]
    async fn participant_may_control_an_open_party() {
        let fx = fixture(Role::Participant, true).await;
        fx.dispatcher.dispatch(Command::Play).unwrap();
        assert!(!fx.player.is_paused().unwrap());
        fx.session.close();
    }

    #[tokio::test]
    async fn host_seek_applies_optimistically() {
        let fx = fixture(Role::Host, false).await;
        fx.dispatcher
            .dispatch(Command::Seek { seconds: 120.0 })
            .unwrap();
        assert!((fx.player.position().unwrap() - 120.0).abs() < 0.05);
        fx.session.close();
    }

    #[tokio::test]
    async fn kick_rules_are_enforced_before_send() {
        let fx = fixture(Role::Host, false).await;
        fx.dispatcher
            .dispatch(Command::Kick {
                participant_id: fx.guest_id,
            })
            .unwrap();

        let err = fx
            .dispatcher
            .dispatch(Command::Kick {
                participant_id: fx.host_id,
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::Forbidden(_)));

        let err = fx
            .dispatcher
            .dispatch(Command::Kick {
                participant_id: Uuid::new_v4(),
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::Forbidden(_)));
        fx.session.close();
    }

    #[tokio::test]
    async fn plain_participant_cannot_kick() {
        let fx = fixture(Role::Participant, true).await;
        let err = fx
            .dispatcher
            .dispatch(Command::Kick {
                participant_id: fx.guest_id,
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::Forbidden(_)));
        fx.session.close();
    }

    #[tokio::test]
    async fn blank_chat_is_rejected() {
        let fx = fixture(Role::Participant, true).await;
        let err = fx
            .dispatcher
            .dispatch(Command::Chat {
                body: "   ".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
        fx.session.close();
    }

    #[tokio::test]
    async fn reactions_are_open_to_everyone() {
        let fx = fixture(Role::Participant, false).await;
        fx.dispatcher
            .dispatch(Command::React {
                reaction: ReactionKind::Heart,
            })
            .unwrap();
        fx.session.close();
    }
}
