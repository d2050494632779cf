use crate::error::ClientError;
use crate::protocol::Role;
use crate::snapshot::PartySettings;

/// Permission gate for control and moderation commands. Denials are decided
/// entirely client-side, before any frame is encoded: a denied command costs
/// no round trip and produces no network traffic.
///
/// Control (play/pause/seek) is open to the host always, and to everyone
/// else only when the party allows participant controls.
pub fn authorize_control(local_role: Role, settings: &PartySettings) -> Result<(), ClientError> {
    if local_role == Role::Host || settings.allow_participant_controls {
        Ok(())
    } else {
        Err(ClientError::Forbidden(
            "only the host can control playback in this party".into(),
        ))
    }
}

/// Kick requires host or moderator standing, and the host can never be the
/// target.
pub fn authorize_kick(local_role: Role, target_role: Role) -> Result<(), ClientError> {
    if !matches!(local_role, Role::Host | Role::Moderator) {
        return Err(ClientError::Forbidden(
            "only the host or a moderator can remove participants".into(),
        ));
    }
    if target_role == Role::Host {
        return Err(ClientError::Forbidden("the host cannot be removed".into()));
    }
    Ok(())
}
