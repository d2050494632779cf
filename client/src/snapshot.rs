use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::protocol::{Participant, SyncState};

/// Response header naming the participant id bound to the caller's token.
pub const PARTICIPANT_HEADER: &str = "x-matinee-participant";

/// One-shot REST view of a party, fetched on room entry and again after
/// every reconnect. Roster and chat are rebuilt from it from scratch; no
/// diffing against stale local copies is attempted.
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
    /// When set, non-host participants may issue play/pause/seek.
    pub allow_participant_controls: bool,
}

/// Fetch the party snapshot plus the local participant id assigned to this
/// token. Any failure is `ClientError::DataLoad`: retryable, surfaced to the
/// caller, and never papered over with placeholder data.
pub async fn fetch_party_snapshot(
    http: &reqwest::Client,
    config: &ClientConfig,
    party_id: &str,
    token: &str,
) -> Result<(PartySnapshot, Uuid), ClientError> {
    let url = config.snapshot_url(party_id)?;
    let response = http
        .get(&url)
        .bearer_auth(token)
        .timeout(config.request_timeout)
        .send()
        .await
        .map_err(|e| ClientError::DataLoad(e.to_string()))?;

    if !response.status().is_success() {
        return Err(ClientError::DataLoad(format!(
            "snapshot request returned {}",
            response.status()
        )));
    }

    let local_id = response
        .headers()
        .get(PARTICIPANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .ok_or_else(|| {
            ClientError::DataLoad("snapshot response missing participant identity".into())
        })?;

    let snapshot: PartySnapshot = response
        .json()
        .await
        .map_err(|e| ClientError::DataLoad(e.to_string()))?;

    Ok((snapshot, local_id))
}
