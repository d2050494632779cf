//! Thin relay for Matinee watch parties: holds the authoritative playback
//! state per party, fans frames out to every connected participant, and
//! serves the one-shot REST snapshot clients fetch on room entry. Used for
//! local development and by the client's end-to-end tests.

pub mod protocol;
pub mod state;

use axum::{
    extract::{
        ws::{Message as AxumWsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use protocol::Frame;
use state::ServerState;

/// Response header naming the participant id bound to the caller's token.
pub const PARTICIPANT_HEADER: &str = "x-matinee-participant";

enum Outbound {
    Frame(Frame),
    Shutdown,
}

type ClientSender = mpsc::UnboundedSender<Outbound>;
type ClientSenders = Arc<RwLock<HashMap<Uuid, ClientSender>>>;

#[derive(Clone)]
pub struct AppState {
    pub server_state: ServerState,
    client_senders: ClientSenders,
}

impl AppState {
    pub fn new(server_state: ServerState) -> Self {
        Self {
            server_state,
            client_senders: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/api/parties/:party_id", get(party_snapshot))
        .route("/ws", get(ws_endpoint))
        .with_state(app_state)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn party_snapshot(
    Path(party_id): Path<String>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(token) = bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, "missing bearer token").into_response();
    };
    let (snapshot, participant_id) = state.server_state.snapshot(&party_id, &token);
    (
        [(PARTICIPANT_HEADER, participant_id.to_string())],
        Json(snapshot),
    )
        .into_response()
}

async fn ws_endpoint(
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let party_id = params.get("party").cloned().unwrap_or_default();
    let token = params.get("token").cloned().unwrap_or_default();
    if party_id.is_empty() || token.is_empty() {
        return (StatusCode::BAD_REQUEST, "party and token are required").into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(socket, state, party_id, token))
        .into_response()
}

async fn handle_connection(socket: WebSocket, state: AppState, party_id: String, token: String) {
    let server_state = state.server_state.clone();
    let (participant_id, participant) = match server_state.attach(&party_id, &token) {
        Ok(attached) => attached,
        Err(e) => {
            tracing::warn!("Rejecting connection to party {}: {}", party_id, e);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    state.client_senders.write().await.insert(participant_id, tx.clone());

    // Spawn task to send frames to this client
    let send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Frame(frame) => {
                    let json = match serde_json::to_string(&frame) {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::error!("Failed to serialize frame: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = ws_sender.send(AxumWsMessage::Text(json)).await {
                        tracing::error!("Failed to send frame: {}", e);
                        break;
                    }
                }
                Outbound::Shutdown => {
                    let _ = ws_sender.send(AxumWsMessage::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Announce the join and align the newcomer immediately.
    broadcast_to_party(&state, &party_id, Frame::ParticipantJoined { participant }).await;
    if let Some(sync_state) = server_state.playback_state(&party_id) {
        let _ = tx.send(Outbound::Frame(Frame::SyncState { sync_state }));
    }

    // Handle incoming frames
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(AxumWsMessage::Text(text)) => {
                if let Err(e) = handle_frame(&text, participant_id, &party_id, &state).await {
                    tracing::warn!("Error handling frame from {}: {}", participant_id, e);
                }
            }
            Ok(AxumWsMessage::Close(_)) => {
                tracing::info!("Participant {} closing connection", participant_id);
                break;
            }
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup
    state.client_senders.write().await.remove(&participant_id);
    if server_state.detach(&party_id, participant_id) {
        broadcast_to_party(&state, &party_id, Frame::ParticipantLeft { participant_id }).await;
    }
    send_task.abort();
}

async fn handle_frame(
    text: &str,
    sender_id: Uuid,
    party_id: &str,
    state: &AppState,
) -> anyhow::Result<()> {
    let frame: Frame = serde_json::from_str(text)?;

    match frame {
        Frame::VideoControl { action, value } => {
            match state
                .server_state
                .apply_control(party_id, sender_id, action, value)
            {
                Ok(sync_state) => {
                    broadcast_to_party(state, party_id, Frame::SyncState { sync_state }).await;
                }
                Err(e) => {
                    tracing::warn!("Rejected control from {}: {}", sender_id, e);
                }
            }
        }

        Frame::ChatMessage { message } => {
            broadcast_to_party(state, party_id, Frame::ChatMessage { message }).await;
        }

        Frame::Reaction { reaction, .. } => {
            // The sender's socket identity wins over whatever id the frame
            // claims.
            state.server_state.apply_reaction(party_id, sender_id, reaction);
            broadcast_to_party(
                state,
                party_id,
                Frame::Reaction {
                    reaction,
                    participant_id: sender_id,
                },
            )
            .await;
        }

        Frame::KickParticipant { participant_id } => {
            match state
                .server_state
                .authorize_kick(party_id, sender_id, participant_id)
            {
                Ok(()) => {
                    state.server_state.detach(party_id, participant_id);
                    broadcast_to_party(state, party_id, Frame::ParticipantLeft { participant_id })
                        .await;
                    let mut senders = state.client_senders.write().await;
                    if let Some(tx) = senders.remove(&participant_id) {
                        let _ = tx.send(Outbound::Shutdown);
                    }
                }
                Err(e) => {
                    tracing::warn!("Rejected kick from {}: {}", sender_id, e);
                }
            }
        }

        other => {
            tracing::warn!("Unexpected frame from client: {:?}", other);
        }
    }

    Ok(())
}

async fn broadcast_to_party(state: &AppState, party_id: &str, frame: Frame) {
    let members = state.server_state.online_members(party_id);
    let senders = state.client_senders.read().await;

    tracing::debug!(
        "Broadcasting {:?} to {} members in party {}",
        frame,
        members.len(),
        party_id
    );

    for member_id in members {
        if let Some(tx) = senders.get(&member_id) {
            let _ = tx.send(Outbound::Frame(frame.clone()));
        }
    }
}

/// Periodically rebroadcast each party's authoritative state. Clients treat
/// sync_state as level-triggered, so repetition is free convergence for
/// anyone who missed a frame.
pub async fn run_sync_ticker(state: AppState, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        for party_id in state.server_state.party_ids() {
            if let Some(sync_state) = state.server_state.playback_state(&party_id) {
                broadcast_to_party(&state, &party_id, Frame::SyncState { sync_state }).await;
            }
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
}
