use thiserror::Error;

/// Errors surfaced by the sync client.
///
/// None of these are fatal to the viewing session: connection failures feed
/// the reconnect loop, protocol failures are logged and dropped at the decode
/// boundary, and permission failures are rejected before any network call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The duplex channel could not be opened or dropped mid-session.
    #[error("connection error: {0}")]
    Connection(String),

    /// An inbound frame failed decoding or validation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The local participant is not allowed to issue this command.
    #[error("{0}")]
    Forbidden(String),

    /// The party snapshot could not be fetched. Retryable; callers must not
    /// substitute placeholder data.
    #[error("failed to load party data: {0}")]
    DataLoad(String),

    /// The media playback handle reported a failure.
    #[error("media error: {0}")]
    Media(String),

    /// A supplied URL or room identifier could not be turned into a request.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}
