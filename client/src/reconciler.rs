use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::media::MediaPlayer;
use crate::protocol::SyncState;

/// Maximum tolerated distance between local and authoritative position
/// before a hard seek, in seconds. Corrections below this would read as
/// constant micro-stutter.
pub const DRIFT_THRESHOLD_SECS: f64 = 1.0;

/// Rate differences below this are treated as equal.
const RATE_EPSILON: f64 = 0.01;

/// Aligns the local media handle to the authoritative `SyncState`. The
/// correction is level-triggered and idempotent: applying the same state any
/// number of times converges to the same local playback, which is what makes
/// the client self-heal after missed messages or a reconnect.
pub struct PlaybackReconciler {
    media: Arc<dyn MediaPlayer>,
    authoritative: Mutex<Option<SyncState>>,
    local_position: Mutex<f64>,
}

impl PlaybackReconciler {
    pub fn new(media: Arc<dyn MediaPlayer>) -> Self {
        Self {
            media,
            authoritative: Mutex::new(None),
            local_position: Mutex::new(0.0),
        }
    }

    /// Apply one inbound `sync_state`. This is the single writer of the
    /// stored authoritative state.
    pub fn apply(&self, state: SyncState) {
        match self.media.position() {
            Ok(local) => {
                let drift = (local - state.current_time).abs();
                if drift > DRIFT_THRESHOLD_SECS {
                    debug!(drift, target = state.current_time, "correcting drift");
                    if let Err(e) = self.media.seek(state.current_time) {
                        warn!("drift correction seek failed: {e}");
                    }
                }
            }
            Err(e) => warn!("local position unavailable, skipping drift check: {e}"),
        }

        match self.media.is_paused() {
            Ok(paused) => {
                if state.is_playing && paused {
                    if let Err(e) = self.media.play() {
                        warn!("failed to resume playback: {e}");
                    }
                } else if !state.is_playing && !paused {
                    if let Err(e) = self.media.pause() {
                        warn!("failed to pause playback: {e}");
                    }
                }
            }
            Err(e) => warn!("pause state unavailable: {e}"),
        }

        match self.media.rate() {
            Ok(rate) if (rate - state.playback_rate).abs() > RATE_EPSILON => {
                if let Err(e) = self.media.set_rate(state.playback_rate) {
                    warn!("failed to adjust playback rate: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => warn!("playback rate unavailable: {e}"),
        }

        *self.authoritative.lock() = Some(state);
    }

    /// Latest authoritative state, for readers (progress bar, status line).
    pub fn authoritative(&self) -> Option<SyncState> {
        *self.authoritative.lock()
    }

    /// Record a local `timeupdate`. Display-only: it never feeds back into
    /// the authoritative state.
    pub fn note_local_position(&self, seconds: f64) {
        *self.local_position.lock() = seconds;
    }

    pub fn local_position(&self) -> f64 {
        *self.local_position.lock()
    }

    // Optimistic updates from the dispatcher. The media handle is owned
    // here, so even latency-hiding writes go through the reconciler; the
    // next authoritative sync_state confirms or overrides them.

    pub(crate) fn optimistic_play(&self) {
        if let Err(e) = self.media.play() {
            warn!("optimistic play failed: {e}");
        }
    }

    pub(crate) fn optimistic_pause(&self) {
        if let Err(e) = self.media.pause() {
            warn!("optimistic pause failed: {e}");
        }
    }

    pub(crate) fn optimistic_seek(&self, seconds: f64) {
        if let Err(e) = self.media.seek(seconds) {
            warn!("optimistic seek failed: {e}");
        }
    }
}
