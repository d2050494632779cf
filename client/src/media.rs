use parking_lot::Mutex;
use std::time::Instant;

use crate::error::ClientError;

/// Handle to the local playback surface. The reconciler owns the only
/// instance for a party; everything it needs from a real player backend
/// (libVLC, mpv, a browser `<video>` bridge) goes through this seam.
pub trait MediaPlayer: Send + Sync {
    fn play(&self) -> Result<(), ClientError>;
    fn pause(&self) -> Result<(), ClientError>;
    /// Hard-seek to a position in seconds.
    fn seek(&self, seconds: f64) -> Result<(), ClientError>;
    /// Current playback position in seconds.
    fn position(&self) -> Result<f64, ClientError>;
    fn is_paused(&self) -> Result<bool, ClientError>;
    fn rate(&self) -> Result<f64, ClientError>;
    fn set_rate(&self, rate: f64) -> Result<(), ClientError>;
}

/// Clock-driven player used by the CLI and by tests: while playing, the
/// position advances with wall time scaled by the rate.
pub struct SimulatedPlayer {
    state: Mutex<SimState>,
}

struct SimState {
    /// Position at the last anchor point, seconds.
    origin: f64,
    anchor: Instant,
    playing: bool,
    rate: f64,
}

impl SimulatedPlayer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                origin: 0.0,
                anchor: Instant::now(),
                playing: false,
                rate: 1.0,
            }),
        }
    }
}

impl Default for SimulatedPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimState {
    fn current(&self) -> f64 {
        if self.playing {
            self.origin + self.anchor.elapsed().as_secs_f64() * self.rate
        } else {
            self.origin
        }
    }

    fn reanchor(&mut self) {
        self.origin = self.current();
        self.anchor = Instant::now();
    }
}

impl MediaPlayer for SimulatedPlayer {
    fn play(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        state.reanchor();
        state.playing = true;
        Ok(())
    }

    fn pause(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        state.reanchor();
        state.playing = false;
        Ok(())
    }

    fn seek(&self, seconds: f64) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        state.origin = seconds.max(0.0);
        state.anchor = Instant::now();
        Ok(())
    }

    fn position(&self) -> Result<f64, ClientError> {
        Ok(self.state.lock().current())
    }

    fn is_paused(&self) -> Result<bool, ClientError> {
        Ok(!self.state.lock().playing)
    }

    fn rate(&self) -> Result<f64, ClientError> {
        Ok(self.state.lock().rate)
    }

    fn set_rate(&self, rate: f64) -> Result<(), ClientError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ClientError::Media(format!("invalid rate {rate}")));
        }
        let mut state = self.state.lock();
        state.reanchor();
        state.rate = rate;
        Ok(())
    }
}
