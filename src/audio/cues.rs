//! Tone generation for audio cues.

use rodio::source::SineWave;
use rodio::{OutputStream, Sink, Source};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Standard tone frequencies for cues.
pub mod frequencies {
    /// Base tone
    pub const MEDIUM: f32 = 329.63; // E4
    /// Accent tone
    pub const HIGH: f32 = 392.00; // G4
}

/// Standard tone durations in milliseconds.
pub mod durations {
    /// Quick tone (100ms)
    pub const QUICK: u64 = 100;
    /// Standard tone (200ms)
    pub const STANDARD: u64 = 200;
}

/// Predefined cue patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CuePattern {
    /// Single beep - general notification
    SingleBeep,
    /// Double beep - rest period over
    DoubleBeep,
}

impl CuePattern {
    /// Get the tone sequence for this pattern.
    pub fn tones(&self) -> Vec<Tone> {
        match self {
            CuePattern::SingleBeep => vec![Tone::new(frequencies::MEDIUM, durations::STANDARD)],

            CuePattern::DoubleBeep => vec![
                Tone::new(frequencies::HIGH, durations::QUICK),
                Tone::pause(50),
                Tone::new(frequencies::HIGH, durations::QUICK),
            ],
        }
    }

    /// Get total duration of the pattern in milliseconds.
    pub fn total_duration_ms(&self) -> u64 {
        self.tones().iter().map(|t| t.duration_ms).sum()
    }
}

/// A single tone with frequency and duration.
#[derive(Debug, Clone, Copy)]
pub struct Tone {
    /// Frequency in Hz (0 for silence/pause)
    pub frequency_hz: f32,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl Tone {
    /// Create a new tone.
    pub fn new(frequency_hz: f32, duration_ms: u64) -> Self {
        Self {
            frequency_hz,
            duration_ms,
        }
    }

    /// Create a pause (silence).
    pub fn pause(duration_ms: u64) -> Self {
        Self {
            frequency_hz: 0.0,
            duration_ms,
        }
    }

    /// Check if this is a pause.
    pub fn is_pause(&self) -> bool {
        self.frequency_hz <= 0.0
    }
}

/// Tone generator using rodio.
pub struct ToneGenerator {
    /// Volume level (0.0 - 1.0)
    volume: Arc<Mutex<f32>>,
    /// Whether the generator is enabled
    enabled: Arc<Mutex<bool>>,
}

impl Default for ToneGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToneGenerator {
    /// Create a new tone generator.
    pub fn new() -> Self {
        Self {
            volume: Arc::new(Mutex::new(0.8)),
            enabled: Arc::new(Mutex::new(true)),
        }
    }

    /// Set the volume level (0.0 - 1.0).
    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock().unwrap() = volume.clamp(0.0, 1.0);
    }

    /// Get the current volume level.
    pub fn get_volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    /// Enable or disable the generator.
    pub fn set_enabled(&self, enabled: bool) {
        *self.enabled.lock().unwrap() = enabled;
    }

    /// Check if enabled.
    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock().unwrap()
    }

    /// Play a single tone, blocking until it finishes.
    pub fn play_tone(&self, frequency_hz: f32, duration_ms: u64) -> Result<(), ToneError> {
        if !self.is_enabled() {
            return Ok(());
        }

        if frequency_hz <= 0.0 {
            // This is a pause, just sleep
            std::thread::sleep(Duration::from_millis(duration_ms));
            return Ok(());
        }

        let (_stream, stream_handle) =
            OutputStream::try_default().map_err(|e| ToneError::DeviceError(e.to_string()))?;

        let sink =
            Sink::try_new(&stream_handle).map_err(|e| ToneError::PlaybackError(e.to_string()))?;

        let source = SineWave::new(frequency_hz)
            .take_duration(Duration::from_millis(duration_ms))
            .amplify(self.get_volume());

        sink.append(source);
        sink.sleep_until_end();

        Ok(())
    }

    /// Play a cue pattern, blocking until it finishes.
    pub fn play_pattern(&self, pattern: CuePattern) -> Result<(), ToneError> {
        for tone in pattern.tones() {
            self.play_tone(tone.frequency_hz, tone.duration_ms)?;
        }
        Ok(())
    }

    /// Play a cue pattern on a background thread.
    ///
    /// Device errors are logged and swallowed; cues are cosmetic.
    pub fn play_pattern_detached(&self, pattern: CuePattern) {
        if !self.is_enabled() {
            return;
        }

        let generator = self.clone_handle();
        std::thread::spawn(move || {
            if let Err(e) = generator.play_pattern(pattern) {
                tracing::debug!("Audio cue failed: {}", e);
            }
        });
    }

    fn clone_handle(&self) -> Self {
        Self {
            volume: Arc::clone(&self.volume),
            enabled: Arc::clone(&self.enabled),
        }
    }
}

/// Errors from tone playback.
#[derive(Debug, Error)]
pub enum ToneError {
    /// No audio output device available
    #[error("Audio device error: {0}")]
    DeviceError(String),

    /// Playback failed
    #[error("Playback error: {0}")]
    PlaybackError(String),
}
