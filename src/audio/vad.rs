//! Energy-based voice activity detection.
//!
//! Each captured frame is reduced to an RMS value; the detector smooths the
//! last few values and compares the mean against a silence threshold. From
//! that boolean it derives the session signals: wake on speech while
//! sleeping, sleep after sustained initial silence, and auto-commit after
//! trailing silence once speech has been heard.

use crate::defaults;
use crate::session::SessionState;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Clock abstraction so detector timing is testable without real sleeps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock implementation used in production.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Detector tuning parameters.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Smoothed-RMS value at or above which a frame counts as speech.
    pub silence_threshold: f32,
    /// Number of recent frames averaged into the smoothed energy.
    pub energy_window: usize,
    /// Silence before an episode with no speech goes to sleep (ms).
    pub wake_timeout_ms: u32,
    /// Trailing silence after speech before an automatic commit (ms, 0 disables).
    pub auto_commit_delay_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_threshold: defaults::SILENCE_THRESHOLD,
            energy_window: defaults::ENERGY_WINDOW,
            wake_timeout_ms: defaults::WAKE_TIMEOUT_MS,
            auto_commit_delay_ms: defaults::AUTO_COMMIT_DELAY_MS,
        }
    }
}

/// Session-level action requested by the detector for one observed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadSignal {
    /// Nothing to do.
    None,
    /// Speech while sleeping, resume the active send cadence.
    Wake,
    /// Sustained silence with no speech this episode, drop to sleep cadence.
    Sleep,
    /// Speech followed by enough trailing silence, commit the utterance.
    AutoCommit,
}

/// What the detector concluded about one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadReport {
    pub signal: VadSignal,
    /// Mean RMS over the energy window.
    pub smoothed: f32,
    /// Raw RMS of this frame.
    pub rms: f32,
    /// Whether the smoothed energy reached the silence threshold.
    pub speech: bool,
}

/// Energy detector. Generic over the clock so tests can drive time manually.
pub struct Vad<C: Clock> {
    config: VadConfig,
    clock: C,
    window: VecDeque<f32>,
    /// Whether any speech has been detected since the last reset or commit.
    speech_seen: bool,
    /// When the detector last saw speech; only meaningful while speech_seen.
    last_speech: Instant,
    /// Start of the current silence-only stretch, for the wake timeout.
    timer_start: Instant,
}

impl<C: Clock> Vad<C> {
    pub fn new(config: VadConfig, clock: C) -> Self {
        let now = clock.now();
        Self {
            config,
            clock,
            window: VecDeque::with_capacity(defaults::ENERGY_WINDOW),
            speech_seen: false,
            last_speech: now,
            timer_start: now,
        }
    }

    /// Feed one frame's RMS and get back the smoothed verdict plus any
    /// session signal. `state` gates which signals are possible: Sleep is
    /// only emitted while actively recording, Wake only while sleeping, and
    /// AutoCommit never while a response is outstanding.
    pub fn observe(&mut self, rms: f32, state: SessionState) -> VadReport {
        let now = self.clock.now();

        if self.window.len() >= self.config.energy_window.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(rms);

        let smoothed = self.window.iter().sum::<f32>() / self.window.len() as f32;
        let speech = smoothed >= self.config.silence_threshold;

        let mut signal = VadSignal::None;

        // A response in flight freezes the silence timer; it resumes
        // counting from the frame Processing exits
        if state == SessionState::Processing {
            self.timer_start = now;
        }

        if speech {
            self.speech_seen = true;
            self.last_speech = now;
            if state == SessionState::RecordingSleeping {
                signal = VadSignal::Wake;
            }
        } else if self.speech_seen {
            let delay = self.config.auto_commit_delay_ms;
            if delay > 0
                && matches!(
                    state,
                    SessionState::RecordingActive | SessionState::RecordingSleeping
                )
                && now.duration_since(self.last_speech).as_millis() >= delay as u128
            {
                signal = VadSignal::AutoCommit;
                // One commit per utterance; the next one needs fresh speech.
                self.speech_seen = false;
                self.timer_start = now;
            }
        } else if state == SessionState::RecordingActive
            && now.duration_since(self.timer_start).as_millis() >= self.config.wake_timeout_ms as u128
        {
            signal = VadSignal::Sleep;
        }

        VadReport {
            signal,
            smoothed,
            rms,
            speech,
        }
    }

    /// Whether speech has been heard since the last reset or commit.
    pub fn speech_seen(&self) -> bool {
        self.speech_seen
    }

    /// Forget heard speech and restart the silence timer. Called after a
    /// manual commit or a buffer clear so the next utterance starts clean.
    /// The energy window is drained too, so smoothing over audio that was
    /// just committed cannot re-arm the flag.
    pub fn clear_speech_seen(&mut self) {
        self.window.clear();
        self.speech_seen = false;
        self.timer_start = self.clock.now();
    }

    /// Full reset for the start of a new recording session.
    pub fn reset(&mut self) {
        let now = self.clock.now();
        self.window.clear();
        self.speech_seen = false;
        self.last_speech = now;
        self.timer_start = now;
    }
}
