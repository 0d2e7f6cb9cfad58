use crate::defaults;
use crate::error::{Result, VoicelinkError};

/// Trait for audio capture devices.
///
/// This trait allows swapping implementations (real microphone vs mock).
pub trait CaptureSource: Send + Sync {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Drain the samples captured since the previous read.
    ///
    /// # Returns
    /// Mono f32 samples in [-1.0, 1.0] at the configured rate. An empty
    /// vector means no new audio arrived since the last poll.
    fn read_samples(&mut self) -> Result<Vec<f32>>;

    /// Whether the source produces audio indefinitely (a live device)
    /// as opposed to a finite scripted sequence.
    fn is_live(&self) -> bool;
}

/// Configuration for capture source initialization
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

/// Mock capture source for testing
#[derive(Debug, Clone)]
pub struct MockCaptureSource {
    is_started: bool,
    frames: Vec<Vec<f32>>,
    next_frame: usize,
    repeat_last: bool,
    should_fail_start: bool,
    should_fail_stop: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockCaptureSource {
    /// Create a new mock capture source with default settings
    pub fn new() -> Self {
        Self {
            is_started: false,
            frames: vec![vec![0.0; 160]],
            next_frame: 0,
            repeat_last: true,
            should_fail_start: false,
            should_fail_stop: false,
            should_fail_read: false,
            error_message: "mock capture error".to_string(),
        }
    }

    /// Configure the mock to return the same samples on every read
    pub fn with_samples(mut self, samples: Vec<f32>) -> Self {
        self.frames = vec![samples];
        self.next_frame = 0;
        self.repeat_last = true;
        self
    }

    /// Configure the mock to play a scripted sequence of frames, one per
    /// read, then return empty vectors once exhausted
    pub fn with_frames(mut self, frames: Vec<Vec<f32>>) -> Self {
        self.frames = frames;
        self.next_frame = 0;
        self.repeat_last = false;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on stop
    pub fn with_stop_failure(mut self) -> Self {
        self.should_fail_stop = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the capture source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockCaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for MockCaptureSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(VoicelinkError::AudioCapture {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        if self.should_fail_stop {
            Err(VoicelinkError::AudioCapture {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = false;
            Ok(())
        }
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.should_fail_read {
            return Err(VoicelinkError::AudioCapture {
                message: self.error_message.clone(),
            });
        }

        if self.repeat_last {
            return Ok(self.frames.first().cloned().unwrap_or_default());
        }

        match self.frames.get(self.next_frame) {
            Some(frame) => {
                self.next_frame += 1;
                Ok(frame.clone())
            }
            None => Ok(Vec::new()),
        }
    }

    fn is_live(&self) -> bool {
        false
    }
}
