//! Microphone capture and voice activity detection.

pub mod capture;
pub mod frame;
pub mod source;
pub mod vad;
