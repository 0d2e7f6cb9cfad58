//! Duplex JSON-over-WebSocket protocol with the transcription service.

pub mod client;
pub mod messages;
