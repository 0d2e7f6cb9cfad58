//! Async WebSocket driver for the realtime transcription protocol.
//!
//! One task owns the socket. Outbound events arrive over an unbounded
//! channel from the engine; inbound frames are parsed and folded into the
//! shared session state. The driver never reconnects on its own, a dropped
//! connection surfaces as a `Disconnected` event and the session ends.

use crate::engine::EngineEvent;
use crate::error::{Result, VoicelinkError};
use crate::protocol::messages::{ClientEvent, RemoteSession, ServerEvent};
use crate::session::{SessionState, SharedState};
use crate::stats::Telemetry;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// State shared between the engine and the protocol driver.
#[derive(Clone)]
pub struct ProtocolShared {
    pub state: Arc<SharedState>,
    pub stats: Arc<Telemetry>,
    /// Commit timestamp of the response currently awaited, if any.
    pub pending: Arc<Mutex<Option<Instant>>>,
    /// Server-side session identity, held for the connection's lifetime.
    pub session: Arc<Mutex<Option<RemoteSession>>>,
    /// Set by the engine when it tears the connection down itself. A stale
    /// driver must not touch session state that a newer connection owns.
    pub shutdown: Arc<AtomicBool>,
    pub events: broadcast::Sender<EngineEvent>,
}

/// Handle to a live connection. Dropping the last clone closes the socket.
#[derive(Clone)]
pub struct ClientHandle {
    outbound: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientHandle {
    /// Queue an event for transmission. Fails once the driver has exited.
    pub fn send(&self, event: ClientEvent) -> Result<()> {
        self.outbound
            .send(event)
            .map_err(|_| VoicelinkError::Transport {
                message: "connection closed".to_string(),
            })
    }
}

/// Connect to the server and spawn the driver task.
///
/// Transitions the session to Connected once the socket is up. The
/// session.created handshake is handled asynchronously by the driver and
/// surfaces as a `SessionReady` event.
pub async fn connect(url: &str, shared: ProtocolShared) -> Result<ClientHandle> {
    let (ws_stream, _response) =
        connect_async(url)
            .await
            .map_err(|e| VoicelinkError::Transport {
                message: format!("failed to connect to {}: {}", url, e),
            })?;

    shared.state.set(SessionState::Connected);
    debug!(url, "websocket connected");

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(drive(ws_stream, outbound_rx, shared));

    Ok(ClientHandle {
        outbound: outbound_tx,
    })
}

async fn drive(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    shared: ProtocolShared,
) {
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            event = outbound.recv() => {
                match event {
                    Some(event) => {
                        let json = match event.to_json() {
                            Ok(json) => json,
                            Err(e) => {
                                warn!("failed to serialize outbound event: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(json)).await {
                            warn!("websocket send failed: {}", e);
                            break;
                        }
                    }
                    // Engine dropped its handle, close cleanly
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_server_text(&text, &shared);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("websocket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {} // binary/pong frames are not part of the protocol
                    Some(Err(e)) => {
                        warn!("websocket read failed: {}", e);
                        break;
                    }
                }
            }
        }
    }

    on_disconnect(&shared);
}

fn handle_server_text(text: &str, shared: &ProtocolShared) {
    let event = match ServerEvent::from_json(text) {
        Ok(event) => event,
        Err(e) => {
            warn!("unparseable server event: {}", e);
            return;
        }
    };

    match event {
        ServerEvent::SessionCreated { session } => {
            debug!(session_id = %session.id, "session created");
            if let Ok(mut held) = shared.session.lock() {
                *held = Some(session.clone());
            }
            let _ = shared.events.send(EngineEvent::SessionReady { session });
        }
        ServerEvent::SessionUpdated { session } => {
            debug!(session_id = %session.id, "session updated");
            if let Ok(mut held) = shared.session.lock() {
                *held = Some(session);
            }
        }
        ServerEvent::Committed => {
            debug!("server acknowledged commit");
            // Normally we entered Processing when the commit went out, but a
            // server-initiated commit confirmation still gates transmission
            if shared.state.enter_processing() {
                let _ = shared.events.send(EngineEvent::StateChanged {
                    state: SessionState::Processing,
                });
            }
        }
        ServerEvent::ResponseCreated => {
            debug!("transcription started");
        }
        ServerEvent::ResponseDone { response } => {
            let latency = shared
                .pending
                .lock()
                .ok()
                .and_then(|mut pending| pending.take())
                .map(|sent_at| sent_at.elapsed());
            if let Some(latency) = latency {
                shared.stats.record_latency(latency);
            }

            // Resume recording unless the user stopped while we waited.
            // A late response still delivers its transcript either way.
            let resumed = shared
                .state
                .transition(SessionState::Processing, SessionState::RecordingActive);
            if !resumed {
                debug!("response arrived outside processing state");
            }

            match response.transcript() {
                Some(text) => {
                    let _ = shared.events.send(EngineEvent::Transcript {
                        text: text.to_string(),
                        latency_ms: latency.map(|l| l.as_millis() as u64),
                    });
                }
                None => {
                    debug!(status = ?response.status, "response without transcript");
                }
            }
            if resumed {
                let _ = shared.events.send(EngineEvent::StateChanged {
                    state: SessionState::RecordingActive,
                });
            }
        }
        ServerEvent::Error { error } => {
            warn!(code = ?error.code, "server error: {}", error.message);
            // A failed transcription will never produce a response, so
            // drop the pending marker and resume recording.
            if let Ok(mut pending) = shared.pending.lock() {
                pending.take();
            }
            let resumed = shared
                .state
                .transition(SessionState::Processing, SessionState::RecordingActive);
            let _ = shared.events.send(EngineEvent::RemoteError {
                message: error.message,
            });
            if resumed {
                let _ = shared.events.send(EngineEvent::StateChanged {
                    state: SessionState::RecordingActive,
                });
            }
        }
        ServerEvent::Unknown => {
            warn!("ignoring unknown server event: {}", raw_event_type(text));
        }
    }
}

/// Pull the raw `type` field out of an event we did not recognize, for logging.
fn raw_event_type(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from))
        .unwrap_or_else(|| "<missing type>".to_string())
}

fn on_disconnect(shared: &ProtocolShared) {
    if shared.shutdown.load(Ordering::Relaxed) {
        // Engine-initiated teardown already published the disconnect
        return;
    }
    shared.state.set(SessionState::Disconnected);
    if let Ok(mut pending) = shared.pending.lock() {
        pending.take();
    }
    if let Ok(mut session) = shared.session.lock() {
        session.take();
    }
    let _ = shared.events.send(EngineEvent::Disconnected);
}
