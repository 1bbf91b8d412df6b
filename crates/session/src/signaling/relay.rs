//! WebSocket relay channel
//!
//! Connects to the relay, joins the session topic via query parameters,
//! and runs two background tasks: a writer draining an mpsc queue and a
//! reader dispatching delivered envelopes to the installed handler.

use super::protocol::SignalEnvelope;
use super::{EnvelopeHandler, SignalingChannel};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use paircam_core::{CommandHistorySink, Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Live subscription state.
struct ActiveSubscription {
    session_id: String,
    tx: mpsc::UnboundedSender<Message>,
    reader: tokio::task::JoinHandle<()>,
}

/// WebSocket relay signaling channel.
pub struct RelayChannel {
    relay_url: String,
    command_sink: Option<Arc<dyn CommandHistorySink>>,
    active: Mutex<Option<ActiveSubscription>>,
}

impl RelayChannel {
    /// Create a channel against the given relay URL.
    ///
    /// `command_sink`, when present, receives a copy of every outgoing
    /// `command` envelope keyed by session id.
    pub fn new(relay_url: &str, command_sink: Option<Arc<dyn CommandHistorySink>>) -> Self {
        Self {
            relay_url: relay_url.to_string(),
            command_sink,
            active: Mutex::new(None),
        }
    }

    /// Writer task: drains queued frames into the socket.
    async fn writer_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("relay write failed: {}", e);
                break;
            }
        }
        debug!("relay writer task terminated");
    }

    /// Reader task: parses frames and hands matching envelopes to the
    /// subscriber.
    async fn reader_task(
        mut read: futures::stream::SplitStream<WsStream>,
        local_device_id: String,
        handler: EnvelopeHandler,
    ) {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<SignalEnvelope>(&text) {
                    Ok(envelope) => {
                        if envelope.to_device() == local_device_id {
                            handler(envelope);
                        } else {
                            debug!(
                                "dropping envelope addressed to {}",
                                envelope.to_device()
                            );
                        }
                    }
                    Err(e) => warn!("undecodable relay frame: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("relay closed the connection");
                    break;
                }
                Err(e) => {
                    error!("relay read failed: {}", e);
                    break;
                }
                _ => {}
            }
        }
        debug!("relay reader task terminated");
    }
}

#[async_trait]
impl SignalingChannel for RelayChannel {
    async fn subscribe(
        &self,
        session_id: &str,
        local_device_id: &str,
        handler: EnvelopeHandler,
    ) -> Result<()> {
        // Replace any existing subscription first.
        self.unsubscribe().await;

        let mut url = url::Url::parse(&self.relay_url)
            .map_err(|e| Error::Signaling(format!("bad relay url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("session", session_id)
            .append_pair("device", local_device_id);
        info!("subscribing to relay topic for session {}", session_id);

        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Signaling(format!("relay connect failed: {}", e)))?;

        let (write, read) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::writer_task(write, rx));
        let reader = tokio::spawn(Self::reader_task(
            read,
            local_device_id.to_string(),
            handler,
        ));

        *self.active.lock().await = Some(ActiveSubscription {
            session_id: session_id.to_string(),
            tx,
            reader,
        });

        Ok(())
    }

    async fn send(&self, envelope: SignalEnvelope) -> Result<()> {
        let guard = self.active.lock().await;
        let active = guard
            .as_ref()
            .ok_or_else(|| Error::Signaling("not subscribed".to_string()))?;

        // Commands also land in the session's history, best effort.
        if let (Some(sink), Some(record)) = (&self.command_sink, envelope.as_command_record()) {
            if let Err(e) = sink.append(&active.session_id, &record).await {
                warn!("command history append failed: {}", e);
            }
        }

        let json = serde_json::to_string(&envelope)?;
        active
            .tx
            .send(Message::Text(json))
            .map_err(|e| Error::Signaling(format!("relay send failed: {}", e)))
    }

    async fn unsubscribe(&self) {
        let taken = self.active.lock().await.take();
        if let Some(active) = taken {
            debug!(
                "unsubscribing from relay topic for session {}",
                active.session_id
            );
            // Dropping the queue ends the writer; the reader is aborted.
            drop(active.tx);
            active.reader.abort();
        }
    }
}

impl Drop for RelayChannel {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.active.try_lock() {
            if let Some(active) = guard.take() {
                active.reader.abort();
            }
        }
    }
}
