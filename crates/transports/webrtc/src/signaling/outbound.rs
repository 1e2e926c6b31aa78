//! Single-writer outbound path to a client connection
//!
//! Every producer (answers, relayed candidates, acknowledgements, errors)
//! enqueues on one bounded channel; one task owns the socket sink and writes
//! the frames in queue order.

use super::protocol::ServerMessage;
use crate::{Error, Result};
use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error};

/// Enqueues messages for a connection's writer task
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<ServerMessage>,
}

impl Outbound {
    /// Create a queue of the given depth
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(depth);
        (Self { tx }, rx)
    }

    /// Queue a message, waiting for room if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] once the writer has stopped.
    pub async fn send(&self, msg: ServerMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|e| Error::ConnectionClosed(format!("cannot queue {}", e.0.kind())))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Drain `rx` into `sink` until every [`Outbound`] is dropped or a write fails,
/// then close the sink.
pub fn spawn_writer<S>(mut sink: S, mut rx: mpsc::Receiver<ServerMessage>) -> JoinHandle<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match msg.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize {} message: {}", msg.kind(), e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(json)).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
        // dropping rx makes further sends fail fast
        rx.close();
        if let Err(e) = sink.close().await {
            debug!("WebSocket close: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_writer_preserves_queue_order() {
        let (tx, rx) = futures::channel::mpsc::unbounded::<Message>();
        let sink = tx.sink_map_err(|_| tungstenite::Error::ConnectionClosed);
        let (outbound, queue) = Outbound::channel(4);
        let writer = spawn_writer(sink, queue);

        outbound
            .send(ServerMessage::Answer {
                sdp: "v=0".to_string(),
            })
            .await
            .unwrap();
        outbound.send(ServerMessage::RecordingStarted).await.unwrap();
        drop(outbound);
        writer.await.unwrap();

        let frames: Vec<Message> = rx.collect().await;
        assert_eq!(
            frames,
            vec![
                Message::Text(r#"{"type":"answer","sdp":"v=0"}"#.to_string()),
                Message::Text(r#"{"type":"recording-started"}"#.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_send_after_writer_stopped_is_transport_error() {
        let (outbound, queue) = Outbound::channel(1);
        drop(queue);
        let err = outbound
            .send(ServerMessage::RecordingStopped)
            .await
            .unwrap_err();
        assert!(err.is_fatal_to_session());
        assert!(outbound.is_closed());
    }
}
