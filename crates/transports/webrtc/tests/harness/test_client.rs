//! WebSocket signaling client for gateway E2E testing

use super::{HarnessError, HarnessResult, RECV_TIMEOUT};
use futures_util::{SinkExt, StreamExt};
use mediasink_webrtc::signaling::ServerMessage;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// One signaling client connection
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(url: &str) -> HarnessResult<Self> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| HarnessError::ConnectionError(format!("{}: {}", url, e)))?;
        Ok(Self { ws })
    }

    /// Send one raw text frame
    pub async fn send_text(&mut self, text: &str) -> HarnessResult<()> {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| HarnessError::ClientError(format!("send failed: {}", e)))
    }

    /// Send one raw binary frame
    pub async fn send_binary(&mut self, data: Vec<u8>) -> HarnessResult<()> {
        self.ws
            .send(Message::Binary(data))
            .await
            .map_err(|e| HarnessError::ClientError(format!("send failed: {}", e)))
    }

    pub async fn send_json(&mut self, value: serde_json::Value) -> HarnessResult<()> {
        self.send_text(&value.to_string()).await
    }

    pub async fn send_offer(&mut self, sdp: &str) -> HarnessResult<()> {
        self.send_json(serde_json::json!({ "type": "offer", "sdp": sdp }))
            .await
    }

    pub async fn send_answer(&mut self, sdp: &str) -> HarnessResult<()> {
        self.send_json(serde_json::json!({ "type": "answer", "sdp": sdp }))
            .await
    }

    pub async fn send_candidate(&mut self, candidate: &str) -> HarnessResult<()> {
        self.send_json(serde_json::json!({
            "type": "candidate",
            "candidate": candidate,
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        }))
        .await
    }

    pub async fn start_recording(&mut self) -> HarnessResult<()> {
        self.send_json(serde_json::json!({ "type": "start-recording" }))
            .await
    }

    pub async fn stop_recording(&mut self) -> HarnessResult<()> {
        self.send_json(serde_json::json!({ "type": "stop-recording" }))
            .await
    }

    /// Next text frame, as received
    pub async fn recv_text(&mut self) -> HarnessResult<String> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.ws.next())
                .await
                .map_err(|_| HarnessError::Timeout("no message received".to_string()))?;
            match frame {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Close(_))) | None => {
                    return Err(HarnessError::ConnectionError(
                        "connection closed".to_string(),
                    ))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(HarnessError::ConnectionError(e.to_string())),
            }
        }
    }

    /// Next text frame parsed as JSON
    pub async fn recv_json(&mut self) -> HarnessResult<serde_json::Value> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text)
            .map_err(|e| HarnessError::ValidationError(format!("not JSON: {} ({})", text, e)))
    }

    /// Next server message
    pub async fn recv(&mut self) -> HarnessResult<ServerMessage> {
        let text = self.recv_text().await?;
        ServerMessage::from_json(&text)
            .map_err(|e| HarnessError::ValidationError(format!("{} ({})", text, e)))
    }

    /// Fail if any text frame arrives within `window`
    pub async fn expect_silence(&mut self, window: Duration) -> HarnessResult<()> {
        match tokio::time::timeout(window, self.ws.next()).await {
            Err(_) => Ok(()),
            Ok(Some(Ok(Message::Text(text)))) => Err(HarnessError::ValidationError(format!(
                "unexpected message: {}",
                text
            ))),
            Ok(_) => Ok(()),
        }
    }

    /// Wait until the server closes the connection
    pub async fn wait_closed(&mut self, timeout: Duration) -> HarnessResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.ws.next()).await {
                Err(_) => {
                    return Err(HarnessError::Timeout(
                        "connection still open".to_string(),
                    ))
                }
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return Ok(()),
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    /// Close the connection from the client side
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
