use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum_tws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use crate::{
    constants::REPLY_CHANNEL_CAPACITY,
    payload::{WsPayload, init_message},
    protocol::{ServerMessage, decode_client_message, encode_server_message},
    state::AppState,
};

const ACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("WebSocket send error: {0}")]
    SendError(String),
    #[error("WebSocket receive error: {0}")]
    ReceiveError(String),
    #[error("Connection timeout after {duration:?}")]
    Timeout { duration: Duration },
    #[error("Connection closed by client")]
    ConnectionClosed,
}

/// Drives one client connection: greets it, answers its requests and
/// forwards every broadcast batch to it.
#[derive(Debug)]
pub struct SocketHandler {
    state: Arc<AppState>,
    client: Uuid,
}

impl SocketHandler {
    pub fn new(state: Arc<AppState>, client: Uuid) -> Self {
        Self { state, client }
    }

    async fn send_init<S>(&self, sink: &mut S) -> Result<(), SocketError>
    where
        S: Sink<Message> + Unpin,
        S::Error: Display,
    {
        let init = encode_server_message(&init_message(&self.state, self.client))
            .map_err(|e| SocketError::SendError(format!("{e:#}")))?;
        sink.send(init)
            .await
            .map_err(|e| SocketError::SendError(format!("Failed to send init message: {e}")))
    }

    #[instrument(skip_all, fields(client = %self.client))]
    pub async fn run<R, S, E>(self, stream: R, mut sink: S)
    where
        R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display + Send,
        E: Display + Send + 'static,
    {
        // Subscribe before greeting so no batch flushed after the init message
        // is missed.
        let channel_rx = self.state.scheduler.subscribe();

        if let Err(e) = self.send_init(&mut sink).await {
            error!("Failed to greet new connection: {}", e);
            return;
        }
        debug!("Sent init message");

        let (reply_tx, reply_rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);

        let forwarder = ChannelReceiver::new(self.client);
        let mut forward_task = tokio::spawn(async move {
            if let Err(e) = forwarder.run(channel_rx, reply_rx, sink).await {
                debug!("Channel receiver stopped: {}", e);
            }
        });

        let reader = RequestReader::new(self.state, self.client);
        let mut read_task = tokio::spawn(async move {
            if let Err(e) = reader.run(stream, reply_tx).await {
                debug!("Request reader stopped: {}", e);
            }
        });

        tokio::select! {
            result = &mut forward_task => {
                match result {
                    Ok(_) => debug!("Channel receiver task completed normally"),
                    Err(e) => error!("Channel receiver task panicked: {}", e),
                }
                read_task.abort();
            }
            result = &mut read_task => {
                match result {
                    Ok(_) => debug!("Request reader task completed normally"),
                    Err(e) => error!("Request reader task panicked: {}", e),
                }
                forward_task.abort();
            }
        }

        info!("WebSocket handler tasks terminated");
    }
}

/// Sole writer of the socket: merges broadcast batches with direct replies.
struct ChannelReceiver {
    client: Uuid,
    message_count: u64,
}

impl ChannelReceiver {
    fn new(client: Uuid) -> Self {
        Self {
            client,
            message_count: 0,
        }
    }

    #[instrument(skip_all, fields(client = %self.client))]
    async fn run<S>(
        mut self,
        mut channel_receiver: broadcast::Receiver<Message>,
        mut replies: mpsc::Receiver<Message>,
        mut socket_sender: S,
    ) -> Result<(), SocketError>
    where
        S: Sink<Message> + Unpin + Send,
        S::Error: Display + Send,
    {
        let mut consecutive_lags = 0;
        const MAX_CONSECUTIVE_LAGS: u32 = 5;

        loop {
            let msg = tokio::select! {
                reply = replies.recv() => match reply {
                    Some(msg) => Some(msg),
                    None => return Err(SocketError::ConnectionClosed),
                },
                batch = channel_receiver.recv() => match batch {
                    Ok(msg) => {
                        consecutive_lags = 0;
                        Some(msg)
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        consecutive_lags += 1;
                        warn!("Client lagging, skipped {} batches", skipped);

                        if consecutive_lags >= MAX_CONSECUTIVE_LAGS {
                            return Err(SocketError::SendError(format!(
                                "Too many consecutive lag events: {}",
                                consecutive_lags
                            )));
                        }
                        None
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcast channel closed, terminating receiver");
                        return Err(SocketError::ConnectionClosed);
                    }
                },
            };
            let Some(msg) = msg else {
                continue;
            };

            self.message_count += 1;
            if let Err(e) = socket_sender.send(msg).await {
                warn!("Failed to send message to client: {}", e);
                return Err(SocketError::SendError(e.to_string()));
            }
            trace!("Sent message #{} to client", self.message_count);
        }
    }
}

/// Reads client requests and answers them through the reply channel.
struct RequestReader {
    state: Arc<AppState>,
    client: Uuid,
    message_count: u64,
}

impl RequestReader {
    fn new(state: Arc<AppState>, client: Uuid) -> Self {
        Self {
            state,
            client,
            message_count: 0,
        }
    }

    #[instrument(skip_all, fields(client = %self.client))]
    async fn run<R, E>(
        mut self,
        mut socket_receiver: R,
        replies: mpsc::Sender<Message>,
    ) -> Result<(), SocketError>
    where
        R: Stream<Item = Result<Message, E>> + Unpin + Send,
        E: Display + Send,
    {
        loop {
            let next = tokio::time::timeout(ACTIVITY_TIMEOUT, socket_receiver.next()).await;
            let msg = match next {
                Err(_) => {
                    warn!("Connection inactive for {:?}, timing out", ACTIVITY_TIMEOUT);
                    return Err(SocketError::Timeout {
                        duration: ACTIVITY_TIMEOUT,
                    });
                }
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(e))) => {
                    error!("WebSocket receive error: {}", e);
                    return Err(SocketError::ReceiveError(e.to_string()));
                }
                Ok(None) => {
                    info!("WebSocket stream ended (client disconnected)");
                    return Err(SocketError::ConnectionClosed);
                }
            };

            self.message_count += 1;
            if !(msg.is_text() || msg.is_binary()) {
                debug!("Received non-text/binary message (ping/pong/close)");
                continue;
            }

            if let Some(reply) = self.handle_message(msg) {
                replies
                    .send(reply)
                    .await
                    .map_err(|_| SocketError::ConnectionClosed)?;
            }
        }
    }

    fn handle_message(&self, msg: Message) -> Option<Message> {
        let data = msg.into_payload();

        let parsed = match decode_client_message(&data[..]) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(
                    "Discarding message #{} ({} bytes): {:#}",
                    self.message_count,
                    data.len(),
                    e
                );
                return None;
            }
        };

        let reply: ServerMessage =
            WsPayload { parsed }.handle_payload(&self.state, self.client)?;
        match encode_server_message(&reply) {
            Ok(msg) => Some(msg),
            Err(e) => {
                error!("Failed to encode reply: {:#}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
    use serde_json::{Value, json};
    use std::convert::Infallible;

    struct TestClient {
        inbound: UnboundedSender<Result<Message, Infallible>>,
        outbound: UnboundedReceiver<Message>,
        identity: String,
    }

    impl TestClient {
        async fn connect(state: &Arc<AppState>) -> Self {
            let (inbound, stream) = unbounded();
            let (sink, outbound) = unbounded();
            let handler = SocketHandler::new(state.clone(), Uuid::new_v4());
            tokio::spawn(handler.run(stream, sink));

            let mut client = Self {
                inbound,
                outbound,
                identity: String::new(),
            };
            let init = client.recv().await;
            assert_eq!(init["kind"], "init");
            client.identity = init["identity"].as_str().unwrap().to_string();
            client
        }

        fn send(&self, value: Value) {
            self.inbound
                .unbounded_send(Ok(Message::text(value.to_string())))
                .unwrap();
        }

        fn send_raw(&self, msg: Message) {
            self.inbound.unbounded_send(Ok(msg)).unwrap();
        }

        async fn recv(&mut self) -> Value {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.outbound.next())
                .await
                .expect("timed out waiting for server message")
                .expect("connection closed");
            serde_json::from_str(msg.as_text().unwrap()).unwrap()
        }
    }

    #[tokio::test]
    async fn init_carries_canvas_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let (inbound, stream) = unbounded::<Result<Message, Infallible>>();
        let (sink, mut outbound) = unbounded();
        tokio::spawn(SocketHandler::new(state, Uuid::new_v4()).run(stream, sink));

        let init: Value =
            serde_json::from_str(outbound.next().await.unwrap().as_text().unwrap()).unwrap();
        assert_eq!(init["kind"], "init");
        assert_eq!(init["canvasWidth"], 32);
        assert_eq!(init["canvasHeight"], 32);
        assert_eq!(init["cooldownMs"], 5000);
        assert_eq!(init["palette"].as_array().unwrap().len(), 16);
        assert_eq!(init["palette"][0], json!([255, 255, 255]));
        drop(inbound);
    }

    #[tokio::test]
    async fn second_draw_within_cooldown_gets_cooldown_notice() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let mut a = TestClient::connect(&state).await;

        a.send(json!({"kind": "drawRequest", "x": 5, "y": 5, "colorIndex": 3}));
        let accepted = a.recv().await;
        assert_eq!(accepted["kind"], "drawAccepted");
        assert!(accepted["nextEligibleAt"].as_i64().unwrap() > 0);

        a.send(json!({"kind": "drawRequest", "x": 6, "y": 6, "colorIndex": 2}));
        let cooldown = a.recv().await;
        assert_eq!(cooldown["kind"], "cooldown");
        let remaining = cooldown["remainingMs"].as_u64().unwrap();
        assert!(remaining > 0 && remaining <= 5000);

        assert_eq!(state.canvas.get(5, 5), Some(3));
        assert_eq!(state.canvas.get(6, 6), Some(0));
    }

    #[tokio::test]
    async fn accepted_draw_reaches_every_client_in_next_batch() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let mut a = TestClient::connect(&state).await;
        let mut b = TestClient::connect(&state).await;
        assert_ne!(a.identity, b.identity);

        a.send(json!({"kind": "drawRequest", "x": 10, "y": 10, "colorIndex": 5}));
        assert_eq!(a.recv().await["kind"], "drawAccepted");
        assert_eq!(state.scheduler.flush(), Some(1));

        let expected = json!({
            "kind": "batchUpdate",
            "updates": [{"x": 10, "y": 10, "colorIndex": 5}],
        });
        assert_eq!(a.recv().await, expected);
        assert_eq!(b.recv().await, expected);
    }

    #[tokio::test]
    async fn malformed_and_unknown_messages_keep_connection_open() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let mut a = TestClient::connect(&state).await;

        a.send_raw(Message::text("{not json".to_string()));
        a.send_raw(Message::binary(vec![0u8, 1, 2]));
        a.send(json!({"kind": "somethingElse", "x": 1}));
        a.send(json!({"kind": "drawRequest", "x": 99, "y": 0, "colorIndex": 1}));
        a.send_raw(Message::binary(
            json!({"kind": "regionQuery", "x": 0, "y": 0, "width": 2, "height": 1})
                .to_string()
                .into_bytes(),
        ));

        // Only the region query is answered.
        let region = a.recv().await;
        assert_eq!(
            region,
            json!({"kind": "region", "x": 0, "y": 0, "width": 2, "height": 1, "data": [0, 0]})
        );
        assert!(state.rate_limiter.can_draw(&a.identity.parse().unwrap()));
    }
}
