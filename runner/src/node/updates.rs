use crate::{
    config::EVENT_CHANNEL_SIZE,
    node::{BlockchainUpdated, NodeError, StreamItem},
};
use futures_util::{SinkExt, StreamExt};
use ride_common::block::Height;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite_wasm::{connect, Message};

// How many consecutive failed connection attempts end the stream
const MAX_CONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

enum Connection {
    // Timed out or errored; resubscribe from the given height
    Resubscribe(Height),
    Ended,
}

// Subscribes to the node's blockchain-updates feed and frames it into the
// single-consumer event channel. Read silence past the configured timeout is
// surfaced as `Failed(Timeout)`, then the subscription restarts from the last
// delivered height so the canonical tail is re-sent.
pub struct UpdatesClient {
    url: String,
    timeout: Duration,
}

impl UpdatesClient {
    pub fn new(url: String, timeout: Duration) -> Self {
        UpdatesClient { url, timeout }
    }

    pub fn spawn(self, from_height: Height) -> mpsc::Receiver<StreamItem> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        tokio::spawn(async move {
            self.run(from_height, tx).await;
        });
        rx
    }

    async fn run(self, mut from_height: Height, tx: mpsc::Sender<StreamItem>) {
        let mut attempts = 0u32;
        loop {
            match self.subscribe_once(from_height, &tx).await {
                Ok(Connection::Resubscribe(height)) => {
                    attempts = 0;
                    from_height = height;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
                Ok(Connection::Ended) => break,
                Err(error) => {
                    attempts += 1;
                    if attempts >= MAX_CONNECT_ATTEMPTS {
                        error!("updates stream gave up after {} attempts: {}", attempts, error);
                        let _ = tx.send(StreamItem::Failed(error)).await;
                        break;
                    }
                    warn!(
                        "updates stream connection failed (attempt {}): {}",
                        attempts, error
                    );
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
        let _ = tx.send(StreamItem::Closed).await;
    }

    async fn subscribe_once(
        &self,
        from_height: Height,
        tx: &mpsc::Sender<StreamItem>,
    ) -> Result<Connection, NodeError> {
        debug!("subscribing to {} from height {}", self.url, from_height);
        let socket = connect(&self.url)
            .await
            .map_err(|error| NodeError::Transport(error.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let subscribe = json!({
            "method": "subscribe",
            "from_height": from_height,
            // zero means "follow the tip"
            "to_height": 0,
        });
        sink.send(Message::Text(subscribe.to_string().into()))
            .await
            .map_err(|error| NodeError::Transport(error.to_string()))?;

        let mut last_height = from_height;
        loop {
            let frame = match tokio::time::timeout(self.timeout, stream.next()).await {
                Err(_) => {
                    warn!("no event for {:?}, reporting an upstream timeout", self.timeout);
                    if tx.send(StreamItem::Failed(NodeError::Timeout)).await.is_err() {
                        return Ok(Connection::Ended);
                    }
                    return Ok(Connection::Resubscribe(last_height));
                }
                Ok(None) => return Err(NodeError::ConnectionClosed),
                Ok(Some(Err(error))) => return Err(NodeError::Transport(error.to_string())),
                Ok(Some(Ok(frame))) => frame,
            };

            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => return Err(NodeError::ConnectionClosed),
                _ => continue,
            };

            let event: BlockchainUpdated = match serde_json::from_str(&text) {
                Ok(event) => event,
                Err(error) => {
                    return Err(NodeError::UnexpectedResponse(format!(
                        "malformed event: {}",
                        error
                    )))
                }
            };
            last_height = event.height;
            if tx.send(StreamItem::Next(event)).await.is_err() {
                // consumer is gone, stop quietly
                return Ok(Connection::Ended);
            }
        }
    }
}
