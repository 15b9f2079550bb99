use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use super::IrnParams;
use crate::{Result, Topic};

/// A raw message delivered by the relay on a subscribed topic.
///
/// The payload is a sealed envelope; opening it is the key directory's job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayMessage {
    /// Topic the message was published on.
    pub topic: Topic,
    /// Sealed envelope bytes.
    pub message: Vec<u8>,
}

/// Trait describing the raw relay connection.
///
/// Implementations acknowledge a publish only once the relay accepted it.
/// Retransmission, multi-relay fan-out and compression are the
/// implementation's concern.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Start receiving messages published on `topic`.
    async fn subscribe(&self, topic: &Topic) -> Result<()>;

    /// Stop receiving messages published on `topic`.
    async fn unsubscribe(&self, topic: &Topic) -> Result<()>;

    /// Publish a sealed envelope on `topic`.
    async fn publish(&self, topic: &Topic, message: Vec<u8>, params: IrnParams) -> Result<()>;

    /// Stream of messages received on subscribed topics.
    fn inbound(&self) -> broadcast::Receiver<RelayMessage>;

    /// Current connectivity; `true` once the relay is reachable.
    fn connection_state(&self) -> watch::Receiver<bool>;
}
