use crate::{CoreError, EventPublisher, Notice, NoticeFeed, NoticeStream};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection, aio::PubSub};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Wire form of a notice on a Redis channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeEnvelope {
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Redis Pub/Sub implementation of the EventPublisher port. Payloads that are
/// JSON are embedded as-is; anything else is sent as a JSON string.
#[derive(Clone)]
pub struct RedisEventBus {
    publish_connection: MultiplexedConnection,
    redis_url: String,
    channel_prefix: String,
}

impl RedisEventBus {
    pub async fn new(redis_url: &str, channel_prefix: Option<&str>) -> Result<Self, CoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| CoreError::Configuration(format!("Invalid Redis URL: {}", e)))?;
        let publish_connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(CoreError::infra)?;
        info!("Redis notice bus connected.");
        Ok(Self {
            publish_connection,
            redis_url: redis_url.to_string(),
            channel_prefix: channel_prefix.unwrap_or("").to_string(),
        })
    }

    /// Opens a dedicated Pub/Sub connection for a listener.
    pub async fn subscriber_connection(&self) -> Result<PubSub, CoreError> {
        let client = Client::open(self.redis_url.as_str())
            .map_err(|e| CoreError::Configuration(format!("Invalid Redis URL: {}", e)))?;
        client.get_async_pubsub().await.map_err(CoreError::infra)
    }

    pub fn channel_name(&self, topic: &str) -> String {
        format!("{}{}", self.channel_prefix, topic)
    }
}

pub fn encode_envelope(event_type: &str, payload: &[u8]) -> Result<Vec<u8>, CoreError> {
    let payload = serde_json::from_slice(payload)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(payload).into_owned()));
    serde_json::to_vec(&NoticeEnvelope {
        event_type: event_type.to_string(),
        payload,
    })
    .map_err(|e| CoreError::Internal(format!("Failed to encode notice: {}", e)))
}

/// Inverse of [`encode_envelope`]: string payloads come back as their text.
pub fn decode_envelope(topic: &str, raw: &[u8]) -> Result<Notice, CoreError> {
    let envelope: NoticeEnvelope = serde_json::from_slice(raw)
        .map_err(|e| CoreError::Internal(format!("Malformed notice envelope: {}", e)))?;
    let payload = match envelope.payload {
        serde_json::Value::String(text) => text.into_bytes(),
        other => serde_json::to_vec(&other)
            .map_err(|e| CoreError::Internal(format!("Failed to encode notice payload: {}", e)))?,
    };
    Ok(Notice {
        topic: topic.to_string(),
        event_type: envelope.event_type,
        payload,
    })
}

#[async_trait]
impl EventPublisher for RedisEventBus {
    async fn publish(
        &self,
        topic: &str,
        event_type: &str,
        event_payload: &[u8],
    ) -> Result<(), CoreError> {
        let mut conn = self.publish_connection.clone();
        let channel = self.channel_name(topic);
        let body = encode_envelope(event_type, event_payload)?;
        let receivers: usize = conn.publish(&channel, body).await.map_err(CoreError::infra)?;
        debug!("Published {} on {} to {} receiver(s)", event_type, channel, receivers);
        Ok(())
    }
}

#[async_trait]
impl NoticeFeed for RedisEventBus {
    async fn listen(&self, topic: &str) -> Result<NoticeStream, CoreError> {
        let mut pubsub = self.subscriber_connection().await?;
        let channel = self.channel_name(topic);
        pubsub.subscribe(&channel).await.map_err(CoreError::infra)?;
        debug!("Listening on {}", channel);

        let topic = topic.to_string();
        let notices = pubsub.into_on_message().filter_map(move |msg| {
            let raw: Vec<u8> = match msg.get_payload() {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Failed to read notice payload on {}: {}", topic, e);
                    return None;
                }
            };
            match decode_envelope(&topic, &raw) {
                Ok(notice) => Some(notice),
                Err(e) => {
                    warn!("Dropping notice on {}: {}", topic, e);
                    None
                }
            }
        });
        Ok(Box::pin(notices))
    }
}
