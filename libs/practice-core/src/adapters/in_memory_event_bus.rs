use crate::{CoreError, EventPublisher, Notice, NoticeFeed, NoticeStream};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, Sender};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

/// In-memory notice bus on tokio broadcast channels, one channel per topic.
///
/// Receivers only see notices published after they subscribed; a lagging
/// receiver may miss notices.
#[derive(Debug, Clone)]
pub struct InMemoryEventBus {
    channels: Arc<DashMap<String, Sender<Notice>>>,
    channel_capacity: usize,
}

impl InMemoryEventBus {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            channel_capacity,
        }
    }

    fn sender(&self, topic: &str) -> Sender<Notice> {
        self.channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .value()
            .clone()
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Notice> {
        self.sender(topic).subscribe()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(
        &self,
        topic: &str,
        event_type: &str,
        event_payload: &[u8],
    ) -> Result<(), CoreError> {
        let notice = Notice {
            topic: topic.to_string(),
            event_type: event_type.to_string(),
            payload: event_payload.to_vec(),
        };
        // No subscriber is not an error: the client may have closed the tab.
        if self.sender(topic).send(notice).is_err() {
            debug!("Notice {} on '{}' had no subscribers", event_type, topic);
        }
        Ok(())
    }
}

#[async_trait]
impl NoticeFeed for InMemoryEventBus {
    async fn listen(&self, topic: &str) -> Result<NoticeStream, CoreError> {
        let topic_name = topic.to_string();
        let notices = BroadcastStream::new(self.subscribe(topic)).filter_map(move |item| match item {
            Ok(notice) => Some(notice),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("Listener on '{}' lagged, skipped {} notice(s)", topic_name, skipped);
                None
            }
        });
        Ok(Box::pin(notices))
    }
}
