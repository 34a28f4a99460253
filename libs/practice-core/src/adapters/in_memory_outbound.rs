use crate::{CoreError, IpLookup, Notifier, OutboundMessage};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Notifier that keeps every message instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    outbox: Arc<Mutex<Vec<OutboundMessage>>>,
}

impl InMemoryNotifier {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, message: &OutboundMessage) -> Result<(), CoreError> {
        info!(
            "Captured outbound message '{}' for {:?}",
            message.subject, message.to
        );
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

/// IpLookup answering with a fixed address, or failing when none is set.
#[derive(Debug, Clone, Default)]
pub struct StaticIpLookup {
    ip: Option<String>,
}

impl StaticIpLookup {
    pub fn new(ip: impl Into<String>) -> Self {
        Self { ip: Some(ip.into()) }
    }

    pub fn unavailable() -> Self {
        Self { ip: None }
    }
}

#[async_trait]
impl IpLookup for StaticIpLookup {
    async fn client_ip(&self) -> Result<String, CoreError> {
        self.ip
            .clone()
            .ok_or_else(|| CoreError::Internal("IP lookup unavailable".into()))
    }
}
