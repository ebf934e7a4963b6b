use crate::domain::events::DomainEvent;
use crate::domain::ports::EventSink;
use crate::error::Result;
use async_trait::async_trait;
use tracing::info;

/// Publishes events as structured log lines. Used by the CLI, which has no downstream consumer.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn deliver(&self, event: &DomainEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        info!(
            event_id = event.event_id(),
            kind = event.kind().as_str(),
            payload = %payload,
            "domain event"
        );
        Ok(())
    }
}
