use crate::models::DocumentStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// 推送给订阅者的流水线事件 (轮询 `GET /api/documents/:id` 仍是主契约)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    StatusChanged {
        document_id: i64,
        quote_id: Option<i64>,
        status: DocumentStatus,
        at: DateTime<Utc>,
    },
    QuoteMatched {
        quote_id: i64,
        matched: usize,
        unmatched: usize,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct StatusNotifier {
    tx: broadcast::Sender<PipelineEvent>,
}

impl StatusNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// 没有订阅者时直接丢弃
    pub fn publish(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("no subscribers for pipeline event");
        }
    }
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}
