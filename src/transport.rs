//! Boundary contract towards the chat transport: bulk message deletion is
//! delegated to a swappable collaborator, and dialog cleanup runs as a
//! detached delayed task that never blocks the originating request.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Best-effort bulk deletion of transport messages. Failures are the
/// implementation's problem to log; callers never retry.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn delete_messages(&self, chat_id: i64, message_ids: Vec<i64>);
}

/// Default sink: records what would be deleted. Stands in for a real
/// transport client and doubles as the test observer.
#[derive(Default)]
pub struct LogSink;

#[async_trait]
impl MessageSink for LogSink {
    async fn delete_messages(&self, chat_id: i64, message_ids: Vec<i64>) {
        tracing::info!(chat = chat_id, count = message_ids.len(), ?message_ids, "deleting messages");
        metrics::counter!("messages_deleted_total", message_ids.len() as u64);
    }
}

/// Factory helper used in main.
pub fn build_message_sink() -> Arc<dyn MessageSink> {
    Arc::new(LogSink)
}

/// Fire-and-forget: waits out the configured delay, then hands the id set to
/// the sink. The originating request does not await this.
pub fn schedule_cleanup(
    sink: Arc<dyn MessageSink>,
    chat_id: i64,
    message_ids: Vec<i64>,
    delay: Duration,
) {
    if message_ids.is_empty() {
        return;
    }
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        sink.delete_messages(chat_id, message_ids).await;
    });
}
