use netraven_domain::JobLogEntry;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out hub for live log streaming: one publisher (the log sink), many
/// subscribers. Best-effort delivery — a subscriber that falls behind the
/// buffer sees `Lagged` and drops messages rather than the whole pipeline
/// stalling. Durable log rows are written independently by `LogSink`, so a
/// dropped live message never loses the audit trail.
pub struct LogHub {
    tx: broadcast::Sender<JobLogEntry>,
}

impl LogHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        LogHub { tx }
    }

    pub fn publish(&self, entry: JobLogEntry) {
        // No subscribers is a normal, expected state; ignore the send error.
        let _ = self.tx.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobLogEntry> {
        self.tx.subscribe()
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netraven_domain::{JobRunId, LogCategory, LogLevel};

    fn entry(job_run_id: JobRunId) -> JobLogEntry {
        JobLogEntry {
            job_run_id,
            device_id: None,
            timestamp: chrono::Utc::now(),
            level: LogLevel::Info,
            category: LogCategory::Job,
            message: "hello".into(),
            context: serde_json::Map::new(),
            sequence: None,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_entry() {
        let hub = LogHub::new();
        let mut rx = hub.subscribe();
        let run_id = JobRunId::new();
        hub.publish(entry(run_id));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.job_run_id, run_id);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_a_copy() {
        let hub = LogHub::new();
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();
        let run_id = JobRunId::new();
        hub.publish(entry(run_id));
        assert_eq!(rx1.recv().await.unwrap().job_run_id, run_id);
        assert_eq!(rx2.recv().await.unwrap().job_run_id, run_id);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let hub = LogHub::new();
        hub.publish(entry(JobRunId::new()));
    }
}
