use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use netraven_domain::{DeviceId, JobLogEntry, JobRunId, LogCategory, LogLevel};
use netraven_store::JobStore;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::hub::LogHub;
use crate::redact::Redactor;

/// The single choke point every component routes `JobLogEntry` creation
/// through. No other module formats a message for persistence or the wire —
/// this is where redaction, durable storage, live publication, and the
/// per-device sequence counters all happen exactly once.
pub struct LogSink {
    store: Arc<dyn JobStore>,
    hub: Arc<LogHub>,
    redactor: Redactor,
    sequences: Mutex<HashMap<(JobRunId, Option<DeviceId>), u64>>,
}

impl LogSink {
    pub fn new(store: Arc<dyn JobStore>, hub: Arc<LogHub>, redactor: Redactor) -> Self {
        LogSink { store, hub, redactor, sequences: Mutex::new(HashMap::new()) }
    }

    async fn next_sequence(&self, job_run_id: JobRunId, device_id: Option<DeviceId>) -> u64 {
        let mut seqs = self.sequences.lock().await;
        let counter = seqs.entry((job_run_id, device_id)).or_insert(0);
        let seq = *counter;
        *counter += 1;
        seq
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn emit(
        &self,
        job_run_id: JobRunId,
        device_id: Option<DeviceId>,
        level: LogLevel,
        category: LogCategory,
        message: impl Into<String>,
        mut context: serde_json::Map<String, serde_json::Value>,
    ) {
        let sequence = self.next_sequence(job_run_id, device_id).await;
        let message = self.redactor.redact_str(&message.into());
        self.redactor.redact_context(&mut context);

        let entry = JobLogEntry {
            job_run_id,
            device_id,
            timestamp: Utc::now(),
            level,
            category,
            message,
            context,
            sequence: Some(sequence),
        };

        trace_through(&entry);

        if let Err(e) = self.store.append_job_log(&entry).await {
            error!(error = %e, "failed to persist job log entry");
        }
        self.hub.publish(entry);
    }

    pub fn hub(&self) -> Arc<LogHub> {
        self.hub.clone()
    }
}

fn trace_through(entry: &JobLogEntry) {
    match entry.level {
        LogLevel::Debug => debug!(job_run_id = %entry.job_run_id, category = ?entry.category, "{}", entry.message),
        LogLevel::Info => info!(job_run_id = %entry.job_run_id, category = ?entry.category, "{}", entry.message),
        LogLevel::Warning => warn!(job_run_id = %entry.job_run_id, category = ?entry.category, "{}", entry.message),
        LogLevel::Error | LogLevel::Critical => {
            error!(job_run_id = %entry.job_run_id, category = ?entry.category, "{}", entry.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netraven_store::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn emit_redacts_and_persists() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new());
        let hub = Arc::new(LogHub::new());
        let sink = LogSink::new(store.clone(), hub.clone(), Redactor::empty());

        let run_id = JobRunId::new();
        let mut ctx = serde_json::Map::new();
        ctx.insert("detail".into(), json!("password=hunter2"));

        sink.emit(run_id, None, LogLevel::Info, LogCategory::Job, "login attempt", ctx)
            .await;

        let logs = store.list_job_logs(run_id, None).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].context["detail"].as_str().unwrap().contains("hunter2"));
    }

    #[tokio::test]
    async fn sequence_numbers_increase_per_device() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new());
        let hub = Arc::new(LogHub::new());
        let sink = LogSink::new(store, hub, Redactor::empty());

        let run_id = JobRunId::new();
        let device_id = DeviceId::new();
        sink.emit(run_id, Some(device_id), LogLevel::Info, LogCategory::Connection, "a", Default::default()).await;
        sink.emit(run_id, Some(device_id), LogLevel::Info, LogCategory::Connection, "b", Default::default()).await;

        let logs = sink.store.list_job_logs(run_id, Some(device_id)).await.unwrap();
        assert_eq!(logs[0].sequence, Some(0));
        assert_eq!(logs[1].sequence, Some(1));
    }
}
