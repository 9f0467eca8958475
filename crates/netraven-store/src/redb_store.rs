use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netraven_domain::{
    Credential, CredentialId, Device, DeviceId, DeviceResult, JobDefinition, JobDefinitionId,
    JobLogEntry, JobRun, JobRunId, JobRunStatus, JobTarget, ReachabilityStatus, Tag, TagId,
};
use redb::{Database, ReadableTable, TableDefinition};

use crate::codec::SecretCodec;
use crate::error::StoreError;
use crate::store::JobStore;

const TAGS: TableDefinition<&str, &[u8]> = TableDefinition::new("tags");
const DEVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("devices");
const CREDENTIALS: TableDefinition<&str, &[u8]> = TableDefinition::new("credentials");
const JOB_DEFINITIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("job_definitions");
const JOB_RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("job_runs");
const DEVICE_RESULTS: TableDefinition<&str, &[u8]> = TableDefinition::new("device_results");
const JOB_LOGS: TableDefinition<u64, &[u8]> = TableDefinition::new("job_logs");
const CREDENTIAL_TAG_SUCCESS: TableDefinition<&str, u64> = TableDefinition::new("credential_tag_success");
const BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

fn internal<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Internal(e.to_string())
}

/// Persistent datastore backed by a redb database file. Suitable for local
/// production use where a separate Postgres instance isn't warranted.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    codec: Arc<SecretCodec>,
}

impl RedbStore {
    /// Open (or create) a redb database at `path`. Parent directories are
    /// created automatically.
    pub fn open(path: &Path, encryption_key: &str) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(internal)?;
        }
        let db = Database::create(path).map_err(internal)?;

        {
            let wtxn = db.begin_write().map_err(internal)?;
            wtxn.open_table(TAGS).map_err(internal)?;
            wtxn.open_table(DEVICES).map_err(internal)?;
            wtxn.open_table(CREDENTIALS).map_err(internal)?;
            wtxn.open_table(JOB_DEFINITIONS).map_err(internal)?;
            wtxn.open_table(JOB_RUNS).map_err(internal)?;
            wtxn.open_table(DEVICE_RESULTS).map_err(internal)?;
            wtxn.open_table(JOB_LOGS).map_err(internal)?;
            wtxn.open_table(CREDENTIAL_TAG_SUCCESS).map_err(internal)?;
            wtxn.open_table(BLOBS).map_err(internal)?;
            wtxn.open_table(META).map_err(internal)?;
            wtxn.commit().map_err(internal)?;
        }

        Ok(Self { db: Arc::new(db), codec: Arc::new(SecretCodec::new(encryption_key)) })
    }

    fn device_result_key(job_run_id: JobRunId, device_id: DeviceId) -> String {
        format!("{job_run_id}:{device_id}")
    }

    fn credential_tag_key(credential_id: CredentialId, tag_id: TagId) -> String {
        format!("{credential_id}:{tag_id}")
    }
}

#[async_trait]
impl JobStore for RedbStore {
    async fn list_active_job_definitions(&self) -> Result<Vec<JobDefinition>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(JOB_DEFINITIONS).map_err(internal)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            let def: JobDefinition = serde_json::from_slice(v.value())?;
            if def.enabled {
                out.push(def);
            }
        }
        Ok(out)
    }

    async fn get_job_definition(&self, id: JobDefinitionId) -> Result<Option<JobDefinition>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(JOB_DEFINITIONS).map_err(internal)?;
        match table.get(id.to_string().as_str()).map_err(internal)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    async fn resolve_devices_for_target(&self, target: &JobTarget) -> Result<Vec<Device>, StoreError> {
        match target {
            JobTarget::Device(id) => Ok(self.get_device(*id).await?.into_iter().collect()),
            JobTarget::Tags(tags) => {
                let rtxn = self.db.begin_read().map_err(internal)?;
                let table = rtxn.open_table(DEVICES).map_err(internal)?;
                let mut out = Vec::new();
                for entry in table.iter().map_err(internal)? {
                    let (_k, v) = entry.map_err(internal)?;
                    let device: Device = serde_json::from_slice(v.value())?;
                    if device.tags.intersection(tags).next().is_some() {
                        out.push(device);
                    }
                }
                Ok(out)
            }
        }
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(DEVICES).map_err(internal)?;
        match table.get(id.to_string().as_str()).map_err(internal)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    async fn list_credentials_for_device(&self, device: &Device) -> Result<Vec<Credential>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(CREDENTIALS).map_err(internal)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            let cred: Credential = serde_json::from_slice(v.value())?;
            if cred.tags.intersection(&device.tags).next().is_some() {
                out.push(cred);
            }
        }
        Ok(out)
    }

    async fn decrypt_secret(&self, ciphertext: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.codec.decrypt(ciphertext)
    }

    async fn set_device_reachability(
        &self,
        device_id: DeviceId,
        status: ReachabilityStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut device = self
            .get_device(device_id)
            .await?
            .ok_or_else(|| StoreError::DeviceNotFound(device_id.to_string()))?;
        device.last_reachability_status = status;
        device.last_updated_at = Some(at);
        self.upsert_device(&device).await
    }

    async fn create_job_run(
        &self,
        job_definition_id: JobDefinitionId,
        device_subset: Option<Vec<DeviceId>>,
    ) -> Result<JobRun, StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        let run = {
            let mut table = wtxn.open_table(JOB_RUNS).map_err(internal)?;
            for entry in table.iter().map_err(internal)? {
                let (_k, v) = entry.map_err(internal)?;
                let existing: JobRun = serde_json::from_slice(v.value())?;
                if existing.job_definition_id == job_definition_id && !existing.status.is_terminal() {
                    return Err(StoreError::Overlapping(job_definition_id.to_string()));
                }
            }
            let mut run = JobRun::new_pending(job_definition_id);
            run.device_subset = device_subset;
            let bytes = serde_json::to_vec(&run)?;
            table.insert(run.id.to_string().as_str(), bytes.as_slice()).map_err(internal)?;
            run
        };
        wtxn.commit().map_err(internal)?;
        Ok(run)
    }

    async fn get_job_run(&self, id: JobRunId) -> Result<Option<JobRun>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(JOB_RUNS).map_err(internal)?;
        match table.get(id.to_string().as_str()).map_err(internal)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    async fn set_job_run_status(
        &self,
        id: JobRunId,
        status: JobRunStatus,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        succeeded_devices: u32,
        failed_devices: u32,
        total_devices: u32,
    ) -> Result<(), StoreError> {
        let mut run = self.get_job_run(id).await?.ok_or_else(|| StoreError::JobRunNotFound(id.to_string()))?;
        run.status = status;
        if started_at.is_some() {
            run.started_at = started_at;
        }
        if completed_at.is_some() {
            run.completed_at = completed_at;
        }
        run.succeeded_devices = succeeded_devices;
        run.failed_devices = failed_devices;
        run.total_devices = total_devices;

        let bytes = serde_json::to_vec(&run)?;
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(JOB_RUNS).map_err(internal)?;
            table.insert(id.to_string().as_str(), bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn list_pending_or_running_job_runs_for(
        &self,
        job_definition_id: JobDefinitionId,
    ) -> Result<Vec<JobRun>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(JOB_RUNS).map_err(internal)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            let run: JobRun = serde_json::from_slice(v.value())?;
            if run.job_definition_id == job_definition_id && !run.status.is_terminal() {
                out.push(run);
            }
        }
        Ok(out)
    }

    async fn list_pending_or_running_job_runs(&self) -> Result<Vec<JobRun>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(JOB_RUNS).map_err(internal)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            let run: JobRun = serde_json::from_slice(v.value())?;
            if !run.status.is_terminal() {
                out.push(run);
            }
        }
        Ok(out)
    }

    async fn upsert_device_result(&self, result: &DeviceResult) -> Result<(), StoreError> {
        let key = Self::device_result_key(result.job_run_id, result.device_id);
        let bytes = serde_json::to_vec(result)?;
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(DEVICE_RESULTS).map_err(internal)?;
            table.insert(key.as_str(), bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn list_device_results(&self, job_run_id: JobRunId) -> Result<Vec<DeviceResult>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(DEVICE_RESULTS).map_err(internal)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            let result: DeviceResult = serde_json::from_slice(v.value())?;
            if result.job_run_id == job_run_id {
                out.push(result);
            }
        }
        Ok(out)
    }

    async fn append_job_log(&self, entry: &JobLogEntry) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(entry)?;
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut meta = wtxn.open_table(META).map_err(internal)?;
            let seq = meta.get("job_log_seq").map_err(internal)?.map(|g| g.value()).unwrap_or(0);
            let new_seq = seq + 1;
            meta.insert("job_log_seq", new_seq).map_err(internal)?;

            let mut logs = wtxn.open_table(JOB_LOGS).map_err(internal)?;
            logs.insert(new_seq, bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn list_job_logs(
        &self,
        job_run_id: JobRunId,
        device_id: Option<DeviceId>,
    ) -> Result<Vec<JobLogEntry>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(JOB_LOGS).map_err(internal)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            let log_entry: JobLogEntry = serde_json::from_slice(v.value())?;
            if log_entry.job_run_id != job_run_id {
                continue;
            }
            if device_id.map_or(true, |d| log_entry.device_id == Some(d)) {
                out.push(log_entry);
            }
        }
        Ok(out)
    }

    async fn record_credential_outcome(
        &self,
        credential_id: CredentialId,
        tag_id: Option<TagId>,
        success: bool,
    ) -> Result<(), StoreError> {
        let mut cred = self
            .get_credential(credential_id)
            .await?
            .ok_or_else(|| StoreError::CredentialNotFound(credential_id.to_string()))?;
        if success {
            cred.success_count += 1;
        } else {
            cred.failure_count += 1;
        }
        cred.last_used_at = Some(Utc::now());
        self.upsert_credential(&cred).await?;

        if let (Some(tag_id), true) = (tag_id, success) {
            let key = Self::credential_tag_key(credential_id, tag_id);
            let wtxn = self.db.begin_write().map_err(internal)?;
            {
                let mut table = wtxn.open_table(CREDENTIAL_TAG_SUCCESS).map_err(internal)?;
                let current = table.get(key.as_str()).map_err(internal)?.map(|g| g.value()).unwrap_or(0);
                table.insert(key.as_str(), current + 1).map_err(internal)?;
            }
            wtxn.commit().map_err(internal)?;
        }
        Ok(())
    }

    async fn credential_tag_success_count(
        &self,
        credential_id: CredentialId,
        tag_id: TagId,
    ) -> Result<Option<u64>, StoreError> {
        let key = Self::credential_tag_key(credential_id, tag_id);
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(CREDENTIAL_TAG_SUCCESS).map_err(internal)?;
        Ok(table.get(key.as_str()).map_err(internal)?.map(|g| g.value()))
    }

    async fn put_blob(&self, hash: &str, bytes: &[u8]) -> Result<bool, StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        let inserted = {
            let mut table = wtxn.open_table(BLOBS).map_err(internal)?;
            if table.get(hash).map_err(internal)?.is_some() {
                false
            } else {
                table.insert(hash, bytes).map_err(internal)?;
                true
            }
        };
        wtxn.commit().map_err(internal)?;
        Ok(inserted)
    }

    async fn has_blob(&self, hash: &str) -> Result<bool, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(BLOBS).map_err(internal)?;
        Ok(table.get(hash).map_err(internal)?.is_some())
    }

    async fn get_blob(&self, hash: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(BLOBS).map_err(internal)?;
        Ok(table.get(hash).map_err(internal)?.map(|g| g.value().to_vec()))
    }

    async fn upsert_tag(&self, tag: &Tag) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(tag)?;
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(TAGS).map_err(internal)?;
            table.insert(tag.id.to_string().as_str(), bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn upsert_device(&self, device: &Device) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(device)?;
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(DEVICES).map_err(internal)?;
            table.insert(device.id.to_string().as_str(), bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn upsert_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(credential)?;
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(CREDENTIALS).map_err(internal)?;
            table.insert(credential.id.to_string().as_str(), bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn upsert_job_definition(&self, def: &JobDefinition) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(def)?;
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(JOB_DEFINITIONS).map_err(internal)?;
            table.insert(def.id.to_string().as_str(), bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }
}

impl RedbStore {
    async fn get_credential(&self, id: CredentialId) -> Result<Option<Credential>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(CREDENTIALS).map_err(internal)?;
        match table.get(id.to_string().as_str()).map_err(internal)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn dummy_device() -> Device {
        Device {
            id: DeviceId::new(),
            hostname: "sw1".into(),
            address: "10.0.0.1".into(),
            device_family: "generic".into(),
            port: 22,
            tags: HashSet::new(),
            last_reachability_status: ReachabilityStatus::Never,
            last_updated_at: None,
        }
    }

    fn open_store(dir: &TempDir) -> RedbStore {
        RedbStore::open(&dir.path().join("state.redb"), "test-key").unwrap()
    }

    #[tokio::test]
    async fn device_upsert_and_get() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let device = dummy_device();
        store.upsert_device(&device).await.unwrap();
        let got = store.get_device(device.id).await.unwrap();
        assert_eq!(got.unwrap().hostname, "sw1");
    }

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.redb");
        let device = dummy_device();

        {
            let store = RedbStore::open(&path, "test-key").unwrap();
            store.upsert_device(&device).await.unwrap();
        }
        {
            let store = RedbStore::open(&path, "test-key").unwrap();
            let got = store.get_device(device.id).await.unwrap();
            assert!(got.is_some(), "device should survive store reopen");
        }
    }

    #[tokio::test]
    async fn overlap_guard_rejects_second_run() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let def_id = JobDefinitionId::new();
        store.create_job_run(def_id, None).await.unwrap();
        let second = store.create_job_run(def_id, None).await;
        assert!(matches!(second, Err(StoreError::Overlapping(_))));
    }

    #[tokio::test]
    async fn blob_dedupe() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(store.put_blob("h1", b"data").await.unwrap());
        assert!(!store.put_blob("h1", b"data").await.unwrap());
        assert_eq!(store.get_blob("h1").await.unwrap().unwrap(), b"data".to_vec());
    }

    #[tokio::test]
    async fn job_logs_append_and_filter_by_job_run() {
        use netraven_domain::{LogCategory, LogLevel};

        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let run_a = JobRunId::new();
        let run_b = JobRunId::new();
        for run_id in [run_a, run_b] {
            store
                .append_job_log(&JobLogEntry {
                    job_run_id: run_id,
                    device_id: None,
                    timestamp: Utc::now(),
                    level: LogLevel::Info,
                    category: LogCategory::Job,
                    message: "started".into(),
                    context: serde_json::Map::new(),
                    sequence: None,
                })
                .await
                .unwrap();
        }
        let logs = store.list_job_logs(run_a, None).await.unwrap();
        assert_eq!(logs.len(), 1);
    }
}
