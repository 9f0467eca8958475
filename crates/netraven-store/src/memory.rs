use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netraven_domain::{
    Credential, CredentialId, Device, DeviceId, DeviceResult, JobDefinition, JobDefinitionId,
    JobLogEntry, JobRun, JobRunId, JobRunStatus, JobTarget, ReachabilityStatus, Tag, TagId,
};
use tokio::sync::RwLock;

use crate::codec::SecretCodec;
use crate::error::StoreError;
use crate::store::JobStore;

#[derive(Default)]
struct Inner {
    tags: HashMap<TagId, Tag>,
    devices: HashMap<DeviceId, Device>,
    credentials: HashMap<CredentialId, Credential>,
    job_definitions: HashMap<JobDefinitionId, JobDefinition>,
    job_runs: HashMap<JobRunId, JobRun>,
    device_results: HashMap<(JobRunId, DeviceId), DeviceResult>,
    job_logs: Vec<JobLogEntry>,
    credential_tag_success: HashMap<(CredentialId, TagId), u64>,
    blobs: HashMap<String, Vec<u8>>,
}

/// In-memory implementation of [`JobStore`]. All data is lost on process
/// exit — suitable for tests and ephemeral local runs.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    codec: SecretCodec,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_encryption_key("netraven-dev-key")
    }

    pub fn with_encryption_key(key: &str) -> Self {
        InMemoryStore { inner: RwLock::new(Inner::default()), codec: SecretCodec::new(key) }
    }

    /// Encrypts `plaintext` with this store's key, for building `Credential` fixtures in tests.
    pub fn encrypt_secret(&self, plaintext: &[u8]) -> Vec<u8> {
        self.codec.encrypt(plaintext).expect("encryption never fails for valid input")
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn list_active_job_definitions(&self) -> Result<Vec<JobDefinition>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.job_definitions.values().filter(|d| d.enabled).cloned().collect())
    }

    async fn get_job_definition(&self, id: JobDefinitionId) -> Result<Option<JobDefinition>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.job_definitions.get(&id).cloned())
    }

    async fn resolve_devices_for_target(&self, target: &JobTarget) -> Result<Vec<Device>, StoreError> {
        let guard = self.inner.read().await;
        let devices = match target {
            JobTarget::Device(id) => guard.devices.get(id).cloned().into_iter().collect(),
            JobTarget::Tags(tags) => guard
                .devices
                .values()
                .filter(|d| d.tags.intersection(tags).next().is_some())
                .cloned()
                .collect(),
        };
        Ok(devices)
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.devices.get(&id).cloned())
    }

    async fn list_credentials_for_device(&self, device: &Device) -> Result<Vec<Credential>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .credentials
            .values()
            .filter(|c| c.tags.intersection(&device.tags).next().is_some())
            .cloned()
            .collect())
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
        let mut guard = self.inner.write().await;
        let device = guard
            .devices
            .get_mut(&device_id)
            .ok_or_else(|| StoreError::DeviceNotFound(device_id.to_string()))?;
        device.last_reachability_status = status;
        device.last_updated_at = Some(at);
        Ok(())
    }

    async fn create_job_run(
        &self,
        job_definition_id: JobDefinitionId,
        device_subset: Option<Vec<DeviceId>>,
    ) -> Result<JobRun, StoreError> {
        let mut guard = self.inner.write().await;
        let overlapping = guard
            .job_runs
            .values()
            .any(|r| r.job_definition_id == job_definition_id && !r.status.is_terminal());
        if overlapping {
            return Err(StoreError::Overlapping(job_definition_id.to_string()));
        }
        let mut run = JobRun::new_pending(job_definition_id);
        run.device_subset = device_subset;
        guard.job_runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get_job_run(&self, id: JobRunId) -> Result<Option<JobRun>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.job_runs.get(&id).cloned())
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
        let mut guard = self.inner.write().await;
        let run = guard
            .job_runs
            .get_mut(&id)
            .ok_or_else(|| StoreError::JobRunNotFound(id.to_string()))?;
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
        Ok(())
    }

    async fn list_pending_or_running_job_runs_for(
        &self,
        job_definition_id: JobDefinitionId,
    ) -> Result<Vec<JobRun>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .job_runs
            .values()
            .filter(|r| r.job_definition_id == job_definition_id && !r.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_pending_or_running_job_runs(&self) -> Result<Vec<JobRun>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.job_runs.values().filter(|r| !r.status.is_terminal()).cloned().collect())
    }

    async fn upsert_device_result(&self, result: &DeviceResult) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.device_results.insert((result.job_run_id, result.device_id), result.clone());
        Ok(())
    }

    async fn list_device_results(&self, job_run_id: JobRunId) -> Result<Vec<DeviceResult>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .device_results
            .values()
            .filter(|r| r.job_run_id == job_run_id)
            .cloned()
            .collect())
    }

    async fn append_job_log(&self, entry: &JobLogEntry) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.job_logs.push(entry.clone());
        Ok(())
    }

    async fn list_job_logs(
        &self,
        job_run_id: JobRunId,
        device_id: Option<DeviceId>,
    ) -> Result<Vec<JobLogEntry>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .job_logs
            .iter()
            .filter(|e| e.job_run_id == job_run_id)
            .filter(|e| device_id.map_or(true, |d| e.device_id == Some(d)))
            .cloned()
            .collect())
    }

    async fn record_credential_outcome(
        &self,
        credential_id: CredentialId,
        tag_id: Option<TagId>,
        success: bool,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if let Some(cred) = guard.credentials.get_mut(&credential_id) {
            if success {
                cred.success_count += 1;
            } else {
                cred.failure_count += 1;
            }
            cred.last_used_at = Some(Utc::now());
        } else {
            return Err(StoreError::CredentialNotFound(credential_id.to_string()));
        }
        if let Some(tag_id) = tag_id {
            if success {
                *guard.credential_tag_success.entry((credential_id, tag_id)).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    async fn credential_tag_success_count(
        &self,
        credential_id: CredentialId,
        tag_id: TagId,
    ) -> Result<Option<u64>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.credential_tag_success.get(&(credential_id, tag_id)).copied())
    }

    async fn put_blob(&self, hash: &str, bytes: &[u8]) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        if guard.blobs.contains_key(hash) {
            return Ok(false);
        }
        guard.blobs.insert(hash.to_string(), bytes.to_vec());
        Ok(true)
    }

    async fn has_blob(&self, hash: &str) -> Result<bool, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.blobs.contains_key(hash))
    }

    async fn get_blob(&self, hash: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.blobs.get(hash).cloned())
    }

    async fn upsert_tag(&self, tag: &Tag) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.tags.insert(tag.id, tag.clone());
        Ok(())
    }

    async fn upsert_device(&self, device: &Device) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.devices.insert(device.id, device.clone());
        Ok(())
    }

    async fn upsert_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.credentials.insert(credential.id, credential.clone());
        Ok(())
    }

    async fn upsert_job_definition(&self, def: &JobDefinition) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.job_definitions.insert(def.id, def.clone());
        Ok(())
    }
}

/// Convenience constructor used by callers that want a trait object.
pub fn shared() -> Arc<dyn JobStore> {
    Arc::new(InMemoryStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn device_with_tag(tag: TagId) -> Device {
        let mut tags = HashSet::new();
        tags.insert(tag);
        Device {
            id: DeviceId::new(),
            hostname: "sw1".into(),
            address: "10.0.0.1".into(),
            device_family: "generic".into(),
            port: 22,
            tags,
            last_reachability_status: ReachabilityStatus::Never,
            last_updated_at: None,
        }
    }

    #[tokio::test]
    async fn resolve_by_tag_intersection() {
        let store = InMemoryStore::new();
        let tag = TagId::new();
        let device = device_with_tag(tag);
        store.upsert_device(&device).await.unwrap();

        let mut wanted = HashSet::new();
        wanted.insert(tag);
        let resolved = store.resolve_devices_for_target(&JobTarget::Tags(wanted)).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, device.id);
    }

    #[tokio::test]
    async fn overlap_guard_rejects_second_run_while_first_is_pending() {
        let store = InMemoryStore::new();
        let def_id = JobDefinitionId::new();
        store.create_job_run(def_id, None).await.unwrap();
        let second = store.create_job_run(def_id, None).await;
        assert!(matches!(second, Err(StoreError::Overlapping(_))));
    }

    #[tokio::test]
    async fn blob_dedupe_second_write_returns_false() {
        let store = InMemoryStore::new();
        assert!(store.put_blob("h1", b"data").await.unwrap());
        assert!(!store.put_blob("h1", b"data").await.unwrap());
        assert!(store.has_blob("h1").await.unwrap());
    }

    #[tokio::test]
    async fn credential_outcome_updates_counters() {
        let store = InMemoryStore::new();
        let cred = Credential {
            id: CredentialId::new(),
            username: "admin".into(),
            encrypted_secret: store.encrypt_secret(b"hunter2"),
            priority: 10,
            tags: HashSet::new(),
            success_count: 0,
            failure_count: 0,
            last_used_at: None,
        };
        store.upsert_credential(&cred).await.unwrap();
        store.record_credential_outcome(cred.id, None, true).await.unwrap();
        store.record_credential_outcome(cred.id, None, false).await.unwrap();

        let logs = store.list_job_logs(JobRunId::new(), None).await.unwrap();
        assert!(logs.is_empty());
    }
}
