use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netraven_domain::{
    Credential, CredentialId, Device, DeviceId, DeviceResult, JobDefinition, JobDefinitionId,
    JobLogEntry, JobRun, JobRunId, JobRunStatus, JobTarget, Tag, TagId,
};

use crate::error::StoreError;

/// The repository interface the core consumes, matching spec §6's
/// "Datastore contract". Implementations may be SQL-backed, embedded, or
/// in-memory; the core requires only these semantics.
///
/// Device/Tag/Credential/JobDefinition are user-managed records that
/// outlive any job run; the core only ever *reads* them here (their CRUD
/// lifecycle belongs to the REST surface this crate does not implement).
/// JobRun/DeviceResult/JobLogEntry are owned by the core and written here.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    // ── Job definitions (read-only from the core's perspective) ──────────────

    async fn list_active_job_definitions(&self) -> Result<Vec<JobDefinition>, StoreError>;
    async fn get_job_definition(&self, id: JobDefinitionId) -> Result<Option<JobDefinition>, StoreError>;

    // ── Devices, tags, credentials (read-only) ────────────────────────────────

    async fn resolve_devices_for_target(&self, target: &JobTarget) -> Result<Vec<Device>, StoreError>;
    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError>;
    async fn list_credentials_for_device(&self, device: &Device) -> Result<Vec<Credential>, StoreError>;
    async fn decrypt_secret(&self, ciphertext: &[u8]) -> Result<Vec<u8>, StoreError>;

    /// Spec's open question: a `reachability` job updates
    /// `last_reachability_status` even without opening a session. Exposed so
    /// the dispatcher can call it uniformly for every job type.
    async fn set_device_reachability(
        &self,
        device_id: DeviceId,
        status: netraven_domain::ReachabilityStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // ── Job runs ───────────────────────────────────────────────────────────────

    /// Atomically creates a PENDING job run for `job_definition_id`, or
    /// returns `StoreError::Overlapping` if one is already RUNNING. The
    /// overlap check and the insert happen in the same transaction/critical
    /// section so two concurrent callers can never both succeed.
    async fn create_job_run(
        &self,
        job_definition_id: JobDefinitionId,
        device_subset: Option<Vec<DeviceId>>,
    ) -> Result<JobRun, StoreError>;

    async fn get_job_run(&self, id: JobRunId) -> Result<Option<JobRun>, StoreError>;

    #[allow(clippy::too_many_arguments)]
    async fn set_job_run_status(
        &self,
        id: JobRunId,
        status: JobRunStatus,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        succeeded_devices: u32,
        failed_devices: u32,
        total_devices: u32,
    ) -> Result<(), StoreError>;

    /// For the scheduler's overlap guard and crash recovery.
    async fn list_pending_or_running_job_runs_for(
        &self,
        job_definition_id: JobDefinitionId,
    ) -> Result<Vec<JobRun>, StoreError>;

    /// All runs left RUNNING or PENDING by a prior process (used at startup
    /// for crash recovery — a crash can land between creation and dispatch).
    async fn list_pending_or_running_job_runs(&self) -> Result<Vec<JobRun>, StoreError>;

    // ── Device results ─────────────────────────────────────────────────────────

    async fn upsert_device_result(&self, result: &DeviceResult) -> Result<(), StoreError>;
    async fn list_device_results(&self, job_run_id: JobRunId) -> Result<Vec<DeviceResult>, StoreError>;

    // ── Job log entries ──────────────────────────────────────────────────────

    async fn append_job_log(&self, entry: &JobLogEntry) -> Result<(), StoreError>;
    async fn list_job_logs(
        &self,
        job_run_id: JobRunId,
        device_id: Option<DeviceId>,
    ) -> Result<Vec<JobLogEntry>, StoreError>;

    // ── Credential outcomes ────────────────────────────────────────────────────

    async fn record_credential_outcome(
        &self,
        credential_id: CredentialId,
        tag_id: Option<TagId>,
        success: bool,
    ) -> Result<(), StoreError>;

    /// Per-(credential, tag) success count, when that pairing has been
    /// recorded before — used by the resolver's ordering rule (4.A step 3b).
    async fn credential_tag_success_count(
        &self,
        credential_id: CredentialId,
        tag_id: TagId,
    ) -> Result<Option<u64>, StoreError>;

    // ── Content-addressed blob store ────────────────────────────────────────

    /// Writes `bytes` under `hash` if not already present. Returns `true` if
    /// this call performed the write, `false` if the hash already existed
    /// (idempotent dedupe, spec invariant 5).
    async fn put_blob(&self, hash: &str, bytes: &[u8]) -> Result<bool, StoreError>;
    async fn has_blob(&self, hash: &str) -> Result<bool, StoreError>;
    async fn get_blob(&self, hash: &str) -> Result<Option<Vec<u8>>, StoreError>;

    // ── Administrative seams ───────────────────────────────────────────────────
    //
    // Validating and authorizing writes to these tables is the REST CRUD
    // surface's job, not the core's; these seams exist so test fixtures and
    // the CLI's local bootstrap path have somewhere to land rows. The
    // dispatcher and scheduler never call them.

    async fn upsert_tag(&self, tag: &Tag) -> Result<(), StoreError>;
    async fn upsert_device(&self, device: &Device) -> Result<(), StoreError>;
    async fn upsert_credential(&self, credential: &Credential) -> Result<(), StoreError>;
    async fn upsert_job_definition(&self, def: &JobDefinition) -> Result<(), StoreError>;
}
