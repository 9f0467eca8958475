use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use netraven_domain::{
    Device, DeviceResult, DeviceResultStatus, JobRun, JobRunId, JobRunStatus, LogCategory, LogLevel,
    ReachabilityStatus,
};
use netraven_logging::LogSink;
use netraven_session::{Driver, DriverRegistry, SessionConfig, SessionError};
use netraven_store::JobStore;
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::credentials::CredentialResolver;
use crate::error::DispatchError;
use crate::handlers::{HandlerContext, HandlerRegistry};

/// Fans a job run out to its target devices and aggregates outcomes (spec
/// §4.D). One `Dispatcher` is shared by the scheduler and the manual-
/// trigger HTTP/CLI paths.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    driver_registry: Arc<DriverRegistry>,
    handler_registry: Arc<HandlerRegistry>,
    log_sink: Arc<LogSink>,
    session_config: SessionConfig,
    max_concurrent_devices: usize,
    /// One cancellation token per in-flight run; workers check it at each
    /// pipeline step boundary (spec §5 "cancellation semantics").
    cancellations: Mutex<HashMap<JobRunId, CancellationToken>>,
}

struct DeviceOutcome {
    result: DeviceResult,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        driver_registry: Arc<DriverRegistry>,
        handler_registry: Arc<HandlerRegistry>,
        log_sink: Arc<LogSink>,
        session_config: SessionConfig,
        max_concurrent_devices: usize,
    ) -> Self {
        Dispatcher {
            store,
            driver_registry,
            handler_registry,
            log_sink,
            session_config,
            max_concurrent_devices: max_concurrent_devices.max(1),
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    /// Cooperative cancellation: flips the run's flag. Workers observe it
    /// at the next step boundary; this call itself never blocks on a
    /// worker finishing.
    pub async fn cancel(&self, job_run_id: JobRunId) {
        let guard = self.cancellations.lock().await;
        if let Some(token) = guard.get(&job_run_id) {
            token.cancel();
        }
    }

    /// Entry point (spec §4.D). Precondition: `job_run.status == PENDING`.
    pub async fn dispatch(&self, job_run_id: JobRunId) -> Result<JobRun, DispatchError> {
        let job_run = self
            .store
            .get_job_run(job_run_id)
            .await?
            .ok_or_else(|| DispatchError::JobRunNotFound(job_run_id.to_string()))?;

        if job_run.status != JobRunStatus::Pending {
            return Err(DispatchError::NotPending(job_run_id.to_string()));
        }

        let job_def = self
            .store
            .get_job_definition(job_run.job_definition_id)
            .await?
            .ok_or_else(|| DispatchError::JobDefinitionNotFound(job_run.job_definition_id.to_string()))?;

        let started_at = Utc::now();
        self.store
            .set_job_run_status(job_run_id, JobRunStatus::Running, Some(started_at), None, 0, 0, 0)
            .await?;
        self.log_sink
            .emit(job_run_id, None, LogLevel::Info, LogCategory::Dispatcher, "dispatch started", Default::default())
            .await;

        let token = CancellationToken::new();
        self.cancellations.lock().await.insert(job_run_id, token.clone());

        let dispatch_result = self.run(job_run_id, &job_def, &job_run, &token).await;

        self.cancellations.lock().await.remove(&job_run_id);

        match dispatch_result {
            Ok(()) => Ok(self
                .store
                .get_job_run(job_run_id)
                .await?
                .ok_or_else(|| DispatchError::JobRunNotFound(job_run_id.to_string()))?),
            Err(e) => {
                warn!(job_run_id = %job_run_id, error = %e, "dispatcher error before aggregation");
                self.log_sink
                    .emit(
                        job_run_id,
                        None,
                        LogLevel::Error,
                        LogCategory::Dispatcher,
                        format!("dispatcher error: {e}"),
                        Default::default(),
                    )
                    .await;
                self.store
                    .set_job_run_status(
                        job_run_id,
                        JobRunStatus::FailedDispatcherError,
                        Some(started_at),
                        Some(Utc::now()),
                        0,
                        0,
                        0,
                    )
                    .await?;
                Ok(self
                    .store
                    .get_job_run(job_run_id)
                    .await?
                    .ok_or_else(|| DispatchError::JobRunNotFound(job_run_id.to_string()))?)
            }
        }
    }

    async fn run(
        &self,
        job_run_id: JobRunId,
        job_def: &netraven_domain::JobDefinition,
        job_run: &JobRun,
        token: &CancellationToken,
    ) -> Result<(), DispatchError> {
        let devices = self.resolve_targets(job_def, job_run).await?;

        if devices.is_empty() {
            self.log_sink
                .emit(
                    job_run_id,
                    None,
                    LogLevel::Info,
                    LogCategory::Dispatcher,
                    "no target devices resolved",
                    Default::default(),
                )
                .await;
            self.store
                .set_job_run_status(
                    job_run_id,
                    JobRunStatus::CompletedNoDevices,
                    None,
                    Some(Utc::now()),
                    0,
                    0,
                    0,
                )
                .await?;
            return Ok(());
        }

        for device in &devices {
            self.store.upsert_device_result(&DeviceResult::pending(job_run_id, device.id)).await?;
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_devices));
        let mut handles = Vec::with_capacity(devices.len());

        for device in devices {
            if token.is_cancelled() {
                let mut result = DeviceResult::pending(job_run_id, device.id);
                result.status = DeviceResultStatus::Failed;
                result.started_at = Some(Utc::now());
                result.completed_at = Some(Utc::now());
                result.error_code = Some("cancelled".to_string());
                result.error_message = Some("job run cancelled before this device started".to_string());
                self.store.upsert_device_result(&result).await?;
                continue;
            }

            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                DispatchError::Internal(format!("semaphore closed: {e}"))
            })?;
            let store = self.store.clone();
            let driver_registry = self.driver_registry.clone();
            let handler_registry = self.handler_registry.clone();
            let log_sink = self.log_sink.clone();
            let session_config = self.session_config;
            let job_type = job_def.job_type.clone();
            let params = job_def.parameters.clone();
            let token = token.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                run_device_worker(
                    store,
                    driver_registry,
                    handler_registry,
                    log_sink,
                    session_config,
                    job_run_id,
                    device,
                    job_type,
                    params,
                    token,
                )
                .await
            }));
        }

        for handle in handles {
            let _: DeviceOutcome =
                handle.await.map_err(|e| DispatchError::Internal(format!("worker task panicked: {e}")))?;
        }

        // Read the aggregate back from the store rather than from the
        // handles above: devices skipped up-front by the cancellation
        // check never spawned a worker, so only the store has the full set.
        let persisted = self.store.list_device_results(job_run_id).await?;
        let total = persisted.len() as u32;
        let succeeded = persisted.iter().filter(|r| r.status == DeviceResultStatus::Completed).count() as u32;
        let failed = persisted.iter().filter(|r| r.status == DeviceResultStatus::Failed).count() as u32;
        let all_no_credentials = total > 0
            && failed == total
            && persisted.iter().all(|r| r.error_code.as_deref() == Some("no_credentials"));

        let status = if total == 0 {
            JobRunStatus::CompletedNoDevices
        } else if all_no_credentials {
            JobRunStatus::CompletedNoCredentials
        } else if succeeded == total {
            JobRunStatus::CompletedSuccess
        } else if failed == total {
            JobRunStatus::CompletedFailure
        } else if succeeded > 0 && succeeded < total {
            JobRunStatus::CompletedPartialFailure
        } else {
            JobRunStatus::FailedUnexpected
        };

        self.log_sink
            .emit(
                job_run_id,
                None,
                LogLevel::Info,
                LogCategory::Dispatcher,
                format!("dispatch finished: {status} ({succeeded}/{total} succeeded)"),
                Default::default(),
            )
            .await;

        self.store
            .set_job_run_status(job_run_id, status, None, Some(Utc::now()), succeeded, failed, total)
            .await?;

        Ok(())
    }

    async fn resolve_targets(
        &self,
        job_def: &netraven_domain::JobDefinition,
        job_run: &JobRun,
    ) -> Result<Vec<Device>, DispatchError> {
        let mut devices = if let Some(subset) = &job_run.device_subset {
            let mut out = Vec::with_capacity(subset.len());
            for id in subset {
                if let Some(device) = self.store.get_device(*id).await? {
                    out.push(device);
                }
            }
            out
        } else {
            self.store.resolve_devices_for_target(&job_def.target).await?
        };

        let mut seen = std::collections::HashSet::new();
        devices.retain(|d| seen.insert(d.id));
        Ok(devices)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_device_worker(
    store: Arc<dyn JobStore>,
    driver_registry: Arc<DriverRegistry>,
    handler_registry: Arc<HandlerRegistry>,
    log_sink: Arc<LogSink>,
    session_config: SessionConfig,
    job_run_id: JobRunId,
    device: Device,
    job_type: String,
    params: serde_json::Map<String, serde_json::Value>,
    token: CancellationToken,
) -> DeviceOutcome {
    let started_at = Utc::now();
    let mut result = DeviceResult::pending(job_run_id, device.id);
    result.status = DeviceResultStatus::Running;
    result.started_at = Some(started_at);
    let _ = store.upsert_device_result(&result).await;

    log_sink
        .emit(
            job_run_id,
            Some(device.id),
            LogLevel::Info,
            LogCategory::Dispatcher,
            "device worker started",
            Default::default(),
        )
        .await;

    let outcome = run_device_pipeline(
        &store,
        &driver_registry,
        &handler_registry,
        &log_sink,
        session_config,
        job_run_id,
        &device,
        &job_type,
        &params,
        &token,
    )
    .await;

    let completed_at = Utc::now();
    result.completed_at = Some(completed_at);
    match outcome {
        Ok(payload) => {
            result.status = DeviceResultStatus::Completed;
            result.payload = Some(payload);
        }
        Err((code, message, credential_id)) => {
            result.status = DeviceResultStatus::Failed;
            result.error_code = Some(code.to_string());
            result.error_message = Some(message);
            result.credential_id = credential_id;
        }
    }

    log_sink
        .emit(
            job_run_id,
            Some(device.id),
            LogLevel::Info,
            LogCategory::Dispatcher,
            format!("device worker finished: {:?}", result.status),
            Default::default(),
        )
        .await;

    let _ = store.upsert_device_result(&result).await;
    DeviceOutcome { result }
}

type PipelineError = (&'static str, String, Option<netraven_domain::CredentialId>);

#[allow(clippy::too_many_arguments)]
async fn run_device_pipeline(
    store: &Arc<dyn JobStore>,
    driver_registry: &Arc<DriverRegistry>,
    handler_registry: &Arc<HandlerRegistry>,
    log_sink: &Arc<LogSink>,
    session_config: SessionConfig,
    job_run_id: JobRunId,
    device: &Device,
    job_type: &str,
    params: &serde_json::Map<String, serde_json::Value>,
    token: &CancellationToken,
) -> Result<serde_json::Value, PipelineError> {
    let handler = handler_registry
        .get(job_type)
        .ok_or_else(|| ("unknown_job_type", format!("no handler registered for type '{job_type}'"), None))?;

    let driver = driver_registry.for_device(device).map_err(|e| ("no_driver", e.to_string(), None))?;

    let probe = driver.probe(device, &session_config).await;
    log_sink
        .emit(
            job_run_id,
            Some(device.id),
            LogLevel::Info,
            LogCategory::Connection,
            "reachability probe complete",
            json_context(&probe),
        )
        .await;

    let reachability = if probe.any_succeeded() { ReachabilityStatus::Reachable } else { ReachabilityStatus::Unreachable };
    let _ = store.set_device_reachability(device.id, reachability, Utc::now()).await;

    if !handler.requires_session() {
        let ctx = HandlerContext { device, params, probe, session: None, store: store.clone() };
        return handler.execute(ctx).await.map_err(|e| ("handler_error", e.to_string(), None));
    }

    if !probe.any_succeeded() {
        return Err(("unreachable", "no reachability probe succeeded".to_string(), None));
    }

    if token.is_cancelled() {
        return Err(("cancelled", "job run cancelled before credentials were resolved".to_string(), None));
    }

    let resolver = CredentialResolver::new(store.clone());
    let candidates = resolver
        .resolve(device)
        .await
        .map_err(|_| ("no_credentials", "no credential candidates matched this device".to_string(), None))?;

    let mut session = None;
    let mut used_credential_id = None;

    for candidate in &candidates {
        if token.is_cancelled() {
            return Err(("cancelled", "job run cancelled during credential rotation".to_string(), None));
        }

        let secret = match candidate.decrypt_secret().await {
            Ok(s) => s,
            Err(e) => {
                warn!(device_id = %device.id, credential_id = %candidate.credential_id, "secret decryption failed, skipping candidate");
                log_sink
                    .emit(
                        job_run_id,
                        Some(device.id),
                        LogLevel::Warning,
                        LogCategory::Connection,
                        format!("credential decrypt failed: {e}"),
                        Default::default(),
                    )
                    .await;
                continue;
            }
        };

        log_sink
            .emit(
                job_run_id,
                Some(device.id),
                LogLevel::Debug,
                LogCategory::Connection,
                "auth attempt",
                Default::default(),
            )
            .await;

        match driver.open(device, &candidate.username, &secret, &session_config).await {
            Ok(s) => {
                candidate.record_success().await;
                session = Some(s);
                used_credential_id = Some(candidate.credential_id);
                break;
            }
            Err(SessionError::AuthFailed) => {
                candidate.record_failure().await;
                log_sink
                    .emit(
                        job_run_id,
                        Some(device.id),
                        LogLevel::Warning,
                        LogCategory::Connection,
                        "authentication failed, rotating to next credential",
                        Default::default(),
                    )
                    .await;
                continue;
            }
            Err(SessionError::Unreachable) => {
                return Err(("unreachable", "device became unreachable while opening session".to_string(), None));
            }
            Err(e) => {
                return Err(("device_error", e.to_string(), None));
            }
        }
    }

    let mut session = match session {
        Some(s) => s,
        None => return Err(("auth_exhausted", "all credential candidates were rejected".to_string(), None)),
    };

    let ctx = HandlerContext { device, params, probe, session: Some(session.as_mut()), store: store.clone() };
    let handler_result = handler.execute(ctx).await;

    session.close().await;
    log_sink
        .emit(job_run_id, Some(device.id), LogLevel::Debug, LogCategory::Connection, "disconnected", Default::default())
        .await;

    handler_result.map_err(|e| ("handler_error", e.to_string(), used_credential_id))
}

fn json_context(probe: &netraven_session::ReachabilityProbe) -> serde_json::Map<String, serde_json::Value> {
    let mut ctx = serde_json::Map::new();
    ctx.insert("icmp".into(), json!(probe.icmp));
    ctx.insert("tcp_22".into(), json!(probe.tcp_22));
    ctx.insert("tcp_443".into(), json!(probe.tcp_443));
    ctx.insert("latency_ms".into(), json!(probe.latency_ms));
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use netraven_domain::{DeviceId, JobDefinition, JobDefinitionId, JobTarget, Schedule};
    use netraven_logging::{LogHub, Redactor};
    use netraven_session::{GenericLineDriver, OpenOutcome, ScriptedDriver};
    use netraven_store::InMemoryStore;
    use std::collections::HashSet;

    fn dispatcher(store: Arc<dyn JobStore>, driver_registry: DriverRegistry) -> Dispatcher {
        let hub = Arc::new(LogHub::new());
        let sink = Arc::new(LogSink::new(store.clone(), hub, Redactor::empty()));
        Dispatcher::new(
            store,
            Arc::new(driver_registry),
            Arc::new(HandlerRegistry::with_builtins()),
            sink,
            SessionConfig::default(),
            3,
        )
    }

    fn device(family: &str, tags: HashSet<netraven_domain::TagId>) -> Device {
        Device {
            id: DeviceId::new(),
            hostname: "sw1".into(),
            address: "10.0.0.1".into(),
            device_family: family.into(),
            port: 22,
            tags,
            last_reachability_status: Default::default(),
            last_updated_at: None,
        }
    }

    async fn backup_job_def(target: JobTarget) -> JobDefinition {
        JobDefinition {
            id: JobDefinitionId::new(),
            name: "nightly backup".into(),
            job_type: "backup".into(),
            target,
            schedule: Schedule::Interval { period_seconds: 3600, fire_immediately: false },
            enabled: true,
            parameters: Default::default(),
        }
    }

    #[tokio::test]
    async fn no_devices_terminates_completed_no_devices() {
        let memstore = InMemoryStore::new();
        let tag = netraven_domain::TagId::new();
        let mut target_tags = HashSet::new();
        target_tags.insert(tag);
        let job_def = backup_job_def(JobTarget::Tags(target_tags)).await;
        memstore.upsert_job_definition(&job_def).await.unwrap();
        let run = memstore.create_job_run(job_def.id, None).await.unwrap();

        let store: Arc<dyn JobStore> = Arc::new(memstore);
        let d = dispatcher(store.clone(), DriverRegistry::new());
        let result = d.dispatch(run.id).await.unwrap();
        assert_eq!(result.status, JobRunStatus::CompletedNoDevices);
        assert_eq!(result.total_devices, 0);
    }

    #[tokio::test]
    async fn all_success_backup_stores_artifact_and_bumps_success_count() {
        let memstore = InMemoryStore::new();
        let tag = netraven_domain::TagId::new();
        let mut tags = HashSet::new();
        tags.insert(tag);
        let dev = device("scripted", tags.clone());
        memstore.upsert_device(&dev).await.unwrap();

        let cred = netraven_domain::Credential {
            id: netraven_domain::CredentialId::new(),
            username: "admin".into(),
            encrypted_secret: memstore.encrypt_secret(b"hunter2"),
            priority: 10,
            tags: tags.clone(),
            success_count: 0,
            failure_count: 0,
            last_used_at: None,
        };
        memstore.upsert_credential(&cred).await.unwrap();

        let job_def = backup_job_def(JobTarget::Device(dev.id)).await;
        memstore.upsert_job_definition(&job_def).await.unwrap();
        let run = memstore.create_job_run(job_def.id, None).await.unwrap();

        let store: Arc<dyn JobStore> = Arc::new(memstore);
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(ScriptedDriver::always_reachable()));
        let d = dispatcher(store.clone(), registry);

        let result = d.dispatch(run.id).await.unwrap();
        assert_eq!(result.status, JobRunStatus::CompletedSuccess);
        assert_eq!(result.succeeded_devices, 1);

        let results = store.list_device_results(run.id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, DeviceResultStatus::Completed);
        assert!(results[0].payload.as_ref().unwrap()["artifact_hash"].is_string());
    }

    #[tokio::test]
    async fn auth_rotation_succeeds_on_second_credential() {
        let memstore = InMemoryStore::new();
        let tag = netraven_domain::TagId::new();
        let mut tags = HashSet::new();
        tags.insert(tag);
        let dev = device("scripted", tags.clone());
        memstore.upsert_device(&dev).await.unwrap();

        let c1 = netraven_domain::Credential {
            id: netraven_domain::CredentialId::new(),
            username: "bad".into(),
            encrypted_secret: memstore.encrypt_secret(b"wrong"),
            priority: 10,
            tags: tags.clone(),
            success_count: 0,
            failure_count: 0,
            last_used_at: None,
        };
        let c2 = netraven_domain::Credential {
            id: netraven_domain::CredentialId::new(),
            username: "good".into(),
            encrypted_secret: memstore.encrypt_secret(b"right"),
            priority: 20,
            tags: tags.clone(),
            success_count: 0,
            failure_count: 0,
            last_used_at: None,
        };
        memstore.upsert_credential(&c1).await.unwrap();
        memstore.upsert_credential(&c2).await.unwrap();

        let job_def = backup_job_def(JobTarget::Device(dev.id)).await;
        memstore.upsert_job_definition(&job_def).await.unwrap();
        let run = memstore.create_job_run(job_def.id, None).await.unwrap();

        let store: Arc<dyn JobStore> = Arc::new(memstore);
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(ScriptedDriver::new(
            netraven_session::ReachabilityProbe { icmp: true, tcp_22: true, tcp_443: false, latency_ms: Some(2) },
            vec![OpenOutcome::AuthFailed, OpenOutcome::Success],
        )));
        let d = dispatcher(store.clone(), registry);

        let result = d.dispatch(run.id).await.unwrap();
        assert_eq!(result.status, JobRunStatus::CompletedSuccess);
    }

    #[tokio::test]
    async fn unknown_job_type_fails_with_that_code() {
        let memstore = InMemoryStore::new();
        let dev = device("scripted", HashSet::new());
        memstore.upsert_device(&dev).await.unwrap();

        let mut job_def = backup_job_def(JobTarget::Device(dev.id)).await;
        job_def.job_type = "does_not_exist".into();
        memstore.upsert_job_definition(&job_def).await.unwrap();
        let run = memstore.create_job_run(job_def.id, None).await.unwrap();

        let store: Arc<dyn JobStore> = Arc::new(memstore);
        let d = dispatcher(store.clone(), DriverRegistry::new());
        let result = d.dispatch(run.id).await.unwrap();
        assert_eq!(result.status, JobRunStatus::CompletedFailure);

        let results = store.list_device_results(run.id).await.unwrap();
        assert_eq!(results[0].error_code.as_deref(), Some("unknown_job_type"));
    }

    // Smoke-check the generic line driver type still satisfies the trait
    // object bound the registry needs; exercised end-to-end in
    // `netraven-session`, not duplicated here.
    #[test]
    fn generic_driver_registers() {
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(GenericLineDriver::new()));
        assert!(registry.registered_families().contains(&"generic".to_string()));
    }
}
