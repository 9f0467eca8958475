use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use netraven_config::{load_config, RuntimeConfig, StoreBackend};
use netraven_dispatcher::{Dispatcher, HandlerRegistry, Scheduler};
use netraven_domain::{
    Credential, CredentialId, Device, DeviceId, JobDefinition, JobDefinitionId, JobTarget, Schedule, Tag, TagId,
};
use netraven_logging::{LogHub, LogSink, Redactor};
use netraven_session::{DriverRegistry, GenericLineDriver, SessionConfig};
use netraven_store::{InMemoryStore, JobStore, PostgresStore, RedbStore, SecretCodec};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cli::SeedCommand;
use crate::output;

// ── Serve ─────────────────────────────────────────────────────────────────────

pub async fn serve(config_path: PathBuf, rotate_token: bool) -> Result<()> {
    let cfg = load_config(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;

    let store = open_store(&cfg).await?;

    let mut driver_registry = DriverRegistry::new();
    driver_registry.register(Arc::new(GenericLineDriver::new()));
    let driver_registry = Arc::new(driver_registry);

    let handler_registry = Arc::new(HandlerRegistry::with_builtins());

    let redactor = Redactor::new(&cfg.redaction_patterns)
        .map_err(|e| anyhow::anyhow!("invalid log.redaction_patterns: {e}"))?;
    let log_hub = Arc::new(LogHub::new());
    let log_sink = Arc::new(LogSink::new(store.clone(), log_hub.clone(), redactor));

    let session_config = SessionConfig {
        connect_timeout: cfg.connect_timeout,
        command_timeout: cfg.command_timeout,
        icmp_timeout: cfg.icmp_timeout,
    };

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        driver_registry,
        handler_registry.clone(),
        log_sink.clone(),
        session_config,
        cfg.max_concurrent_devices as usize,
    ));

    let token = resolve_server_token(&cfg, rotate_token)?;

    let mut scheduler = Scheduler::new(store.clone(), dispatcher.clone(), log_sink, cfg.max_concurrent_job_runs as usize);
    scheduler.recover_crashed_runs().await.context("crash recovery failed")?;
    scheduler.rebuild_queue().await.context("failed to rebuild scheduler queue")?;

    let (commands_tx, commands_rx) = mpsc::channel(64);
    tokio::spawn(scheduler.run(commands_rx));

    let app = netraven_api::build_app(store, dispatcher, handler_registry, log_hub, commands_tx, Arc::new(token));

    println!("Starting NetRaven on http://{}", cfg.api_bind_address);
    let listener = tokio::net::TcpListener::bind(cfg.api_bind_address)
        .await
        .with_context(|| format!("failed to bind to {}", cfg.api_bind_address))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

async fn open_store(cfg: &RuntimeConfig) -> Result<Arc<dyn JobStore>> {
    Ok(match &cfg.store_backend {
        StoreBackend::Memory => Arc::new(InMemoryStore::with_encryption_key(&cfg.encryption_key)),
        StoreBackend::Postgres { url } => {
            Arc::new(PostgresStore::connect(url).await.context("failed to connect to postgres store")?)
        }
        StoreBackend::Redb { path } => {
            Arc::new(RedbStore::open(Path::new(path), &cfg.encryption_key).context("failed to open redb store")?)
        }
    })
}

/// Config wins when `api.bearer_token` is set; otherwise reuse or generate
/// the cached token at `~/.netraven/token`.
fn resolve_server_token(cfg: &RuntimeConfig, rotate: bool) -> Result<String> {
    if let Some(configured) = &cfg.api_bearer_token {
        return Ok(configured.clone());
    }

    let path = default_token_path();
    if !rotate {
        if let Ok(existing) = std::fs::read_to_string(&path) {
            let existing = existing.trim().to_string();
            if !existing.is_empty() {
                println!("Reusing existing token from {}", path.display());
                return Ok(existing);
            }
        }
    }

    let token = generate_token();
    write_token(&path, &token)?;
    println!("{} token written to {}", if rotate { "Rotated" } else { "Generated" }, path.display());
    Ok(token)
}

// ── Trigger ───────────────────────────────────────────────────────────────────

pub async fn trigger(remote: Option<String>, token: Option<String>, job_definition_id: Uuid, devices: Vec<Uuid>) -> Result<()> {
    let token = resolve_token(token)?;
    let url = server_url(remote);
    let client = authed_client(&token)?;

    let body = serde_json::json!({
        "job_definition_id": job_definition_id,
        "device_ids": devices,
    });

    let resp = client
        .post(format!("{}/job-runs", url.trim_end_matches('/')))
        .json(&body)
        .send()
        .await
        .with_context(|| format!("failed to reach server at {url}"))?;

    let status = resp.status();
    let run: serde_json::Value = resp.json().await?;
    if !status.is_success() {
        anyhow::bail!("trigger failed: {} — {}", status, run.get("error").and_then(|e| e.as_str()).unwrap_or(""));
    }
    print!("{}", output::render_job_run(&run));
    Ok(())
}

// ── Status ────────────────────────────────────────────────────────────────────

pub async fn show_status(remote: Option<String>, token: Option<String>, job_run_id: Uuid) -> Result<()> {
    let token = resolve_token(token)?;
    let url = server_url(remote);
    let client = authed_client(&token)?;
    let base = url.trim_end_matches('/');

    let run: serde_json::Value = client
        .get(format!("{base}/job-runs/{job_run_id}"))
        .send()
        .await
        .with_context(|| format!("failed to reach server at {url}"))?
        .json()
        .await?;
    print!("{}", output::render_job_run(&run));

    let results: Vec<serde_json::Value> = client
        .get(format!("{base}/job-runs/{job_run_id}/device-results"))
        .send()
        .await?
        .json()
        .await?;
    print!("{}", output::render_device_results(&results));
    Ok(())
}

// ── Logs ──────────────────────────────────────────────────────────────────────

pub async fn logs(remote: Option<String>, token: Option<String>, job_run_id: Uuid, device: Option<Uuid>, follow: bool) -> Result<()> {
    let token = resolve_token(token)?;
    let url = server_url(remote);
    let client = authed_client(&token)?;
    let base = url.trim_end_matches('/');

    if follow {
        let resp = client
            .get(format!("{base}/job-runs/{job_run_id}/logs/stream"))
            .send()
            .await
            .with_context(|| format!("failed to reach server at {url}"))?;

        let mut stream = resp.bytes_stream();
        let mut buf = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("log stream interrupted")?;
            buf.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buf.find("\n\n") {
                let event: String = buf.drain(..pos + 2).collect();
                for line in event.lines() {
                    let Some(data) = line.strip_prefix("data: ") else { continue };
                    let Ok(entry) = serde_json::from_str::<serde_json::Value>(data) else { continue };
                    let matches_filter = match device {
                        Some(d) => entry["device_id"].as_str() == Some(d.to_string().as_str()),
                        None => true,
                    };
                    if matches_filter {
                        print!("{}", output::render_log_entry(&entry));
                    }
                }
            }
        }
    } else {
        let mut endpoint = format!("{base}/job-runs/{job_run_id}/logs");
        if let Some(d) = device {
            endpoint.push_str(&format!("?device_id={d}"));
        }
        let entries: Vec<serde_json::Value> = client.get(&endpoint).send().await?.json().await?;
        print!("{}", output::render_log_entries(&entries));
    }
    Ok(())
}

// ── Cancel / retry-failed ─────────────────────────────────────────────────────

pub async fn cancel(remote: Option<String>, token: Option<String>, job_run_id: Uuid) -> Result<()> {
    let token = resolve_token(token)?;
    let url = server_url(remote);
    let client = authed_client(&token)?;
    let resp = client
        .post(format!("{}/job-runs/{job_run_id}/cancel", url.trim_end_matches('/')))
        .send()
        .await
        .with_context(|| format!("failed to reach server at {url}"))?;
    if resp.status().is_success() {
        println!("cancellation requested for {job_run_id}");
        Ok(())
    } else {
        anyhow::bail!("cancel failed: {}", resp.status())
    }
}

pub async fn retry_failed(remote: Option<String>, token: Option<String>, job_run_id: Uuid) -> Result<()> {
    let token = resolve_token(token)?;
    let url = server_url(remote);
    let client = authed_client(&token)?;
    let resp = client
        .post(format!("{}/job-runs/{job_run_id}/retry-failed", url.trim_end_matches('/')))
        .send()
        .await
        .with_context(|| format!("failed to reach server at {url}"))?;
    let status = resp.status();
    let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
    if status.is_success() {
        print!("{}", output::render_job_run(&body));
        Ok(())
    } else {
        anyhow::bail!("retry-failed failed: {} — {}", status, body.get("error").and_then(|e| e.as_str()).unwrap_or(""))
    }
}

// ── Job definitions / handlers ────────────────────────────────────────────────

pub async fn job_defs(remote: Option<String>, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let url = server_url(remote);
    let client = authed_client(&token)?;
    let defs: Vec<serde_json::Value> = client
        .get(format!("{}/job-definitions", url.trim_end_matches('/')))
        .send()
        .await
        .with_context(|| format!("failed to reach server at {url}"))?
        .json()
        .await?;
    print!("{}", output::render_job_definitions(&defs));
    Ok(())
}

pub async fn handlers(remote: Option<String>, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let url = server_url(remote);
    let client = authed_client(&token)?;
    let handlers: Vec<serde_json::Value> = client
        .get(format!("{}/handlers", url.trim_end_matches('/')))
        .send()
        .await
        .with_context(|| format!("failed to reach server at {url}"))?
        .json()
        .await?;
    print!("{}", output::render_handlers(&handlers));
    Ok(())
}

// ── Seed (local bootstrap path, bypasses HTTP entirely) ───────────────────────

pub async fn seed(config_path: PathBuf, command: SeedCommand) -> Result<()> {
    let cfg = load_config(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;
    let store = open_store(&cfg).await?;

    match command {
        SeedCommand::Tag { name, kind } => {
            let tag = Tag { id: TagId::new(), name, kind };
            store.upsert_tag(&tag).await?;
            println!("{}", tag.id);
        }
        SeedCommand::Device { hostname, address, family, port, tags } => {
            let device = Device {
                id: DeviceId::new(),
                hostname,
                address,
                device_family: family,
                port,
                tags: tags.into_iter().map(TagId::from_uuid).collect(),
                last_reachability_status: Default::default(),
                last_updated_at: None,
            };
            device.validate().context("device failed validation")?;
            store.upsert_device(&device).await?;
            println!("{}", device.id);
        }
        SeedCommand::Credential { username, secret_env, priority, tags } => {
            let secret = std::env::var(&secret_env)
                .with_context(|| format!("environment variable {secret_env} is not set"))?;
            let codec = SecretCodec::new(&cfg.encryption_key);
            let encrypted_secret = codec.encrypt(secret.as_bytes()).context("failed to encrypt secret")?;
            let credential = Credential {
                id: CredentialId::new(),
                username,
                encrypted_secret,
                priority,
                tags: tags.into_iter().map(TagId::from_uuid).collect(),
                success_count: 0,
                failure_count: 0,
                last_used_at: None,
            };
            store.upsert_credential(&credential).await?;
            println!("{}", credential.id);
        }
        SeedCommand::JobDef { name, job_type, device, tags, interval_seconds, fire_immediately, cron, once, disabled } => {
            let target = match (device, tags.is_empty()) {
                (Some(device_id), _) => JobTarget::Device(DeviceId::from_uuid(device_id)),
                (None, false) => JobTarget::Tags(tags.into_iter().map(TagId::from_uuid).collect()),
                (None, true) => anyhow::bail!("one of --device or --tag is required"),
            };

            let schedule = match (interval_seconds, &cron, &once) {
                (Some(period_seconds), None, None) => Schedule::Interval { period_seconds, fire_immediately },
                (None, Some(expression), None) => Schedule::Cron { expression: expression.clone() },
                (None, None, Some(at)) => {
                    let at: DateTime<Utc> = DateTime::parse_from_rfc3339(at)
                        .with_context(|| format!("invalid --once timestamp '{at}'"))?
                        .with_timezone(&Utc);
                    Schedule::OneTime { at }
                }
                _ => anyhow::bail!("exactly one of --interval-seconds, --cron, or --once is required"),
            };

            let def = JobDefinition {
                id: JobDefinitionId::new(),
                name,
                job_type,
                target,
                schedule,
                enabled: !disabled,
                parameters: Default::default(),
            };
            def.validate().context("job definition failed validation")?;
            store.upsert_job_definition(&def).await?;
            println!("{}", def.id);
        }
    }

    Ok(())
}

// ── Token / HTTP helpers ──────────────────────────────────────────────────────

fn generate_token() -> String {
    let a = Uuid::new_v4().to_string().replace('-', "");
    let b = Uuid::new_v4().to_string().replace('-', "");
    format!("{a}{b}")
}

/// Priority: explicit value (`--token` / `NETRAVEN_TOKEN`) → `~/.netraven/token` file.
fn resolve_token(explicit: Option<String>) -> Result<String> {
    if let Some(t) = explicit {
        return Ok(t);
    }
    let path = default_token_path();
    std::fs::read_to_string(&path).map(|s| s.trim().to_string()).with_context(|| {
        format!(
            "No token provided and could not read token file at {}. \
             Use --token, NETRAVEN_TOKEN, or run `netraven serve` first.",
            path.display()
        )
    })
}

fn write_token(path: &PathBuf, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, token).with_context(|| format!("failed to write token to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

fn default_token_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".netraven").join("token")
}

fn authed_client(token: &str) -> Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    let bearer = format!("Bearer {token}");
    headers.insert(
        reqwest::header::AUTHORIZATION,
        reqwest::header::HeaderValue::from_str(&bearer).context("token contains invalid header characters")?,
    );
    reqwest::Client::builder().default_headers(headers).build().context("failed to build HTTP client")
}

fn server_url(remote: Option<String>) -> String {
    remote.unwrap_or_else(|| "http://127.0.0.1:8080".into())
}
