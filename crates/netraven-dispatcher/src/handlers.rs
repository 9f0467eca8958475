use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use netraven_domain::Device;
use netraven_session::{ReachabilityProbe, Session};
use netraven_store::{content_hash, JobStore};
use serde_json::{json, Value};

use crate::error::HandlerError;

/// Everything a handler needs, assembled by the dispatcher before
/// `execute` is called. `session` is `None` for handlers that declare
/// `requires_session() == false` — the dispatcher never opens one for them
/// (spec §4.C: "`reachability`... does not call `Session.open`").
pub struct HandlerContext<'a> {
    pub device: &'a Device,
    pub params: &'a serde_json::Map<String, Value>,
    pub probe: ReachabilityProbe,
    pub session: Option<&'a mut (dyn Session + 'a)>,
    pub store: Arc<dyn JobStore>,
}

/// A registered job type (spec §4.C). The registry is the only thing the
/// dispatcher consults to run type-specific work; adding a handler never
/// requires a dispatcher change.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Registry key, matches `JobDefinition::job_type`.
    fn job_type(&self) -> &'static str;

    /// Human label for a UI to render, per §4.C's registry metadata.
    fn label(&self) -> &'static str;

    /// Whether the dispatcher must resolve credentials and open a session
    /// before calling `execute`. `reachability` is the one built-in
    /// exception.
    fn requires_session(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: HandlerContext<'_>) -> Result<Value, HandlerError>;
}

/// Metadata surfaced to a UI so it can render job-type forms dynamically,
/// per §4.C's "registry also provides metadata" clause.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HandlerMetadata {
    pub job_type: String,
    pub label: String,
    pub requires_session: bool,
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry { handlers: HashMap::new() }
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(handler.job_type().to_string(), handler);
        self
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn metadata(&self) -> Vec<HandlerMetadata> {
        let mut out: Vec<HandlerMetadata> = self
            .handlers
            .values()
            .map(|h| HandlerMetadata {
                job_type: h.job_type().to_string(),
                label: h.label().to_string(),
                requires_session: h.requires_session(),
            })
            .collect();
        out.sort_by(|a, b| a.job_type.cmp(&b.job_type));
        out
    }

    /// A registry with the built-in `backup` and `reachability` handlers,
    /// the set spec §4.C ships.
    pub fn with_builtins() -> Self {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(BackupHandler)).register(Arc::new(ReachabilityHandler));
        registry
    }
}

/// Normalizes CRLF/CR line endings to LF before hashing, so the same
/// logical configuration retrieved over different transports dedupes to
/// one blob.
fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Runs the driver-specific "show running configuration" command,
/// normalizes it, and dedupes against the content-addressed blob store
/// (spec §4.C, invariant 5: identical content shares one blob).
pub struct BackupHandler;

#[async_trait]
impl JobHandler for BackupHandler {
    fn job_type(&self) -> &'static str {
        "backup"
    }

    fn label(&self) -> &'static str {
        "Backup running configuration"
    }

    async fn execute(&self, ctx: HandlerContext<'_>) -> Result<Value, HandlerError> {
        let session = ctx
            .session
            .ok_or_else(|| HandlerError::Other("backup handler requires an open session".into()))?;

        let command = ctx
            .params
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or("show running-config");

        let raw = session.run(command).await?;
        let normalized = normalize_line_endings(&raw);
        let bytes = normalized.as_bytes();
        let hash = content_hash(bytes);

        let already_present = ctx.store.has_blob(&hash).await?;
        if !already_present {
            ctx.store.put_blob(&hash, bytes).await?;
        }

        Ok(json!({ "artifact_hash": hash, "bytes": bytes.len(), "deduped": already_present }))
    }
}

/// Reports the reachability probe the dispatcher already ran, without
/// opening a session or consuming a credential (spec §4.C).
pub struct ReachabilityHandler;

#[async_trait]
impl JobHandler for ReachabilityHandler {
    fn job_type(&self) -> &'static str {
        "reachability"
    }

    fn label(&self) -> &'static str {
        "Reachability check"
    }

    fn requires_session(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: HandlerContext<'_>) -> Result<Value, HandlerError> {
        let probe = ctx.probe;
        let mut errors = Vec::new();
        if !probe.icmp {
            errors.push("icmp_unreachable".to_string());
        }
        if !probe.tcp_22 {
            errors.push("tcp_22_unreachable".to_string());
        }
        if !probe.tcp_443 {
            errors.push("tcp_443_unreachable".to_string());
        }

        Ok(json!({
            "icmp": probe.icmp,
            "tcp_22": probe.tcp_22,
            "tcp_443": probe.tcp_443,
            "latency_ms": probe.latency_ms,
            "errors": errors,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netraven_domain::DeviceId;
    use netraven_session::SessionError;
    use netraven_store::InMemoryStore;

    fn device() -> Device {
        Device {
            id: DeviceId::new(),
            hostname: "sw1".into(),
            address: "10.0.0.1".into(),
            device_family: "generic".into(),
            port: 22,
            tags: Default::default(),
            last_reachability_status: Default::default(),
            last_updated_at: None,
        }
    }

    struct StubSession(String);

    #[async_trait]
    impl Session for StubSession {
        async fn run(&mut self, _command: &str) -> Result<String, SessionError> {
            Ok(self.0.clone())
        }
        async fn close(self: Box<Self>) {}
    }

    #[tokio::test]
    async fn backup_dedupes_identical_content() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new());
        let device = device();
        let params = serde_json::Map::new();
        let probe = ReachabilityProbe { icmp: true, tcp_22: true, tcp_443: false, latency_ms: Some(1) };

        let mut session = StubSession("hostname sw1\r\ninterface Gi0/1\r\n".to_string());
        let first = BackupHandler
            .execute(HandlerContext {
                device: &device,
                params: &params,
                probe,
                session: Some(&mut session),
                store: store.clone(),
            })
            .await
            .unwrap();
        assert_eq!(first["deduped"], json!(false));

        let mut session2 = StubSession("hostname sw1\ninterface Gi0/1\n".to_string());
        let second = BackupHandler
            .execute(HandlerContext {
                device: &device,
                params: &params,
                probe,
                session: Some(&mut session2),
                store: store.clone(),
            })
            .await
            .unwrap();
        assert_eq!(second["deduped"], json!(true));
        assert_eq!(first["artifact_hash"], second["artifact_hash"]);
    }

    #[tokio::test]
    async fn reachability_reports_probe_without_a_session() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new());
        let device = device();
        let params = serde_json::Map::new();
        let probe = ReachabilityProbe { icmp: false, tcp_22: true, tcp_443: false, latency_ms: Some(4) };

        let payload = ReachabilityHandler
            .execute(HandlerContext { device: &device, params: &params, probe, session: None, store })
            .await
            .unwrap();

        assert_eq!(payload["icmp"], json!(false));
        assert_eq!(payload["tcp_22"], json!(true));
        assert_eq!(payload["errors"], json!(["icmp_unreachable", "tcp_443_unreachable"]));
    }

    #[test]
    fn registry_builtins_are_registered() {
        let registry = HandlerRegistry::with_builtins();
        assert!(registry.get("backup").is_some());
        assert!(registry.get("reachability").is_some());
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.metadata().len(), 2);
    }
}
