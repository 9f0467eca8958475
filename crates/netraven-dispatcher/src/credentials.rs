use std::sync::Arc;

use netraven_domain::{Credential, CredentialId, Device, TagId};
use netraven_store::JobStore;
use tracing::warn;

use crate::error::DispatchError;

/// One credential offered by the resolver, paired with a callback to
/// record its outcome (spec §4.A, design note "credential iterator with
/// callback"). The secret is decrypted lazily, at the point a driver needs
/// it, so a candidate the worker never tries never holds plaintext.
pub struct CredentialCandidate {
    pub credential_id: CredentialId,
    pub username: String,
    encrypted_secret: Vec<u8>,
    /// The device tag this candidate's ordering was scored against, if any
    /// intersected — threaded back into `record_credential_outcome` so the
    /// (credential, tag) success pairing stays accurate.
    tag_for_outcome: Option<TagId>,
    store: Arc<dyn JobStore>,
}

impl CredentialCandidate {
    pub async fn decrypt_secret(&self) -> Result<Vec<u8>, DispatchError> {
        self.store
            .decrypt_secret(&self.encrypted_secret)
            .await
            .map_err(DispatchError::from)
    }

    pub async fn record_success(&self) {
        if let Err(e) = self
            .store
            .record_credential_outcome(self.credential_id, self.tag_for_outcome, true)
            .await
        {
            warn!(credential_id = %self.credential_id, error = %e, "failed to record credential success");
        }
    }

    /// Only called for *authentication* failures — network-unreachable
    /// failures never reach here (spec §4.A "side effects").
    pub async fn record_failure(&self) {
        if let Err(e) = self
            .store
            .record_credential_outcome(self.credential_id, self.tag_for_outcome, false)
            .await
        {
            warn!(credential_id = %self.credential_id, error = %e, "failed to record credential failure");
        }
    }
}

/// Resolves a device's ordered credential candidates (spec §4.A).
pub struct CredentialResolver {
    store: Arc<dyn JobStore>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        CredentialResolver { store }
    }

    /// Returns candidates ordered by: (a) ascending priority; (b)
    /// descending success-count for the best intersecting (credential, tag)
    /// pairing, falling back to the credential's global success-count when
    /// no pairing has been recorded; (c) ascending failure-count; (d)
    /// ascending id, for determinism.
    pub async fn resolve(&self, device: &Device) -> Result<Vec<CredentialCandidate>, DispatchError> {
        let candidates = self.store.list_credentials_for_device(device).await?;
        if candidates.is_empty() {
            return Err(DispatchError::NoCandidates);
        }

        let mut scored: Vec<(Credential, Option<TagId>, u64)> = Vec::with_capacity(candidates.len());
        for cred in candidates {
            let (tag, success_key) = self.best_tag_pairing(device, &cred).await?;
            scored.push((cred, tag, success_key));
        }

        scored.sort_by(|(a, _, a_succ), (b, _, b_succ)| {
            a.priority
                .cmp(&b.priority)
                .then(b_succ.cmp(a_succ))
                .then(a.failure_count.cmp(&b.failure_count))
                .then(a.id.cmp(&b.id))
        });

        Ok(scored
            .into_iter()
            .map(|(cred, tag, _)| CredentialCandidate {
                credential_id: cred.id,
                username: cred.username,
                encrypted_secret: cred.encrypted_secret,
                tag_for_outcome: tag,
                store: self.store.clone(),
            })
            .collect())
    }

    /// Finds the intersecting tag with the highest recorded (credential,
    /// tag) success count, falling back to the credential's global
    /// success-count when no pairing has ever been recorded for any
    /// intersecting tag.
    async fn best_tag_pairing(
        &self,
        device: &Device,
        cred: &Credential,
    ) -> Result<(Option<TagId>, u64), DispatchError> {
        let mut best: Option<(TagId, u64)> = None;
        for tag in cred.tags.intersection(&device.tags) {
            if let Some(count) = self.store.credential_tag_success_count(cred.id, *tag).await? {
                if best.map_or(true, |(_, b)| count > b) {
                    best = Some((*tag, count));
                }
            }
        }
        match best {
            Some((tag, count)) => Ok((Some(tag), count)),
            None => {
                let fallback_tag = cred.tags.intersection(&device.tags).next().copied();
                Ok((fallback_tag, cred.success_count))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netraven_domain::DeviceId;
    use netraven_store::InMemoryStore;
    use std::collections::HashSet;

    fn tag() -> TagId {
        TagId::new()
    }

    fn device_with_tag(t: TagId) -> Device {
        let mut tags = HashSet::new();
        tags.insert(t);
        Device {
            id: DeviceId::new(),
            hostname: "sw1".into(),
            address: "10.0.0.1".into(),
            device_family: "generic".into(),
            port: 22,
            tags,
            last_reachability_status: Default::default(),
            last_updated_at: None,
        }
    }

    fn credential(store: &InMemoryStore, priority: i32, tags: HashSet<TagId>) -> Credential {
        Credential {
            id: CredentialId::new(),
            username: "admin".into(),
            encrypted_secret: store.encrypt_secret(b"s3cret"),
            priority,
            tags,
            success_count: 0,
            failure_count: 0,
            last_used_at: None,
        }
    }

    #[tokio::test]
    async fn empty_candidate_set_is_no_candidates() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new());
        let resolver = CredentialResolver::new(store);
        let device = device_with_tag(tag());
        let err = resolver.resolve(&device).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoCandidates));
    }

    #[tokio::test]
    async fn orders_by_ascending_priority() {
        let memstore = InMemoryStore::new();
        let t = tag();
        let mut tags = HashSet::new();
        tags.insert(t);

        let low = credential(&memstore, 20, tags.clone());
        let high = credential(&memstore, 10, tags.clone());
        memstore.upsert_credential(&low).await.unwrap();
        memstore.upsert_credential(&high).await.unwrap();

        let store: Arc<dyn JobStore> = Arc::new(memstore);
        let resolver = CredentialResolver::new(store);
        let device = device_with_tag(t);

        let ordered = resolver.resolve(&device).await.unwrap();
        assert_eq!(ordered[0].credential_id, high.id);
        assert_eq!(ordered[1].credential_id, low.id);
    }

    #[tokio::test]
    async fn repeated_resolves_produce_identical_ordering() {
        let memstore = InMemoryStore::new();
        let t = tag();
        let mut tags = HashSet::new();
        tags.insert(t);

        for p in [30, 10, 20] {
            let c = credential(&memstore, p, tags.clone());
            memstore.upsert_credential(&c).await.unwrap();
        }

        let store: Arc<dyn JobStore> = Arc::new(memstore);
        let resolver = CredentialResolver::new(store);
        let device = device_with_tag(t);

        let first: Vec<_> = resolver.resolve(&device).await.unwrap().into_iter().map(|c| c.credential_id).collect();
        let second: Vec<_> = resolver.resolve(&device).await.unwrap().into_iter().map(|c| c.credential_id).collect();
        assert_eq!(first, second);
    }
}
