// ── Provider registry ──
//
// At most one provider per URI scheme. Lookups by scheme go through the
// DashMap; the list of registered ids is kept as an ArcSwap snapshot so
// admin reads never contend with registration.

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::DeviceProvider;
use crate::error::CoreError;
use crate::model::ProviderId;

struct Registration {
    provider: Arc<dyn DeviceProvider>,
    /// Cancelled on unregistration; revokes every service issued for it.
    token: CancellationToken,
}

pub struct ProviderRegistry {
    by_scheme: DashMap<String, Registration>,
    snapshot: ArcSwap<Vec<ProviderId>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            by_scheme: DashMap::new(),
            snapshot: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Record `provider`. Returns the token that stays live until the
    /// provider is unregistered.
    pub(crate) fn register(
        &self,
        provider: Arc<dyn DeviceProvider>,
    ) -> Result<CancellationToken, CoreError> {
        let scheme = provider.id().scheme().to_owned();
        let token = match self.by_scheme.entry(scheme) {
            Entry::Occupied(slot) => {
                return Err(CoreError::DuplicateProvider {
                    scheme: slot.key().clone(),
                });
            }
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                info!(provider = %provider.id(), "provider registered");
                slot.insert(Registration {
                    provider,
                    token: token.clone(),
                });
                token
            }
        };
        self.refresh();
        Ok(token)
    }

    /// Remove the provider with exactly this id. Returns whether it was
    /// registered.
    pub(crate) fn unregister(&self, id: &ProviderId) -> bool {
        let removed = self
            .by_scheme
            .remove_if(id.scheme(), |_, r| r.provider.id() == id);
        let Some((_, registration)) = removed else {
            return false;
        };
        registration.token.cancel();
        info!(provider = %id, "provider unregistered");
        self.refresh();
        true
    }

    /// Provider responsible for `scheme`, if any.
    pub fn get(&self, scheme: &str) -> Option<Arc<dyn DeviceProvider>> {
        self.by_scheme
            .get(scheme)
            .map(|r| Arc::clone(&r.provider))
    }

    pub fn provider_ids(&self) -> Arc<Vec<ProviderId>> {
        self.snapshot.load_full()
    }

    pub fn len(&self) -> usize {
        self.by_scheme.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_scheme.is_empty()
    }

    fn refresh(&self) {
        let mut ids: Vec<ProviderId> = self
            .by_scheme
            .iter()
            .map(|r| r.provider.id().clone())
            .collect();
        ids.sort_by(|a, b| a.scheme().cmp(b.scheme()));
        self.snapshot.store(Arc::new(ids));
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::FutureExt;
    use futures_util::future::BoxFuture;

    use super::*;
    use crate::model::{DeviceId, MastershipRole};

    struct Stub(ProviderId);

    impl DeviceProvider for Stub {
        fn id(&self) -> &ProviderId {
            &self.0
        }

        fn trigger_probe<'a>(&'a self, _: &'a DeviceId) -> BoxFuture<'a, Result<(), CoreError>> {
            async { Ok(()) }.boxed()
        }

        fn role_changed<'a>(
            &'a self,
            _: &'a DeviceId,
            _: MastershipRole,
        ) -> BoxFuture<'a, Result<(), CoreError>> {
            async { Ok(()) }.boxed()
        }
    }

    fn stub(scheme: &str, name: &str) -> Arc<dyn DeviceProvider> {
        Arc::new(Stub(ProviderId::new(scheme, name)))
    }

    #[test]
    fn duplicate_scheme_is_rejected() {
        let registry = ProviderRegistry::new();
        registry.register(stub("of", "foo")).unwrap();

        let err = registry.register(stub("OF", "bar")).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateProvider { ref scheme } if scheme == "of"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_cancels_token_and_frees_scheme() {
        let registry = ProviderRegistry::new();
        let token = registry.register(stub("of", "foo")).unwrap();
        registry.register(stub("snmp", "bar")).unwrap();
        assert_eq!(registry.provider_ids().len(), 2);

        // A different provider name for the same scheme does not match.
        assert!(!registry.unregister(&ProviderId::new("of", "other")));
        assert!(!token.is_cancelled());

        assert!(registry.unregister(&ProviderId::new("of", "foo")));
        assert!(token.is_cancelled());
        assert!(registry.get("of").is_none());
        assert_eq!(*registry.provider_ids(), vec![ProviderId::new("snmp", "bar")]);

        registry.register(stub("of", "foo")).unwrap();
        assert!(registry.get("of").is_some());
    }
}
