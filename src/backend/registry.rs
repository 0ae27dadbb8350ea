//! Backend registry: name → factory, account settings and loaded instances

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

use super::traits::{Backend, BackendContext, BackendDescriptor, BackendFactory};
use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::types::Capability;

type InstanceSlot = Arc<OnceCell<Arc<dyn Backend>>>;

struct RegisteredBackend {
    factory: Arc<dyn BackendFactory>,
    descriptor: BackendDescriptor,
    accounts: Vec<Map<String, Value>>,
}

/// Maps backend names to factories and caches one instance per `(name, account)`
pub struct BackendRegistry {
    config: Arc<Config>,
    backends: HashMap<String, RegisteredBackend>,
    instances: Mutex<HashMap<(String, usize), InstanceSlot>>,
}

impl BackendRegistry {
    /// Create an empty registry sharing `config` with every instance it builds
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            backends: HashMap::new(),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Register a backend with its account settings (may be empty)
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: Arc<dyn BackendFactory>,
        accounts: Vec<Map<String, Value>>,
    ) {
        let name = name.into();
        let descriptor = factory.descriptor();
        tracing::debug!(
            backend = %name,
            capabilities = %descriptor.capabilities,
            accounts = accounts.len(),
            "Registered backend"
        );
        self.backends.insert(
            name,
            RegisteredBackend {
                factory,
                descriptor,
                accounts,
            },
        );
    }

    /// Registered backend names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Descriptor of a registered backend
    pub fn descriptor(&self, name: &str) -> Result<&BackendDescriptor> {
        self.entry(name).map(|b| &b.descriptor)
    }

    /// Declared capabilities of a registered backend
    pub fn capabilities(&self, name: &str) -> Result<Capability> {
        self.descriptor(name).map(|d| d.capabilities)
    }

    /// Fail with [`ConfigError::UnsupportedCapability`] unless `name` declares `capability`
    pub fn require(&self, name: &str, capability: Capability) -> Result<()> {
        let caps = self.capabilities(name)?;
        if caps.contains(capability) {
            Ok(())
        } else {
            Err(ConfigError::UnsupportedCapability {
                backend: name.to_string(),
                capability,
            }
            .into())
        }
    }

    /// Number of configured accounts (0 when the backend needs none)
    pub fn account_count(&self, name: &str) -> usize {
        self.backends.get(name).map_or(0, |b| b.accounts.len())
    }

    /// Get or build the instance for `(name, account_index)`
    ///
    /// Concurrent callers for the same key share a single construction.
    pub async fn load(&self, name: &str, account_index: usize) -> Result<Arc<dyn Backend>> {
        let backend = self.entry(name)?;
        let slot = {
            let mut instances = self.instances.lock().await;
            instances
                .entry((name.to_string(), account_index))
                .or_default()
                .clone()
        };

        let instance = slot
            .get_or_try_init(|| async {
                let context = BackendContext {
                    backend_name: name.to_string(),
                    account_index,
                    settings: backend
                        .accounts
                        .get(account_index)
                        .cloned()
                        .unwrap_or_default(),
                    config: self.config.clone(),
                };
                let instance = backend.factory.create(context).await?;
                tracing::debug!(backend = %name, account_index, "Backend loaded");
                Ok::<_, crate::error::Error>(instance)
            })
            .await?;
        Ok(instance.clone())
    }

    /// Any already loaded instance of `name`, or account 0 if none is loaded yet
    pub async fn load_any(&self, name: &str) -> Result<Arc<dyn Backend>> {
        let loaded = {
            let instances = self.instances.lock().await;
            instances
                .iter()
                .filter(|((n, _), _)| n == name)
                .min_by_key(|((_, account), _)| *account)
                .and_then(|(_, slot)| slot.get().cloned())
        };
        match loaded {
            Some(instance) => Ok(instance),
            None => self.load(name, 0).await,
        }
    }

    /// Reject two public backends claiming the same service host
    ///
    /// A private backend silently takes over a host from a public one.
    pub fn validate(&self) -> Result<()> {
        self.host_table().map(|_| ())
    }

    /// Backend responsible for a URL, by matching its host against service hosts
    pub fn backend_for_url(&self, url: &str) -> Option<String> {
        let parsed = url::Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_ascii_lowercase();
        let table = self.host_table().ok()?;
        table
            .iter()
            .find(|(claimed, _)| host == **claimed || host.ends_with(&format!(".{}", claimed)))
            .map(|(_, owner)| owner.name.to_string())
    }

    /// Close every loaded instance and forget it
    pub async fn close_all(&self) {
        let drained: Vec<((String, usize), InstanceSlot)> =
            self.instances.lock().await.drain().collect();
        for ((name, account_index), slot) in drained {
            if let Some(instance) = slot.get()
                && let Err(e) = instance.close().await
            {
                tracing::debug!(backend = %name, account_index, error = %e, "Error closing backend");
            }
        }
    }

    fn entry(&self, name: &str) -> Result<&RegisteredBackend> {
        self.backends.get(name).ok_or_else(|| {
            ConfigError::UnknownBackend {
                name: name.to_string(),
            }
            .into()
        })
    }

    fn host_table(&self) -> Result<HashMap<String, HostOwner<'_>>> {
        let mut table: HashMap<String, HostOwner<'_>> = HashMap::new();
        for name in self.names() {
            let descriptor = &self.backends[name].descriptor;
            for host in &descriptor.service_hosts {
                let host = host.to_ascii_lowercase();
                let claimant = HostOwner {
                    name,
                    private: descriptor.private,
                };
                match table.get(&host) {
                    None => {
                        table.insert(host, claimant);
                    }
                    Some(existing) if existing.private == claimant.private => {
                        if !existing.private {
                            return Err(ConfigError::DuplicateServiceHost {
                                host,
                                first: existing.name.to_string(),
                                second: name.to_string(),
                            }
                            .into());
                        }
                        // two private claimants: first by name order keeps it
                    }
                    Some(existing) => {
                        if claimant.private && !existing.private {
                            table.insert(host, claimant);
                        }
                    }
                }
            }
        }
        Ok(table)
    }
}

#[derive(Clone, Copy)]
struct HostOwner<'a> {
    name: &'a str,
    private: bool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::test_helpers::{StubBackend, StubFactory};
    use crate::error::Error;

    fn registry() -> BackendRegistry {
        BackendRegistry::new(Arc::new(Config::default()))
    }

    fn account(region: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("region".into(), Value::String(region.into()));
        map
    }

    #[tokio::test]
    async fn unknown_backend_is_a_config_error() {
        let registry = registry();
        let err = registry.load("nope", 0).await.err().unwrap();
        assert!(matches!(
            err,
            Error::Config(ConfigError::UnknownBackend { ref name }) if name == "nope"
        ));
        assert_eq!(registry.account_count("nope"), 0);
    }

    #[tokio::test]
    async fn instances_are_cached_per_account() {
        let mut registry = registry();
        let factory = StubFactory::new(StubBackend::default());
        registry.register("stub", factory.clone(), vec![account("us"), account("jp")]);

        let a = registry.load("stub", 0).await.unwrap();
        let b = registry.load("stub", 0).await.unwrap();
        let c = registry.load("stub", 1).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(factory.created_accounts(), vec![0, 1]);
        assert_eq!(factory.settings_for(1).unwrap()["region"], "jp");
        assert_eq!(registry.account_count("stub"), 2);
    }

    #[tokio::test]
    async fn concurrent_loads_build_one_instance() {
        let mut registry = registry();
        let factory = StubFactory::new(StubBackend::default());
        registry.register("stub", factory.clone(), vec![]);
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.load("stub", 0).await.unwrap() }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(factory.created_accounts(), vec![0]);
    }

    #[tokio::test]
    async fn load_any_prefers_loaded_instance() {
        let mut registry = registry();
        let factory = StubFactory::new(StubBackend::default());
        registry.register("stub", factory.clone(), vec![account("a"), account("b")]);

        let second = registry.load("stub", 1).await.unwrap();
        let any = registry.load_any("stub").await.unwrap();
        assert!(Arc::ptr_eq(&second, &any));
        assert_eq!(factory.created_accounts(), vec![1]);
    }

    #[test]
    fn require_checks_capabilities() {
        let mut registry = registry();
        registry.register(
            "meta",
            StubFactory::with_descriptor(
                StubBackend::default(),
                BackendDescriptor::new("Meta", Capability::LYRICS),
            ),
            vec![],
        );
        registry.require("meta", Capability::LYRICS).unwrap();
        let err = registry.require("meta", Capability::DOWNLOAD).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::UnsupportedCapability { .. })
        ));
    }

    #[test]
    fn duplicate_public_hosts_are_rejected() {
        let mut registry = registry();
        for name in ["one", "two"] {
            registry.register(
                name,
                StubFactory::with_descriptor(
                    StubBackend::default(),
                    BackendDescriptor::new(name, Capability::DOWNLOAD).with_host("music.example.com"),
                ),
                vec![],
            );
        }
        let err = registry.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::DuplicateServiceHost { ref host, .. }) if host == "music.example.com"
        ));
    }

    #[test]
    fn private_backend_wins_host_conflict() {
        let mut registry = registry();
        registry.register(
            "public",
            StubFactory::with_descriptor(
                StubBackend::default(),
                BackendDescriptor::new("Public", Capability::DOWNLOAD).with_host("music.example.com"),
            ),
            vec![],
        );
        registry.register(
            "private",
            StubFactory::with_descriptor(
                StubBackend::default(),
                BackendDescriptor::new("Private", Capability::DOWNLOAD)
                    .with_host("music.example.com")
                    .private(),
            ),
            vec![],
        );

        registry.validate().unwrap();
        assert_eq!(
            registry.backend_for_url("https://music.example.com/album/1").as_deref(),
            Some("private")
        );
        assert_eq!(
            registry.backend_for_url("https://www.music.example.com/track/2").as_deref(),
            Some("private")
        );
        assert_eq!(registry.backend_for_url("https://other.example.org/x"), None);
        assert_eq!(registry.backend_for_url("not a url"), None);
    }

    #[tokio::test]
    async fn close_all_closes_and_forgets_instances() {
        let mut registry = registry();
        let backend = StubBackend::default();
        let factory = StubFactory::new(backend.clone());
        registry.register("stub", factory.clone(), vec![]);

        registry.load("stub", 0).await.unwrap();
        registry.close_all().await;
        assert_eq!(backend.close_calls(), 1);

        registry.load("stub", 0).await.unwrap();
        assert_eq!(factory.created_accounts(), vec![0, 0]);
    }
}
