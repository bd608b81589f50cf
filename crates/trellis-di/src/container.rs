use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::ContainerError;
use crate::provider::{Lifecycle, Provider, Service};

/// One token's registration.
struct Registration {
    provider: Provider,
    lifecycle: Lifecycle,
    /// Populated on first resolution of a singleton.
    instance: Option<Service>,
    /// Distinguishes this registration from a later overwrite of the same token.
    generation: u64,
}

/// Named-service container.
///
/// Tokens map to at most one registration; registering a token again replaces
/// the previous provider and drops any singleton it had cached.
///
/// # Threading
///
/// `Container` is `Send + Sync`. The registration table sits behind an
/// `RwLock` that is never held while a provider runs, so providers are free to
/// resolve other services. Resolution state (the set of tokens currently being
/// built) lives in a [`Resolver`] scoped to one top-level `resolve` call, so
/// unrelated callers never see each other's in-progress tokens.
pub struct Container {
    registrations: RwLock<HashMap<String, Registration>>,
    generation: AtomicU64,
}

impl Container {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Store or overwrite the registration for `token`.
    pub fn register(&self, token: impl Into<String>, provider: Provider, lifecycle: Lifecycle) {
        let token = token.into();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(token, kind = provider.kind(), %lifecycle, "Service registered");
        let previous = self.registrations.write().insert(
            token.clone(),
            Registration {
                provider,
                lifecycle,
                instance: None,
                generation,
            },
        );
        if previous.is_some() {
            tracing::debug!(token, "Replaced existing registration");
        }
    }

    /// Like [`register`](Self::register), but refuses to overwrite.
    pub fn register_unique(
        &self,
        token: impl Into<String>,
        provider: Provider,
        lifecycle: Lifecycle,
    ) -> Result<(), ContainerError> {
        let token = token.into();
        if self.has(&token) {
            return Err(ContainerError::Duplicate { token });
        }
        self.register(token, provider, lifecycle);
        Ok(())
    }

    /// Register a singleton built by `factory` on first resolution.
    pub fn singleton<T, F>(&self, token: impl Into<String>, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(token, Provider::factory(factory), Lifecycle::Singleton);
    }

    /// Register a transient built by `factory` on every resolution.
    pub fn transient<T, F>(&self, token: impl Into<String>, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(token, Provider::factory(factory), Lifecycle::Transient);
    }

    /// Register an already-built value as a singleton.
    pub fn instance<T: Send + Sync + 'static>(&self, token: impl Into<String>, value: T) {
        self.register(token, Provider::value(value), Lifecycle::Singleton);
    }

    /// Resolve a typed service.
    pub fn resolve<T: Send + Sync + 'static>(&self, token: &str) -> Result<Arc<T>, ContainerError> {
        Resolver::new(self).resolve(token)
    }

    /// Resolve a service without downcasting it.
    pub fn resolve_any(&self, token: &str) -> Result<Service, ContainerError> {
        Resolver::new(self).resolve_any(token)
    }

    /// Resolve a typed service, returning `None` if `token` is not registered.
    ///
    /// Every other fault (circular dependency, provider error, type mismatch)
    /// is still returned as an error.
    pub fn try_resolve<T: Send + Sync + 'static>(
        &self,
        token: &str,
    ) -> Result<Option<Arc<T>>, ContainerError> {
        Resolver::new(self).try_resolve(token)
    }

    pub fn has(&self, token: &str) -> bool {
        self.registrations.read().contains_key(token)
    }

    /// All registered tokens, sorted.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.registrations.read().keys().cloned().collect();
        tokens.sort();
        tokens
    }

    /// Remove the registration for `token`. Returns whether one existed.
    pub fn clear(&self, token: &str) -> bool {
        let removed = self.registrations.write().remove(token).is_some();
        if removed {
            tracing::debug!(token, "Service cleared");
        }
        removed
    }

    pub fn clear_all(&self) {
        self.registrations.write().clear();
        tracing::debug!("All services cleared");
    }

    /// A new container holding copies of every registration but none of the
    /// cached singletons. Parent and child build their own instances.
    pub fn create_child(&self) -> Container {
        let registrations = self.registrations.read();
        let copied = registrations
            .iter()
            .map(|(token, reg)| {
                (
                    token.clone(),
                    Registration {
                        provider: reg.provider.clone(),
                        lifecycle: reg.lifecycle,
                        instance: None,
                        generation: reg.generation,
                    },
                )
            })
            .collect();
        tracing::debug!(services = registrations.len(), "Child container created");
        Container {
            registrations: RwLock::new(copied),
            generation: AtomicU64::new(self.generation.load(Ordering::Relaxed)),
        }
    }

    /// Snapshot a registration without holding the lock past this call.
    fn lookup(&self, token: &str) -> Result<Lookup, ContainerError> {
        let registrations = self.registrations.read();
        let reg = registrations
            .get(token)
            .ok_or_else(|| ContainerError::Unregistered {
                token: token.to_string(),
            })?;
        Ok(match &reg.instance {
            Some(instance) => Lookup::Cached(instance.clone()),
            None => Lookup::Build {
                provider: reg.provider.clone(),
                lifecycle: reg.lifecycle,
                generation: reg.generation,
            },
        })
    }

    /// Cache a freshly built singleton, unless the registration changed while
    /// it was being built. Returns the instance callers should hand out.
    fn store_singleton(&self, token: &str, generation: u64, instance: Service) -> Service {
        let mut registrations = self.registrations.write();
        match registrations.get_mut(token) {
            Some(reg) if reg.generation == generation => match &reg.instance {
                Some(existing) => existing.clone(),
                None => {
                    reg.instance = Some(instance.clone());
                    instance
                }
            },
            _ => instance,
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("tokens", &self.tokens())
            .finish()
    }
}

enum Lookup {
    Cached(Service),
    Build {
        provider: Provider,
        lifecycle: Lifecycle,
        generation: u64,
    },
}

/// Resolution context for one top-level `resolve` call.
///
/// Providers receive a `&Resolver` and resolve their own dependencies through
/// it, which is how the set of in-progress tokens follows the call graph.
pub struct Resolver<'c> {
    container: &'c Container,
    resolving: RefCell<Vec<String>>,
}

impl<'c> Resolver<'c> {
    pub fn new(container: &'c Container) -> Self {
        Self {
            container,
            resolving: RefCell::new(Vec::new()),
        }
    }

    /// The container this resolver reads from.
    pub fn container(&self) -> &'c Container {
        self.container
    }

    pub fn resolve<T: Send + Sync + 'static>(&self, token: &str) -> Result<Arc<T>, ContainerError> {
        self.resolve_any(token)?
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                token: token.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn try_resolve<T: Send + Sync + 'static>(
        &self,
        token: &str,
    ) -> Result<Option<Arc<T>>, ContainerError> {
        match self.resolve(token) {
            Ok(service) => Ok(Some(service)),
            Err(ContainerError::Unregistered { token: missing }) if missing == token => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn resolve_any(&self, token: &str) -> Result<Service, ContainerError> {
        let (provider, lifecycle, generation) = match self.container.lookup(token)? {
            Lookup::Cached(instance) => {
                tracing::debug!(token, "Singleton cache hit");
                return Ok(instance);
            }
            Lookup::Build {
                provider,
                lifecycle,
                generation,
            } => (provider, lifecycle, generation),
        };

        let _guard = self.enter(token)?;
        tracing::debug!(token, %lifecycle, "Building service");

        let instance = provider
            .invoke(self)
            .map_err(ContainerError::from_provider)?;

        Ok(match lifecycle {
            Lifecycle::Singleton => self.container.store_singleton(token, generation, instance),
            Lifecycle::Transient => instance,
        })
    }

    /// Tokens currently being built in this resolution, outermost first.
    pub fn in_progress(&self) -> Vec<String> {
        self.resolving.borrow().clone()
    }

    fn enter(&self, token: &str) -> Result<ResolvingGuard<'_, 'c>, ContainerError> {
        let mut resolving = self.resolving.borrow_mut();
        if resolving.iter().any(|t| t == token) {
            let mut chain = resolving.clone();
            chain.push(token.to_string());
            tracing::warn!(token, chain = %chain.join(" -> "), "Circular dependency");
            return Err(ContainerError::CircularDependency {
                token: token.to_string(),
                chain,
            });
        }
        resolving.push(token.to_string());
        Ok(ResolvingGuard {
            resolver: self,
            token: token.to_string(),
        })
    }
}

/// Marks a token as in progress; the mark is released on drop, whether the
/// provider returned, failed, or panicked.
struct ResolvingGuard<'r, 'c> {
    resolver: &'r Resolver<'c>,
    token: String,
}

impl Drop for ResolvingGuard<'_, '_> {
    fn drop(&mut self) {
        let mut resolving = self.resolver.resolving.borrow_mut();
        if let Some(pos) = resolving.iter().rposition(|t| *t == self.token) {
            resolving.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Injectable;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct Config {
        url: String,
    }

    #[derive(Debug)]
    struct Repository {
        config: Arc<Config>,
    }

    impl Injectable for Repository {
        fn construct(resolver: &Resolver<'_>) -> anyhow::Result<Self> {
            Ok(Self {
                config: resolver.resolve::<Config>("config")?,
            })
        }
    }

    fn container_with_config() -> Container {
        let container = Container::new();
        container.singleton("config", |_| {
            Ok(Config {
                url: "postgres://localhost".into(),
            })
        });
        container
    }

    #[test]
    fn singleton_resolves_to_same_instance() {
        let container = container_with_config();
        let a = container.resolve::<Config>("config").unwrap();
        let b = container.resolve::<Config>("config").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn transient_resolves_to_fresh_instances() {
        let container = Container::new();
        container.transient("request", |_| Ok(String::from("req")));
        let a = container.resolve::<String>("request").unwrap();
        let b = container.resolve::<String>("request").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn constructor_provider_resolves_dependencies() {
        let container = container_with_config();
        container.register(
            "repo",
            Provider::constructor::<Repository>(),
            Lifecycle::Singleton,
        );

        let repo = container.resolve::<Repository>("repo").unwrap();
        assert_eq!(repo.config.url, "postgres://localhost");

        let config = container.resolve::<Config>("config").unwrap();
        assert!(Arc::ptr_eq(&repo.config, &config));
    }

    #[test]
    fn unregistered_token_fails() {
        let container = Container::new();
        let err = container.resolve::<Config>("missing").unwrap_err();
        assert!(matches!(err, ContainerError::Unregistered { ref token } if token == "missing"));
    }

    #[test]
    fn try_resolve_returns_none_for_unregistered() {
        let container = Container::new();
        assert!(container.try_resolve::<Config>("missing").unwrap().is_none());
    }

    #[test]
    fn try_resolve_still_reports_missing_dependencies() {
        let container = Container::new();
        container.register(
            "repo",
            Provider::constructor::<Repository>(),
            Lifecycle::Singleton,
        );
        let err = container.try_resolve::<Repository>("repo").unwrap_err();
        assert!(matches!(err, ContainerError::Unregistered { ref token } if token == "config"));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let container = container_with_config();
        let err = container.resolve::<String>("config").unwrap_err();
        assert!(matches!(err, ContainerError::TypeMismatch { .. }));
    }

    #[test]
    fn self_dependency_is_circular() {
        let container = Container::new();
        container.singleton("loop", |r| {
            let _ = r.resolve::<String>("loop")?;
            Ok(String::from("never"))
        });

        let err = container.resolve::<String>("loop").unwrap_err();
        match err {
            ContainerError::CircularDependency { token, chain } => {
                assert_eq!(token, "loop");
                assert_eq!(chain, vec!["loop", "loop"]);
            }
            other => panic!("expected circular dependency, got {other:?}"),
        }
    }

    #[test]
    fn transitive_cycle_names_reentered_token() {
        let container = Container::new();
        container.singleton("a", |r| {
            let _ = r.resolve::<String>("b")?;
            Ok(String::from("a"))
        });
        container.singleton("b", |r| {
            let _ = r.resolve::<String>("a")?;
            Ok(String::from("b"))
        });

        let err = container.resolve::<String>("a").unwrap_err();
        match err {
            ContainerError::CircularDependency { token, chain } => {
                assert_eq!(token, "a");
                assert_eq!(chain, vec!["a", "b", "a"]);
            }
            other => panic!("expected circular dependency, got {other:?}"),
        }
    }

    #[test]
    fn token_resolvable_again_after_cycle_is_broken() {
        let container = Container::new();
        container.singleton("a", |r| {
            let _ = r.resolve::<String>("b")?;
            Ok(String::from("a"))
        });
        container.singleton("b", |r| {
            let _ = r.resolve::<String>("a")?;
            Ok(String::from("b"))
        });
        assert!(container.resolve::<String>("a").is_err());

        container.singleton("b", |_| Ok(String::from("b")));
        assert_eq!(*container.resolve::<String>("a").unwrap(), "a");
    }

    #[test]
    fn resolving_marker_released_after_provider_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let container = Container::new();
        container.singleton("flaky", move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("first attempt fails");
            }
            Ok(42u32)
        });

        let err = container.resolve::<u32>("flaky").unwrap_err();
        assert!(matches!(err, ContainerError::Provider(_)));
        assert_eq!(err.to_string(), "first attempt fails");

        assert_eq!(*container.resolve::<u32>("flaky").unwrap(), 42);
    }

    #[test]
    fn reregistering_discards_cached_singleton() {
        let container = Container::new();
        container.singleton("name", |_| Ok(String::from("first")));
        let first = container.resolve::<String>("name").unwrap();

        container.singleton("name", |_| Ok(String::from("second")));
        let second = container.resolve::<String>("name").unwrap();

        assert_eq!(*first, "first");
        assert_eq!(*second, "second");
    }

    #[test]
    fn register_unique_rejects_existing_token() {
        let container = container_with_config();
        let err = container
            .register_unique("config", Provider::value(1u8), Lifecycle::Singleton)
            .unwrap_err();
        assert!(matches!(err, ContainerError::Duplicate { .. }));
    }

    #[test]
    fn instance_registration_returns_given_value() {
        let container = Container::new();
        container.instance("answer", 42u64);
        assert_eq!(*container.resolve::<u64>("answer").unwrap(), 42);
    }

    #[test]
    fn child_builds_its_own_singletons() {
        let parent = container_with_config();
        let parent_config = parent.resolve::<Config>("config").unwrap();

        let child = parent.create_child();
        let child_config = child.resolve::<Config>("config").unwrap();

        assert!(!Arc::ptr_eq(&parent_config, &child_config));
        assert!(Arc::ptr_eq(
            &child_config,
            &child.resolve::<Config>("config").unwrap()
        ));
        assert!(Arc::ptr_eq(
            &parent_config,
            &parent.resolve::<Config>("config").unwrap()
        ));
    }

    #[test]
    fn child_registrations_are_independent() {
        let parent = container_with_config();
        let child = parent.create_child();
        child.instance("extra", 1u8);
        parent.clear("config");

        assert!(!parent.has("extra"));
        assert!(child.has("config"));
    }

    #[test]
    fn bookkeeping() {
        let container = container_with_config();
        container.transient("b", |_| Ok(0u8));
        assert_eq!(container.tokens(), vec!["b", "config"]);
        assert!(container.has("b"));

        assert!(container.clear("b"));
        assert!(!container.clear("b"));
        assert!(!container.has("b"));

        container.clear_all();
        assert!(container.tokens().is_empty());
    }
}
