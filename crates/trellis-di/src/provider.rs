use std::any::Any;
use std::sync::Arc;

use crate::container::Resolver;

/// A resolved service instance.
///
/// Services are shared behind `Arc` and type-erased; typed access goes through
/// [`Resolver::resolve`](crate::Resolver::resolve), which downcasts.
pub type Service = Arc<dyn Any + Send + Sync>;

/// The callable behind a provider. Receives the resolver for the current
/// top-level `resolve` call so nested resolutions share its context.
pub type ProviderFn = dyn Fn(&Resolver<'_>) -> anyhow::Result<Service> + Send + Sync;

/// How a service is cached once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Built once per registration, then reused.
    Singleton,
    /// Built on every resolution, never cached.
    Transient,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lifecycle::Singleton => write!(f, "singleton"),
            Lifecycle::Transient => write!(f, "transient"),
        }
    }
}

/// A type the container can build by itself, given access to other services.
///
/// This is the constructor form of a provider: the type pulls its own
/// dependencies out of the resolver.
pub trait Injectable: Send + Sync + Sized + 'static {
    fn construct(resolver: &Resolver<'_>) -> anyhow::Result<Self>;
}

/// Tagged provider variant. Callers state explicitly whether they hand the
/// container a constructible type or a factory closure.
#[derive(Clone)]
pub enum Provider {
    /// Built through [`Injectable::construct`].
    Constructor {
        type_name: &'static str,
        build: Arc<ProviderFn>,
    },
    /// Built by an arbitrary closure.
    Factory(Arc<ProviderFn>),
}

impl Provider {
    /// Constructor provider for an [`Injectable`] type.
    pub fn constructor<T: Injectable>() -> Self {
        Provider::Constructor {
            type_name: std::any::type_name::<T>(),
            build: Arc::new(|resolver| Ok(Arc::new(T::construct(resolver)?) as Service)),
        }
    }

    /// Factory provider from a closure returning a concrete value.
    pub fn factory<T, F>(factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Provider::Factory(Arc::new(move |resolver| {
            Ok(Arc::new(factory(resolver)?) as Service)
        }))
    }

    /// Factory provider that always hands out the same pre-built value.
    pub fn value<T: Send + Sync + 'static>(value: T) -> Self {
        let service: Service = Arc::new(value);
        Provider::Factory(Arc::new(move |_| Ok(service.clone())))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Provider::Constructor { .. } => "constructor",
            Provider::Factory(_) => "factory",
        }
    }

    pub(crate) fn invoke(&self, resolver: &Resolver<'_>) -> anyhow::Result<Service> {
        match self {
            Provider::Constructor { build, .. } | Provider::Factory(build) => build(resolver),
        }
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Constructor { type_name, .. } => {
                f.debug_tuple("Constructor").field(type_name).finish()
            }
            Provider::Factory(_) => f.write_str("Factory"),
        }
    }
}
