//! Dependency container for Trellis.
//!
//! Services are registered under string tokens with a [`Lifecycle`] and a
//! tagged [`Provider`], then resolved on demand. Providers may resolve other
//! services; a re-entered token is reported as
//! [`ContainerError::CircularDependency`] instead of recursing forever.
//!
//! ```rust
//! use std::sync::Arc;
//! use trellis_di::{Container, Injectable, Lifecycle, Provider, Resolver};
//!
//! struct ApiBase(String);
//!
//! struct UserService {
//!     base: Arc<ApiBase>,
//! }
//!
//! impl Injectable for UserService {
//!     fn construct(resolver: &Resolver<'_>) -> anyhow::Result<Self> {
//!         Ok(Self { base: resolver.resolve("api_base")? })
//!     }
//! }
//!
//! # fn main() -> Result<(), trellis_di::ContainerError> {
//! let container = Container::new();
//! container.instance("api_base", ApiBase("/api".into()));
//! container.register("users", Provider::constructor::<UserService>(), Lifecycle::Singleton);
//!
//! let users = container.resolve::<UserService>("users")?;
//! assert_eq!(users.base.0, "/api");
//! # Ok(())
//! # }
//! ```

pub mod container;
pub mod error;
pub mod provider;

pub use container::{Container, Resolver};
pub use error::ContainerError;
pub use provider::{Injectable, Lifecycle, Provider, Service};
