//! Client-side application runtime.
//!
//! An [`App`] maps locations to components through a [`Router`], keeps one
//! routed component mounted under a host node, and activates each component
//! against its own [`StateManager`], [`DataClient`] and the dependencies it
//! declares in the shared [`trellis_di::Container`].
//!
//! The host platform is modelled by [`host::Document`]: an element tree with
//! custom-element reactions, session history, an event bus and a queue for
//! asynchronous activation work that [`App::settle`] drives.

pub mod app;
pub mod client;
pub mod component;
pub mod config;
pub mod error;
pub mod host;
pub mod pattern;
pub mod registry;
pub mod router;
pub mod state;

pub use app::{App, AppBuilder};
pub use client::{Credentials, DataClient, FetchResult, HttpTransport, Method, ReqwestTransport};
pub use component::{
    Component, ComponentClass, ComponentContext, ComponentType, Phase, RuntimeComponent,
    RuntimeServices,
};
pub use config::{InjectionPolicy, RuntimeConfig};
pub use error::RuntimeError;
pub use pattern::PathPattern;
pub use registry::ComponentRegistry;
pub use router::{Route, RouteData, RouteEntry, RouteMatch, Router};
pub use state::{StateBackends, StateManager, StateMode};
