use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;

use crate::component::{ComponentClass, ComponentType, RuntimeComponent};
use crate::config::RouterConfig;
use crate::error::RuntimeError;
use crate::host::{Document, HostEvent, ListenerId};
use crate::pattern::PathPattern;
use crate::registry::ComponentRegistry;

/// A path template paired with the component it mounts.
#[derive(Debug, Clone)]
pub struct Route {
    pub path: String,
    pub component: ComponentClass,
}

impl Route {
    pub fn new(path: impl Into<String>, component: ComponentClass) -> Self {
        Self {
            path: path.into(),
            component,
        }
    }

    pub fn of<T: ComponentType>(path: impl Into<String>) -> Self {
        Self::new(path, ComponentClass::of::<T>())
    }
}

/// A compiled route table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub pattern: String,
    pub tag: String,
}

/// Outcome of matching a path against the route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteMatch {
    pub path: String,
    pub pattern: String,
    pub tag: String,
    pub params: BTreeMap<String, String>,
}

/// Handed to a routed component before it is connected.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteData {
    pub route: RouteMatch,
    /// Navigation state carried by the history entry.
    pub state: Value,
}

impl RouteData {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.route.params.get(name).map(String::as_str)
    }
}

struct CompiledRoute {
    pattern: PathPattern,
    tag: String,
}

type RouteObserver = Rc<dyn Fn(&RouteMatch)>;

/// Maps locations to components and keeps exactly one routed component
/// mounted under the host node.
///
/// Every navigation trigger goes through [`dispatch`](Self::dispatch). A
/// trigger raised while a resolution is running (for example from a hook of
/// the component being mounted) is coalesced and resolved once the running
/// one has finished.
pub struct Router {
    document: Document,
    registry: Rc<ComponentRegistry>,
    config: RouterConfig,
    base_path: String,
    routes: RefCell<Vec<CompiledRoute>>,
    current: RefCell<Option<RouteMatch>>,
    observers: RefCell<Vec<RouteObserver>>,
    listeners: RefCell<Vec<ListenerId>>,
    busy: Cell<bool>,
    pending: Cell<bool>,
    emitting: Cell<bool>,
}

impl Router {
    pub fn new(document: Document, registry: Rc<ComponentRegistry>, config: RouterConfig) -> Rc<Self> {
        let base_path = match &config.base_path {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => Self::detect_base_path(&document.location()),
        };
        tracing::debug!(base_path = %base_path, "Router created");

        Rc::new(Self {
            document,
            registry,
            config,
            base_path,
            routes: RefCell::new(Vec::new()),
            current: RefCell::new(None),
            observers: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
            busy: Cell::new(false),
            pending: Cell::new(false),
            emitting: Cell::new(false),
        })
    }

    /// Base path implied by `location`: query and fragment dropped, then a
    /// trailing `index.html`, then a trailing slash.
    pub fn detect_base_path(location: &str) -> String {
        let path = location_path(location);
        let path = path.strip_suffix("index.html").unwrap_or(path);
        path.strip_suffix('/').unwrap_or(path).to_string()
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Replace the route table. Each component is registered and each
    /// template is compiled under the base path, in declaration order.
    pub fn compile_routes(&self, routes: Vec<Route>) -> Result<(), RuntimeError> {
        let mut compiled = Vec::with_capacity(routes.len());
        for route in routes {
            let tag = route.component.tag().to_string();
            self.registry.register(route.component)?;
            let pattern = PathPattern::parse(&self.join_base(&route.path))?;
            tracing::debug!(pattern = %pattern, tag = %tag, "Route compiled");
            compiled.push(CompiledRoute { pattern, tag });
        }
        tracing::info!(count = compiled.len(), base_path = %self.base_path, "Routes compiled");
        *self.routes.borrow_mut() = compiled;
        Ok(())
    }

    pub fn routes(&self) -> Vec<RouteEntry> {
        self.routes
            .borrow()
            .iter()
            .map(|r| RouteEntry {
                pattern: r.pattern.as_str().to_string(),
                tag: r.tag.clone(),
            })
            .collect()
    }

    /// First route, in declaration order, whose pattern accepts the path
    /// part of `location`. Query and fragment are ignored.
    pub fn find_matching_route(&self, location: &str) -> Result<RouteMatch, RuntimeError> {
        let path = location_path(location);
        self.routes
            .borrow()
            .iter()
            .find_map(|route| {
                route.pattern.matches(path).map(|params| RouteMatch {
                    path: path.to_string(),
                    pattern: route.pattern.as_str().to_string(),
                    tag: route.tag.clone(),
                    params,
                })
            })
            .ok_or_else(|| RuntimeError::UnmatchedRoute {
                path: path.to_string(),
            })
    }

    /// The route of the mounted component.
    pub fn current(&self) -> Option<RouteMatch> {
        self.current.borrow().clone()
    }

    /// Call `observer` after every successful resolution.
    pub fn on_route_change(&self, observer: impl Fn(&RouteMatch) + 'static) {
        self.observers.borrow_mut().push(Rc::new(observer));
    }

    /// Subscribe to history, navigation events and navigation clicks, then
    /// resolve the current location.
    pub fn start(self: &Rc<Self>) -> Result<(), RuntimeError> {
        if !self.listeners.borrow().is_empty() {
            tracing::warn!("Router already started");
            return Ok(());
        }

        let weak = Rc::downgrade(self);
        let events = self.document.add_event_listener(move |event| {
            let Some(router) = weak.upgrade() else {
                return;
            };
            let result = match event {
                HostEvent::NavigationIntent if router.emitting.get() => Ok(()),
                HostEvent::PopState { .. } | HostEvent::NavigationIntent => router.dispatch(),
                HostEvent::NavigationRequest { path, state } => {
                    router.navigate_to(path, state.clone())
                }
            };
            report(result);
        });

        let weak = Rc::downgrade(self);
        let nav_attribute = self.config.nav_attribute.clone();
        let clicks = self.document.add_click_listener(move |event| {
            let Some(router) = weak.upgrade() else {
                return;
            };
            let link = match event.target().closest(&format!("[{nav_attribute}]")) {
                Ok(Some(link)) => link,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "Cannot look up navigation links");
                    return;
                }
            };
            let target = link
                .attribute(&nav_attribute)
                .filter(|t| !t.is_empty())
                .or_else(|| link.attribute("href"));
            if let Some(target) = target {
                event.prevent_default();
                report(router.navigate_to(&target, Value::Null));
            }
        });

        self.listeners.borrow_mut().extend([events, clicks]);
        tracing::info!(location = %self.document.location(), "Router started");
        self.dispatch()
    }

    /// Unsubscribe from the document.
    pub fn stop(&self) {
        for id in self.listeners.borrow_mut().drain(..) {
            self.document.remove_listener(id);
        }
    }

    /// Push `base + path` with `state`, announce it with
    /// [`HostEvent::NavigationIntent`] and resolve it before returning.
    pub fn navigate_to(&self, path: &str, state: Value) -> Result<(), RuntimeError> {
        let target = self.join_base(path);
        tracing::info!(path = %target, "Navigating");
        self.document.push_state(state, &target);

        // Our own listener skips this intent; the resolution below reports errors.
        let outer = self.emitting.replace(true);
        self.document.dispatch(&HostEvent::NavigationIntent);
        self.emitting.set(outer);

        self.dispatch()
    }

    /// Resolve the current location, or queue a resolution if one is running.
    pub fn dispatch(&self) -> Result<(), RuntimeError> {
        if self.busy.replace(true) {
            tracing::debug!(location = %self.document.location(), "Navigation coalesced");
            self.pending.set(true);
            return Ok(());
        }

        let mut result = self.resolve_location();
        while self.pending.replace(false) {
            if let Err(e) = &result {
                tracing::error!(error = %e, "Navigation failed before a queued one superseded it");
            }
            result = self.resolve_location();
        }
        self.busy.set(false);
        result
    }

    fn resolve_location(&self) -> Result<(), RuntimeError> {
        let location = self.document.location();
        let matched = self.find_matching_route(&location)?;
        let host = self
            .document
            .get_element_by_id(&self.config.host)
            .ok_or_else(|| RuntimeError::HostNotFound(self.config.host.clone()))?;

        let element = self.document.create_element(&matched.tag);
        let data = RouteData {
            route: matched.clone(),
            state: self.document.history_state(),
        };
        if element
            .with_behavior(|component: &RuntimeComponent| component.set_route_data(data))
            .is_none()
        {
            tracing::warn!(tag = %matched.tag, "Routed element is not a runtime component");
        }

        host.replace_children(&[element])?;

        tracing::info!(location = %location, tag = %matched.tag, "Route resolved");
        *self.current.borrow_mut() = Some(matched.clone());
        let observers: Vec<RouteObserver> = self.observers.borrow().clone();
        for observer in observers {
            observer(&matched);
        }
        Ok(())
    }

    fn join_base(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_path)
        } else {
            format!("{}/{path}", self.base_path)
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.stop();
    }
}

/// `location` without its query string or fragment.
fn location_path(location: &str) -> &str {
    location.split(['?', '#']).next().unwrap_or_default()
}

fn report(result: Result<(), RuntimeError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Navigation failed");
    }
}
