use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;
use trellis_di::{Container, Service};

use crate::client::{DataClient, FetchResult, HttpTransport};
use crate::config::{InjectionPolicy, RuntimeConfig};
use crate::error::RuntimeError;
use crate::host::{CustomElement, Element, HostEvent, WeakElement};
use crate::router::RouteData;
use crate::state::{StateBackends, StateManager};

/// Hooks a UI unit overrides. The runtime drives the activation sequence
/// and calls these at fixed points in it.
pub trait Component: 'static {
    /// Last step of activation. `route` is set when the component was
    /// mounted by the router.
    fn on_init(&mut self, _ctx: &ComponentContext, _route: Option<&RouteData>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once the auto-fetch finished, before [`on_init`](Self::on_init).
    fn on_data_fetched(
        &mut self,
        _ctx: &ComponentContext,
        _key: &str,
        _data: &Value,
        _error: Option<&str>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the element leaves the live document.
    fn on_destroy(&mut self, _ctx: &ComponentContext) {}
}

/// Static description of a component type.
pub trait ComponentType: Component + Sized {
    const TAG: &'static str;
    /// Container tokens injected on activation.
    const DEPENDENCIES: &'static [&'static str] = &[];
    /// Id of the template rendered into the element on first activation.
    const TEMPLATE: Option<&'static str> = None;

    fn create() -> Self;
}

type ComponentFactory = Rc<dyn Fn() -> Box<dyn Component>>;

/// Everything needed to define a tag: dependencies, template and a factory
/// for the hook object each instance owns.
#[derive(Clone)]
pub struct ComponentClass {
    tag: String,
    dependencies: Vec<String>,
    template: Option<String>,
    factory: ComponentFactory,
}

impl ComponentClass {
    pub fn new<C, F>(tag: impl Into<String>, factory: F) -> Self
    where
        C: Component,
        F: Fn() -> C + 'static,
    {
        Self {
            tag: tag.into(),
            dependencies: Vec::new(),
            template: None,
            factory: Rc::new(move || Box::new(factory()) as Box<dyn Component>),
        }
    }

    pub fn of<T: ComponentType>() -> Self {
        let class = Self::new(T::TAG, T::create)
            .with_dependencies(T::DEPENDENCIES.iter().copied());
        match T::TEMPLATE {
            Some(template) => class.with_template(template),
            None => class,
        }
    }

    pub fn with_dependencies<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(tokens.into_iter().map(Into::into));
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub(crate) fn instantiate(&self) -> Box<dyn Component> {
        (self.factory)()
    }
}

impl std::fmt::Debug for ComponentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentClass")
            .field("tag", &self.tag)
            .field("dependencies", &self.dependencies)
            .field("template", &self.template)
            .finish()
    }
}

/// Collaborators every component instance is activated against.
#[derive(Clone)]
pub struct RuntimeServices {
    pub container: Arc<Container>,
    pub backends: StateBackends,
    pub transport: Arc<dyn HttpTransport>,
    pub config: Rc<RuntimeConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Activated,
    Deactivated,
}

/// What a component sees of the runtime while its hooks run.
#[derive(Clone)]
pub struct ComponentContext {
    element: WeakElement,
    tag: String,
    state: StateManager,
    client: Rc<DataClient>,
    dependencies: Rc<HashMap<String, Service>>,
    container: Arc<Container>,
}

impl ComponentContext {
    /// The component's element, unless it has already been dropped.
    pub fn element(&self) -> Option<Element> {
        self.element.upgrade()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn client(&self) -> &DataClient {
        &self.client
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// An injected dependency, if it was resolved and is a `T`.
    pub fn dependency<T: Send + Sync + 'static>(&self, token: &str) -> Option<Arc<T>> {
        self.dependencies.get(token)?.clone().downcast::<T>().ok()
    }

    pub fn has_dependency(&self, token: &str) -> bool {
        self.dependencies.contains_key(token)
    }

    /// First element in this component's subtree matching `selector`.
    pub fn get_child(&self, selector: &str) -> Result<Option<Element>, RuntimeError> {
        match self.element() {
            Some(element) => element.query_selector(selector),
            None => Ok(None),
        }
    }

    pub fn get_children(&self, selector: &str) -> Result<Vec<Element>, RuntimeError> {
        match self.element() {
            Some(element) => element.query_selector_all(selector),
            None => Ok(Vec::new()),
        }
    }

    /// Ask the router to navigate to `path`.
    pub fn navigate(&self, path: &str, state: Value) {
        match self.element().and_then(|element| element.owner_document()) {
            Some(document) => document.dispatch(&HostEvent::NavigationRequest {
                path: path.to_string(),
                state,
            }),
            None => tracing::warn!(path, "Navigation requested from a detached document"),
        }
    }
}

impl std::fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentContext")
            .field("tag", &self.tag)
            .field("state", &self.state)
            .finish()
    }
}

/// Custom-element behavior running a [`Component`] through its lifecycle.
///
/// Activation builds state, the data client and injected dependencies once
/// per instance, renders the template once, starts the auto-fetch once and
/// then calls `on_init`. When an auto-fetch is started, `on_init` runs from
/// the task that completes it.
pub struct RuntimeComponent {
    class: ComponentClass,
    services: RuntimeServices,
    hook: RefCell<Box<dyn Component>>,
    route_data: RefCell<Option<RouteData>>,
    context: RefCell<Option<ComponentContext>>,
    phase: Cell<Phase>,
    rendered: Cell<bool>,
    fetched: Cell<bool>,
}

impl RuntimeComponent {
    pub fn new(class: ComponentClass, services: RuntimeServices) -> Self {
        let hook = class.instantiate();
        Self {
            class,
            services,
            hook: RefCell::new(hook),
            route_data: RefCell::new(None),
            context: RefCell::new(None),
            phase: Cell::new(Phase::Created),
            rendered: Cell::new(false),
            fetched: Cell::new(false),
        }
    }

    /// Hand over route data. Must happen before the element is connected for
    /// `on_init` to see it.
    pub fn set_route_data(&self, data: RouteData) {
        *self.route_data.borrow_mut() = Some(data);
    }

    pub fn route_data(&self) -> Option<RouteData> {
        self.route_data.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub fn context(&self) -> Option<ComponentContext> {
        self.context.borrow().clone()
    }

    pub fn class(&self) -> &ComponentClass {
        &self.class
    }

    fn ensure_context(&self, element: &Element) -> Result<ComponentContext, RuntimeError> {
        if let Some(ctx) = self.context.borrow().as_ref() {
            return Ok(ctx.clone());
        }

        let config = &self.services.config;
        let state = StateManager::init(element, &config.state, &self.services.backends);
        let client = DataClient::new(self.services.transport.clone(), &config.fetch)
            .with_state(state.clone());
        let dependencies = self.inject(element)?;

        let ctx = ComponentContext {
            element: element.downgrade(),
            tag: element.tag(),
            state,
            client: Rc::new(client),
            dependencies: Rc::new(dependencies),
            container: self.services.container.clone(),
        };
        *self.context.borrow_mut() = Some(ctx.clone());
        Ok(ctx)
    }

    fn inject(&self, element: &Element) -> Result<HashMap<String, Service>, RuntimeError> {
        let mut resolved = HashMap::new();
        for token in self.class.dependencies() {
            match self.services.container.resolve_any(token) {
                Ok(service) => {
                    tracing::debug!(tag = %element.tag(), token = %token, "Dependency injected");
                    resolved.insert(token.clone(), service);
                }
                Err(e) => match self.services.config.injection.policy {
                    InjectionPolicy::BestEffort => {
                        tracing::warn!(tag = %element.tag(), token = %token, error = %e, "Skipping dependency");
                    }
                    InjectionPolicy::Strict => {
                        return Err(RuntimeError::Injection {
                            tag: element.tag(),
                            token: token.clone(),
                            source: e,
                        });
                    }
                },
            }
        }
        Ok(resolved)
    }

    fn render(&self, element: &Element) -> Result<(), RuntimeError> {
        if self.rendered.get() {
            return Ok(());
        }
        let Some(template_id) = self.class.template() else {
            self.rendered.set(true);
            return Ok(());
        };
        let document = owner_document(element)?;
        let template = document
            .template(template_id)
            .ok_or_else(|| RuntimeError::MissingTemplate {
                tag: element.tag(),
                template: template_id.to_string(),
            })?;

        self.rendered.set(true);
        for node in &template.nodes {
            element.append_child(&document.instantiate(node)?)?;
        }
        tracing::debug!(tag = %element.tag(), template = template_id, "Template rendered");
        Ok(())
    }

    /// Start the one-time auto-fetch. Returns whether a fetch task was queued.
    fn start_auto_fetch(
        self: &Rc<Self>,
        element: &Element,
        ctx: &ComponentContext,
    ) -> Result<bool, RuntimeError> {
        if self.fetched.get() {
            return Ok(false);
        }
        let fetch = &self.services.config.fetch;
        let Some(url) = element.attribute(&fetch.url_attribute) else {
            return Ok(false);
        };
        self.fetched.set(true);

        let key = element
            .attribute(&fetch.key_attribute)
            .unwrap_or_else(|| "data".to_string());
        ctx.state().set_many([
            (format!("{key}Loading"), Value::Bool(true)),
            (format!("{key}Error"), Value::Null),
        ])?;
        tracing::debug!(tag = %element.tag(), url = %url, key = %key, "Auto-fetch started");

        let this = Rc::clone(self);
        let ctx = ctx.clone();
        owner_document(element)?.spawn_local(async move {
            let result = ctx.client().fetch(&url, Some(&key)).await;
            this.finish_auto_fetch(&ctx, &key, &result);
        });
        Ok(true)
    }

    fn finish_auto_fetch(&self, ctx: &ComponentContext, key: &str, result: &FetchResult) {
        let tag = ctx.tag().to_string();
        let error = result.error.clone().map(Value::String).unwrap_or(Value::Null);
        if let Err(e) = ctx.state().set_many([
            (format!("{key}Loading"), Value::Bool(false)),
            (format!("{key}Error"), error),
        ]) {
            tracing::warn!(tag = %tag, key, error = %e, "Failed to record auto-fetch outcome");
        }

        if self.phase.get() == Phase::Deactivated {
            tracing::debug!(tag = %tag, key, "Component left the document before its fetch completed");
            return;
        }

        let fetched = match self.hook.try_borrow_mut() {
            Ok(mut hook) => hook
                .on_data_fetched(ctx, key, &result.data, result.error.as_deref())
                .map_err(|e| RuntimeError::Hook {
                    tag: tag.clone(),
                    hook: "on_data_fetched",
                    message: e.to_string(),
                }),
            Err(_) => Err(busy_hook(&tag, "on_data_fetched")),
        };
        if let Err(e) = fetched.and_then(|()| self.run_init(ctx)) {
            tracing::error!(tag = %tag, error = %e, "Activation failed after auto-fetch");
        }
    }

    fn run_init(&self, ctx: &ComponentContext) -> Result<(), RuntimeError> {
        let tag = ctx.tag().to_string();
        let route = self.route_data.borrow().clone();
        let mut hook = self
            .hook
            .try_borrow_mut()
            .map_err(|_| busy_hook(&tag, "on_init"))?;
        hook.on_init(ctx, route.as_ref())
            .map_err(|e| RuntimeError::Hook {
                tag,
                hook: "on_init",
                message: e.to_string(),
            })
    }
}

impl CustomElement for RuntimeComponent {
    fn connected(self: Rc<Self>, element: &Element) -> Result<(), RuntimeError> {
        tracing::debug!(tag = %element.tag(), phase = ?self.phase.get(), "Activating component");
        self.phase.set(Phase::Activated);

        let ctx = self.ensure_context(element)?;
        self.render(element)?;
        if !self.start_auto_fetch(element, &ctx)? {
            self.run_init(&ctx)?;
        }
        Ok(())
    }

    fn disconnected(self: Rc<Self>, element: &Element) {
        if self.phase.get() != Phase::Activated {
            return;
        }
        self.phase.set(Phase::Deactivated);
        tracing::debug!(tag = %element.tag(), "Deactivating component");

        let Some(ctx) = self.context() else {
            return;
        };
        // A hook running right now (e.g. navigating away from on_init) still
        // holds the borrow; run the teardown once it has returned.
        match self.hook.try_borrow_mut() {
            Ok(mut hook) => hook.on_destroy(&ctx),
            Err(_) => match element.owner_document() {
                Some(document) => {
                    let this = Rc::clone(&self);
                    document.spawn_local(async move {
                        match this.hook.try_borrow_mut() {
                            Ok(mut hook) => hook.on_destroy(&ctx),
                            Err(_) => tracing::warn!(tag = %ctx.tag(), "Skipping on_destroy; hook still busy"),
                        }
                    });
                }
                None => tracing::warn!(tag = %element.tag(), "Skipping on_destroy; document is gone"),
            },
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn owner_document(element: &Element) -> Result<crate::host::Document, RuntimeError> {
    element
        .owner_document()
        .ok_or_else(|| RuntimeError::Hierarchy(format!("<{}> has no owner document", element.tag())))
}

fn busy_hook(tag: &str, hook: &'static str) -> RuntimeError {
    RuntimeError::Hook {
        tag: tag.to_string(),
        hook,
        message: "another hook of this component is still running".into(),
    }
}
