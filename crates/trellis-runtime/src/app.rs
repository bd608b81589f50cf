use std::rc::Rc;
use std::sync::Arc;

use trellis_di::{Container, Lifecycle, Provider, Resolver};

use crate::client::{HttpTransport, ReqwestTransport};
use crate::component::{ComponentClass, RuntimeServices};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::host::{Document, Element, Template};
use crate::registry::ComponentRegistry;
use crate::router::{Route, Router};
use crate::state::StateBackends;

/// Wires the container, registry and router to one document.
pub struct App {
    document: Document,
    services: RuntimeServices,
    registry: Rc<ComponentRegistry>,
    router: Rc<Router>,
}

/// Overrides for the collaborators an [`App`] otherwise builds from its
/// configuration.
#[derive(Default)]
pub struct AppBuilder {
    config: RuntimeConfig,
    document: Option<Document>,
    transport: Option<Arc<dyn HttpTransport>>,
    backends: Option<StateBackends>,
    container: Option<Arc<Container>>,
}

impl AppBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn backends(mut self, backends: StateBackends) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn container(mut self, container: Arc<Container>) -> Self {
        self.container = Some(container);
        self
    }

    pub fn build(self) -> App {
        let config = self.config;
        let document = self.document.unwrap_or_else(|| Document::new("/"));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::from_config(&config.fetch)));
        let backends = self
            .backends
            .unwrap_or_else(|| StateBackends::from_config(&config.state));
        let container = self.container.unwrap_or_default();

        let router_config = config.router.clone();
        let services = RuntimeServices {
            container,
            backends,
            transport,
            config: Rc::new(config),
        };
        let registry = Rc::new(ComponentRegistry::new(document.clone(), services.clone()));
        let router = Router::new(document.clone(), registry.clone(), router_config);

        App {
            document,
            services,
            registry,
            router,
        }
    }
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::default()
    }

    /// An app over a fresh document at `/` with default collaborators.
    pub fn new(config: RuntimeConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn register_component(&self, class: ComponentClass) -> Result<(), RuntimeError> {
        self.registry.register(class)
    }

    pub fn register_service(&self, token: impl Into<String>, provider: Provider, lifecycle: Lifecycle) {
        self.services.container.register(token, provider, lifecycle);
    }

    pub fn singleton<T, F>(&self, token: impl Into<String>, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.services.container.singleton(token, factory);
    }

    pub fn transient<T, F>(&self, token: impl Into<String>, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.services.container.transient(token, factory);
    }

    pub fn instance<T: Send + Sync + 'static>(&self, token: impl Into<String>, value: T) {
        self.services.container.instance(token, value);
    }

    pub fn template(&self, id: impl Into<String>, template: Template) {
        self.document.register_template(id, template);
    }

    pub fn routes(&self, routes: Vec<Route>) -> Result<(), RuntimeError> {
        self.router.compile_routes(routes)
    }

    /// Make sure the host node exists, then start routing.
    pub fn run(&self) -> Result<(), RuntimeError> {
        let host_id = &self.services.config.router.host;
        if self.document.get_element_by_id(host_id).is_none() {
            let host = self.document.create_element("div");
            host.set_attribute("id", host_id.as_str());
            self.document.body().append_child(&host)?;
            tracing::debug!(host = %host_id, "Created host node");
        }
        self.router.start()
    }

    pub fn navigate_to(&self, path: &str, state: serde_json::Value) -> Result<(), RuntimeError> {
        self.router.navigate_to(path, state)
    }

    /// Drive queued asynchronous activation work to completion.
    pub async fn settle(&self) {
        self.document.settle().await;
    }

    /// The element currently mounted under the host node.
    pub fn active_component(&self) -> Option<Element> {
        self.document
            .get_element_by_id(&self.services.config.router.host)?
            .first_child()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.services.container
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn router(&self) -> &Rc<Router> {
        &self.router
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.services.config
    }
}
