//! End-to-end tests for the runtime: an `App` over an in-memory document,
//! driven the way an embedding host would drive it.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};
use trellis_di::{ContainerError, Injectable, Lifecycle, Provider, Resolver};
use trellis_runtime::client::{HttpRequest, HttpResponse};
use trellis_runtime::host::{Document, Template, TemplateNode};
use trellis_runtime::{
    App, Component, ComponentClass, ComponentContext, ComponentType, HttpTransport, Route,
    RouteData, RuntimeComponent, RuntimeConfig, RuntimeError, StateBackends,
};
use trellis_storage::{FileStorage, MemoryStorage};

// ── Fixtures ──────────────────────────────────────────────────────────────────

type Log = Rc<RefCell<Vec<String>>>;

/// Counts requests and answers every one with the same JSON body.
struct JsonTransport {
    body: &'static str,
    calls: AtomicUsize,
}

impl JsonTransport {
    fn new(body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            body,
            calls: AtomicUsize::new(0),
        })
    }
}

impl HttpTransport for JsonTransport {
    fn send<'a>(
        &'a self,
        _request: &'a HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, RuntimeError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse {
                status: 200,
                body: self.body.to_string(),
            })
        })
    }
}

struct Page {
    name: &'static str,
    log: Log,
}

impl Component for Page {
    fn on_init(&mut self, _ctx: &ComponentContext, route: Option<&RouteData>) -> anyhow::Result<()> {
        let params = route
            .map(|r| serde_json::to_string(&r.route.params).unwrap_or_default())
            .unwrap_or_default();
        self.log.borrow_mut().push(format!("{} init {params}", self.name));
        Ok(())
    }

    fn on_destroy(&mut self, _ctx: &ComponentContext) {
        self.log.borrow_mut().push(format!("{} destroy", self.name));
    }
}

fn page(tag: &'static str, log: &Log) -> ComponentClass {
    let log = log.clone();
    ComponentClass::new(tag, move || Page {
        name: tag,
        log: log.clone(),
    })
}

fn app() -> App {
    App::builder()
        .backends(StateBackends::in_memory())
        .transport(JsonTransport::new("{}"))
        .build()
}

fn active_tag(app: &App) -> Option<String> {
    app.active_component().map(|el| el.tag())
}

// ── Routing ───────────────────────────────────────────────────────────────────

#[test]
fn selects_route_and_exposes_params() {
    let log = Log::default();
    let app = app();
    app.routes(vec![
        Route::new("/", page("home-page", &log)),
        Route::new("/users/:id", page("user-page", &log)),
    ])
    .unwrap();
    app.run().unwrap();

    let matched = app.router().find_matching_route("/users/42").unwrap();
    assert_eq!(matched.tag, "user-page");
    assert_eq!(matched.params["id"], "42");

    let err = app.router().find_matching_route("/nope").unwrap_err();
    assert!(matches!(err, RuntimeError::UnmatchedRoute { .. }));
}

#[test]
fn overlapping_patterns_resolve_in_declaration_order() {
    let log = Log::default();
    let app = app();
    app.routes(vec![
        Route::new("/", page("home-page", &log)),
        Route::new("/a/*", page("wild-page", &log)),
        Route::new("/a/b", page("exact-page", &log)),
    ])
    .unwrap();
    app.run().unwrap();

    app.navigate_to("/a/b", Value::Null).unwrap();
    assert_eq!(active_tag(&app).as_deref(), Some("wild-page"));
}

#[test]
fn navigate_swaps_the_component_before_returning() {
    let log = Log::default();
    let app = app();
    app.routes(vec![
        Route::new("/", page("home-page", &log)),
        Route::new("/about", page("about-page", &log)),
    ])
    .unwrap();
    app.run().unwrap();
    assert_eq!(active_tag(&app).as_deref(), Some("home-page"));

    app.navigate_to("/about", Value::Null).unwrap();

    assert_eq!(active_tag(&app).as_deref(), Some("about-page"));
    let host = app.document().get_element_by_id("app").unwrap();
    assert_eq!(host.children().len(), 1);
    assert_eq!(
        *log.borrow(),
        vec!["home-page init {}", "home-page destroy", "about-page init {}"]
    );
}

#[test]
fn route_data_is_visible_during_activation() {
    let log = Log::default();
    let app = app();
    app.routes(vec![
        Route::new("/", page("home-page", &log)),
        Route::new("/users/:id", page("user-page", &log)),
    ])
    .unwrap();
    app.run().unwrap();

    app.navigate_to("/users/9", json!({"tab": "posts"})).unwrap();

    assert_eq!(log.borrow().last().unwrap(), r#"user-page init {"id":"9"}"#);
    let state = app
        .active_component()
        .unwrap()
        .with_behavior(|c: &RuntimeComponent| c.route_data())
        .flatten()
        .map(|data| data.state);
    assert_eq!(state, Some(json!({"tab": "posts"})));
}

#[test]
fn base_path_prefixes_routes_and_targets() {
    let log = Log::default();
    let app = App::builder()
        .document(Document::new("/shop/index.html"))
        .backends(StateBackends::in_memory())
        .transport(JsonTransport::new("{}"))
        .build();
    app.routes(vec![
        Route::new("/index.html", page("home-page", &log)),
        Route::new("/cart", page("cart-page", &log)),
    ])
    .unwrap();
    app.run().unwrap();
    assert_eq!(active_tag(&app).as_deref(), Some("home-page"));

    app.navigate_to("/cart", Value::Null).unwrap();
    assert_eq!(app.document().location(), "/shop/cart");
    assert_eq!(active_tag(&app).as_deref(), Some("cart-page"));
}

struct Redirect;

impl Component for Redirect {
    fn on_init(&mut self, ctx: &ComponentContext, _route: Option<&RouteData>) -> anyhow::Result<()> {
        ctx.navigate("/login", json!({"reason": "signed-out"}));
        Ok(())
    }
}

#[test]
fn navigation_from_a_hook_is_resolved_after_the_current_one() {
    let log = Log::default();
    let app = app();
    app.routes(vec![
        Route::new("/", ComponentClass::new("guard-page", || Redirect)),
        Route::new("/login", page("login-page", &log)),
    ])
    .unwrap();

    let resolved = Rc::new(RefCell::new(Vec::new()));
    let sink = resolved.clone();
    app.router()
        .on_route_change(move |m| sink.borrow_mut().push(m.tag.clone()));

    app.run().unwrap();

    assert_eq!(*resolved.borrow(), vec!["guard-page", "login-page"]);
    assert_eq!(active_tag(&app).as_deref(), Some("login-page"));
    assert_eq!(app.document().history_state(), json!({"reason": "signed-out"}));
}

#[test]
fn unmatched_initial_location_fails_run() {
    let log = Log::default();
    let app = App::builder()
        .document(Document::new("/missing/page"))
        .backends(StateBackends::in_memory())
        .transport(JsonTransport::new("{}"))
        .build();
    app.routes(vec![Route::new("/", page("home-page", &log))]).unwrap();

    assert!(matches!(app.run(), Err(RuntimeError::UnmatchedRoute { .. })));
}

// ── Components ────────────────────────────────────────────────────────────────

struct Greeter {
    api: Option<Arc<ApiClient>>,
}

impl Component for Greeter {
    fn on_init(&mut self, ctx: &ComponentContext, _route: Option<&RouteData>) -> anyhow::Result<()> {
        self.api = ctx.dependency::<ApiClient>("api");
        if let Some(title) = ctx.get_child("h1")? {
            title.set_text(format!("hello from {}", self.api.as_ref().map_or("?", |a| a.base.0.as_str())));
        }
        Ok(())
    }
}

impl ComponentType for Greeter {
    const TAG: &'static str = "greeter-page";
    const DEPENDENCIES: &'static [&'static str] = &["api"];
    const TEMPLATE: Option<&'static str> = Some("greeter");

    fn create() -> Self {
        Greeter { api: None }
    }
}

struct BaseUrl(String);

struct ApiClient {
    base: Arc<BaseUrl>,
}

impl Injectable for ApiClient {
    fn construct(resolver: &Resolver<'_>) -> anyhow::Result<Self> {
        Ok(Self {
            base: resolver.resolve("base_url")?,
        })
    }
}

#[test]
fn typed_component_renders_template_with_injected_service() {
    let app = app();
    app.instance("base_url", BaseUrl("/api".into()));
    app.register_service("api", Provider::constructor::<ApiClient>(), Lifecycle::Singleton);
    app.template("greeter", Template::from(TemplateNode::new("h1")));
    app.routes(vec![Route::of::<Greeter>("/")]).unwrap();
    app.run().unwrap();

    let outline = app.document().outline();
    assert!(outline.contains("<h1>hello from /api"), "{outline}");

    let first = app.container().resolve::<ApiClient>("api").unwrap();
    let second = app.container().resolve::<ApiClient>("api").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn missing_template_is_a_hard_stop() {
    let app = app();
    app.routes(vec![Route::of::<Greeter>("/")]).unwrap();
    assert!(matches!(app.run(), Err(RuntimeError::MissingTemplate { .. })));
}

#[test]
fn persisted_state_is_shared_by_key_and_inline_state_is_not() {
    let app = app();
    app.register_component(ComponentClass::new("note-view", || Page {
        name: "note",
        log: Log::default(),
    }))
    .unwrap();
    let body = app.document().body();

    let state_of = |el: &trellis_runtime::host::Element| {
        el.with_behavior(|c: &RuntimeComponent| c.context())
            .flatten()
            .unwrap()
            .state()
            .clone()
    };

    let first = app.document().create_element("note-view");
    first.set_attribute("data-storage-key", "notes");
    body.append_child(&first).unwrap();
    assert!(state_of(&first).snapshot().is_empty());
    state_of(&first).set("count", 1).unwrap();

    let second = app.document().create_element("note-view");
    second.set_attribute("data-storage-key", "notes");
    body.append_child(&second).unwrap();
    assert_eq!(state_of(&second).get("count"), Some(json!(1)));

    let inline = app.document().create_element("note-view");
    body.append_child(&inline).unwrap();
    state_of(&inline).set("draft", "hi").unwrap();
    let sibling = app.document().create_element("note-view");
    body.append_child(&sibling).unwrap();
    assert!(!state_of(&sibling).has("draft"));
    assert_eq!(inline.attribute("data-state").as_deref(), Some(r#"{"draft":"hi"}"#));
}

#[test]
fn durable_state_survives_a_new_app() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let backends = || {
        StateBackends::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(FileStorage::new(path.clone())),
        )
    };
    let log = Log::default();

    for expected in [None, Some(json!("dark"))] {
        let app = App::builder()
            .backends(backends())
            .transport(JsonTransport::new("{}"))
            .build();
        app.register_component(page("prefs-view", &log)).unwrap();
        let el = app.document().create_element("prefs-view");
        el.set_attribute("data-storage-key", "prefs");
        el.set_attribute("data-storage", "local");
        app.document().body().append_child(&el).unwrap();

        let state = el
            .with_behavior(|c: &RuntimeComponent| c.context())
            .flatten()
            .unwrap()
            .state()
            .clone();
        assert_eq!(state.get("theme"), expected);
        state.set("theme", "dark").unwrap();
    }
}

#[tokio::test]
async fn auto_fetch_runs_once_and_tracks_loading() {
    let transport = JsonTransport::new(r#"[{"id":1},{"id":2}]"#);
    let app = App::builder()
        .backends(StateBackends::in_memory())
        .transport(transport.clone())
        .build();
    let log = Log::default();
    app.register_component(page("user-list", &log)).unwrap();

    let el = app.document().create_element("user-list");
    el.set_attribute("data-fetch", "https://api.test/users");
    el.set_attribute("data-fetch-key", "users");
    app.document().body().append_child(&el).unwrap();

    let state = el
        .with_behavior(|c: &RuntimeComponent| c.context())
        .flatten()
        .unwrap()
        .state()
        .clone();
    assert_eq!(state.get("usersLoading"), Some(json!(true)));
    assert_eq!(state.get("usersError"), Some(Value::Null));
    assert!(log.borrow().is_empty(), "on_init waits for the fetch");

    app.settle().await;
    assert_eq!(state.get("usersLoading"), Some(json!(false)));
    assert_eq!(state.get("users"), Some(json!([{"id": 1}, {"id": 2}])));
    assert_eq!(*log.borrow(), vec!["user-list init "]);

    el.remove();
    app.document().body().append_child(&el).unwrap();
    app.settle().await;
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.get("usersLoading"), Some(json!(false)));
}

// ── Container ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Counter(usize);

#[test]
fn container_lifecycles_and_children() {
    let app = app();
    let built = Arc::new(AtomicUsize::new(0));
    let count = built.clone();
    app.singleton("shared", move |_| Ok(Counter(count.fetch_add(1, Ordering::SeqCst))));
    app.transient("fresh", |_| Ok(Counter(0)));

    let a = app.container().resolve::<Counter>("shared").unwrap();
    let b = app.container().resolve::<Counter>("shared").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(
        &app.container().resolve::<Counter>("fresh").unwrap(),
        &app.container().resolve::<Counter>("fresh").unwrap()
    ));

    let child = app.container().create_child();
    let c = child.resolve::<Counter>("shared").unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!((a.0, c.0), (0, 1));
}

#[test]
fn circular_dependency_is_reported_and_recoverable() {
    let app = app();
    app.singleton("a", |r: &Resolver<'_>| r.resolve::<Counter>("b").map(|_| Counter(0)).map_err(Into::into));
    app.singleton("b", |r: &Resolver<'_>| r.resolve::<Counter>("a").map(|_| Counter(0)).map_err(Into::into));

    let err = app.container().resolve::<Counter>("a").unwrap_err();
    assert!(matches!(err, ContainerError::CircularDependency { ref token, .. } if token == "a"));

    app.singleton("b", |_| Ok(Counter(2)));
    assert!(app.container().resolve::<Counter>("a").is_ok());
}
