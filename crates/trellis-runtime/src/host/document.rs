use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::error::RuntimeError;
use crate::host::element::Element;
use crate::host::history::History;
use crate::host::selector::Selector;
use crate::host::template::{Template, TemplateNode};
use crate::host::{ClickEvent, CustomElement, HostEvent};

/// Builds the behavior attached to each new element of a defined tag.
pub type ElementConstructor = Rc<dyn Fn() -> Rc<dyn CustomElement>>;

type EventListener = Rc<dyn Fn(&HostEvent)>;
type ClickListener = Rc<dyn Fn(&ClickEvent)>;
type LocalTask = Pin<Box<dyn Future<Output = ()>>>;

/// Identifies a registered listener so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct DocumentInner {
    body: Element,
    definitions: RefCell<HashMap<String, ElementConstructor>>,
    templates: RefCell<HashMap<String, Template>>,
    history: RefCell<History>,
    event_listeners: RefCell<Vec<(ListenerId, EventListener)>>,
    click_listeners: RefCell<Vec<(ListenerId, ClickListener)>>,
    next_listener: Cell<u64>,
    tasks: RefCell<VecDeque<LocalTask>>,
}

/// In-memory host document.
///
/// Stands in for the platform a client runtime is embedded in: an element
/// tree rooted at `body`, custom-element definitions, a template registry,
/// session history, an event bus, and a cooperative task queue.
///
/// Everything is single-threaded. Listeners and reactions may call back into
/// the document; no internal borrow is held while they run.
#[derive(Clone)]
pub struct Document {
    inner: Rc<DocumentInner>,
}

/// Non-owning handle held by elements.
#[derive(Clone)]
pub struct WeakDocument(Weak<DocumentInner>);

impl WeakDocument {
    pub fn upgrade(&self) -> Option<Document> {
        self.0.upgrade().map(|inner| Document { inner })
    }
}

impl Document {
    /// A new document whose location is `initial_path`.
    pub fn new(initial_path: &str) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<DocumentInner>| DocumentInner {
            body: Element::new("body", WeakDocument(weak.clone()), None),
            definitions: RefCell::new(HashMap::new()),
            templates: RefCell::new(HashMap::new()),
            history: RefCell::new(History::new(initial_path)),
            event_listeners: RefCell::new(Vec::new()),
            click_listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
            tasks: RefCell::new(VecDeque::new()),
        });
        Self { inner }
    }

    pub fn downgrade(&self) -> WeakDocument {
        WeakDocument(Rc::downgrade(&self.inner))
    }

    pub fn body(&self) -> Element {
        self.inner.body.clone()
    }

    // ── Elements ────────────────────────────────────────────────────────────

    /// Create a detached element. Tags with a definition are upgraded.
    pub fn create_element(&self, tag: &str) -> Element {
        let tag = tag.to_ascii_lowercase();
        let constructor = self.inner.definitions.borrow().get(&tag).cloned();
        let behavior = constructor.map(|construct| construct());
        Element::new(&tag, self.downgrade(), behavior)
    }

    /// Define a custom element. A tag can be defined once per document.
    pub fn define(&self, tag: &str, constructor: ElementConstructor) -> Result<(), RuntimeError> {
        let tag = tag.to_ascii_lowercase();
        let mut definitions = self.inner.definitions.borrow_mut();
        if definitions.contains_key(&tag) {
            return Err(RuntimeError::AlreadyDefined { tag });
        }
        definitions.insert(tag, constructor);
        Ok(())
    }

    pub fn is_defined(&self, tag: &str) -> bool {
        self.inner
            .definitions
            .borrow()
            .contains_key(&tag.to_ascii_lowercase())
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<Element> {
        self.body()
            .subtree()
            .into_iter()
            .find(|el| el.id().as_deref() == Some(id))
    }

    pub fn query_selector(&self, selector: &str) -> Result<Option<Element>, RuntimeError> {
        let selector = Selector::parse(selector)?;
        Ok(self.body().subtree().into_iter().find(|el| selector.matches(el)))
    }

    pub fn outline(&self) -> String {
        self.body().outline()
    }

    // ── Templates ───────────────────────────────────────────────────────────

    pub fn register_template(&self, id: impl Into<String>, template: Template) {
        self.inner.templates.borrow_mut().insert(id.into(), template);
    }

    pub fn template(&self, id: &str) -> Option<Template> {
        self.inner.templates.borrow().get(id).cloned()
    }

    /// Build a detached element tree from a template node.
    pub fn instantiate(&self, node: &TemplateNode) -> Result<Element, RuntimeError> {
        let element = self.create_element(&node.tag);
        for (name, value) in &node.attributes {
            element.set_attribute(name, value.clone());
        }
        if let Some(text) = &node.text {
            element.set_text(text.clone());
        }
        for child in &node.children {
            element.append_child(&self.instantiate(child)?)?;
        }
        Ok(element)
    }

    // ── History ─────────────────────────────────────────────────────────────

    /// Path of the current history entry.
    pub fn location(&self) -> String {
        self.inner.history.borrow().current().path.clone()
    }

    pub fn history_state(&self) -> Value {
        self.inner.history.borrow().current().state.clone()
    }

    pub fn history_len(&self) -> usize {
        self.inner.history.borrow().len()
    }

    /// Add a history entry. Does not notify listeners.
    pub fn push_state(&self, state: Value, path: &str) {
        self.inner.history.borrow_mut().push(path, state);
    }

    pub fn replace_state(&self, state: Value, path: &str) {
        self.inner.history.borrow_mut().replace(path, state);
    }

    pub fn back(&self) -> bool {
        self.go(-1)
    }

    pub fn forward(&self) -> bool {
        self.go(1)
    }

    /// Traverse history and emit [`HostEvent::PopState`] if the cursor moved.
    pub fn go(&self, delta: isize) -> bool {
        let state = self
            .inner
            .history
            .borrow_mut()
            .go(delta)
            .map(|entry| entry.state.clone());
        match state {
            Some(state) => {
                self.dispatch(&HostEvent::PopState { state });
                true
            }
            None => false,
        }
    }

    // ── Events ──────────────────────────────────────────────────────────────

    fn next_listener_id(&self) -> ListenerId {
        let id = self.inner.next_listener.get();
        self.inner.next_listener.set(id + 1);
        ListenerId(id)
    }

    pub fn add_event_listener(&self, listener: impl Fn(&HostEvent) + 'static) -> ListenerId {
        let id = self.next_listener_id();
        self.inner
            .event_listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));
        id
    }

    pub fn add_click_listener(&self, listener: impl Fn(&ClickEvent) + 'static) -> ListenerId {
        let id = self.next_listener_id();
        self.inner
            .click_listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.inner
            .event_listeners
            .borrow_mut()
            .retain(|(lid, _)| *lid != id);
        self.inner
            .click_listeners
            .borrow_mut()
            .retain(|(lid, _)| *lid != id);
    }

    /// Deliver `event` to every event listener, synchronously, in
    /// registration order.
    pub fn dispatch(&self, event: &HostEvent) {
        let listeners: Vec<EventListener> = self
            .inner
            .event_listeners
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    /// Simulate a click on `target`. Returns `false` if a listener
    /// suppressed the default action.
    pub fn click(&self, target: &Element) -> bool {
        let event = ClickEvent::new(target.clone());
        let listeners: Vec<ClickListener> = self
            .inner
            .click_listeners
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
        !event.default_prevented()
    }

    // ── Tasks ───────────────────────────────────────────────────────────────

    /// Queue work to run on the next [`settle`](Self::settle).
    pub fn spawn_local(&self, task: impl Future<Output = ()> + 'static) {
        self.inner.tasks.borrow_mut().push_back(Box::pin(task));
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Run queued tasks, including any they queue, until none are left.
    pub async fn settle(&self) {
        loop {
            let next = self.inner.tasks.borrow_mut().pop_front();
            match next {
                Some(task) => task.await,
                None => break,
            }
        }
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("location", &self.location())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}
