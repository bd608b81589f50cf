//! In-memory host platform: element tree, custom elements, history, events.

pub mod document;
pub mod element;
pub mod history;
pub mod selector;
pub mod template;

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use serde_json::Value;

use crate::error::RuntimeError;

pub use document::{Document, ElementConstructor, ListenerId, WeakDocument};
pub use element::{Element, WeakElement};
pub use history::{History, HistoryEntry};
pub use selector::Selector;
pub use template::{Template, TemplateNode};

/// Reactions of an upgraded element.
///
/// The document calls `connected` when the element becomes part of the live
/// tree and `disconnected` when it leaves it. An error from `connected`
/// aborts the insertion that triggered it and is returned to its caller.
pub trait CustomElement: 'static {
    fn connected(self: Rc<Self>, element: &Element) -> Result<(), RuntimeError>;

    fn disconnected(self: Rc<Self>, _element: &Element) {}

    fn as_any(&self) -> &dyn Any;
}

/// Notifications delivered through [`Document::dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// History traversal moved to an entry carrying `state`.
    PopState { state: Value },
    /// The location changed programmatically; routers should re-resolve.
    NavigationIntent,
    /// Someone asked for navigation to `path` (relative to the base path).
    NavigationRequest { path: String, state: Value },
}

#[derive(Debug)]
pub struct ClickEvent {
    target: Element,
    prevented: Cell<bool>,
}

impl ClickEvent {
    pub(crate) fn new(target: Element) -> Self {
        Self {
            target,
            prevented: Cell::new(false),
        }
    }

    pub fn target(&self) -> &Element {
        &self.target
    }

    pub fn prevent_default(&self) {
        self.prevented.set(true);
    }

    pub fn default_prevented(&self) -> bool {
        self.prevented.get()
    }
}
