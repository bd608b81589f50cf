use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::error::RuntimeError;
use crate::host::document::{Document, WeakDocument};
use crate::host::selector::Selector;
use crate::host::CustomElement;

type NodeRef = Rc<RefCell<NodeData>>;

struct NodeData {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: Option<String>,
    children: Vec<Element>,
    parent: Weak<RefCell<NodeData>>,
    document: WeakDocument,
    behavior: Option<Rc<dyn CustomElement>>,
}

/// Handle to a node in a [`Document`]'s element tree.
///
/// Cloning the handle does not clone the node. Mutations that connect or
/// disconnect a subtree run the custom-element reactions of every upgraded
/// element in it, after the tree itself has been updated.
#[derive(Clone)]
pub struct Element {
    node: NodeRef,
}

/// Non-owning [`Element`] handle, for state that the element's own
/// behavior keeps alive.
#[derive(Clone)]
pub struct WeakElement(Weak<RefCell<NodeData>>);

impl WeakElement {
    pub fn upgrade(&self) -> Option<Element> {
        self.0.upgrade().map(|node| Element { node })
    }
}

impl Element {
    pub(crate) fn new(
        tag: &str,
        document: WeakDocument,
        behavior: Option<Rc<dyn CustomElement>>,
    ) -> Self {
        Self {
            node: Rc::new(RefCell::new(NodeData {
                tag: tag.to_ascii_lowercase(),
                attributes: BTreeMap::new(),
                text: None,
                children: Vec::new(),
                parent: Weak::new(),
                document,
                behavior,
            })),
        }
    }

    pub fn tag(&self) -> String {
        self.node.borrow().tag.clone()
    }

    pub fn id(&self) -> Option<String> {
        self.attribute("id")
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.node.borrow().attributes.get(name).cloned()
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.node.borrow().attributes.contains_key(name)
    }

    pub fn set_attribute(&self, name: &str, value: impl Into<String>) {
        self.node
            .borrow_mut()
            .attributes
            .insert(name.to_string(), value.into());
    }

    pub fn remove_attribute(&self, name: &str) -> Option<String> {
        self.node.borrow_mut().attributes.remove(name)
    }

    /// All attributes, sorted by name.
    pub fn attributes(&self) -> Vec<(String, String)> {
        self.node
            .borrow()
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    /// This node's own text.
    pub fn text(&self) -> Option<String> {
        self.node.borrow().text.clone()
    }

    pub fn set_text(&self, text: impl Into<String>) {
        self.node.borrow_mut().text = Some(text.into());
    }

    /// Own text followed by the text of every descendant, in tree order.
    pub fn text_content(&self) -> String {
        let mut out = self.text().unwrap_or_default();
        for child in self.children() {
            out.push_str(&child.text_content());
        }
        out
    }

    pub fn children(&self) -> Vec<Element> {
        self.node.borrow().children.clone()
    }

    pub fn first_child(&self) -> Option<Element> {
        self.node.borrow().children.first().cloned()
    }

    pub fn parent(&self) -> Option<Element> {
        self.node
            .borrow()
            .parent
            .upgrade()
            .map(|node| Element { node })
    }

    pub fn owner_document(&self) -> Option<Document> {
        self.node.borrow().document.upgrade()
    }

    /// True if this element hangs off its document's body.
    pub fn is_connected(&self) -> bool {
        let Some(document) = self.owner_document() else {
            return false;
        };
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current.ptr_eq(&document.body())
    }

    pub fn behavior(&self) -> Option<Rc<dyn CustomElement>> {
        self.node.borrow().behavior.clone()
    }

    /// Run `f` against the upgraded behavior if it is a `T`.
    pub fn with_behavior<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let behavior = self.behavior()?;
        behavior.as_any().downcast_ref::<T>().map(f)
    }

    pub fn downgrade(&self) -> WeakElement {
        WeakElement(Rc::downgrade(&self.node))
    }

    pub fn ptr_eq(&self, other: &Element) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }

    /// `self` followed by every descendant, in tree order.
    pub fn subtree(&self) -> Vec<Element> {
        let mut out = vec![self.clone()];
        for child in self.children() {
            out.extend(child.subtree());
        }
        out
    }

    /// Every descendant in tree order, excluding `self`.
    pub fn descendants(&self) -> Vec<Element> {
        let mut all = self.subtree();
        all.remove(0);
        all
    }

    fn contains(&self, other: &Element) -> bool {
        let mut current = Some(other.clone());
        while let Some(el) = current {
            if el.ptr_eq(self) {
                return true;
            }
            current = el.parent();
        }
        false
    }

    /// Append `child`, moving it out of its current parent first.
    pub fn append_child(&self, child: &Element) -> Result<(), RuntimeError> {
        if child.contains(self) {
            return Err(RuntimeError::Hierarchy(format!(
                "<{}> cannot be inserted into its own subtree",
                child.tag()
            )));
        }
        let removed = child.detach();
        run_disconnected(removed);

        child.node.borrow_mut().parent = Rc::downgrade(&self.node);
        self.node.borrow_mut().children.push(child.clone());

        if self.is_connected() {
            run_connected(child.subtree())?;
        }
        Ok(())
    }

    /// Remove `child` if it is a direct child. Returns whether it was.
    pub fn remove_child(&self, child: &Element) -> bool {
        let is_child = child.parent().is_some_and(|p| p.ptr_eq(self));
        if is_child {
            run_disconnected(child.detach());
        }
        is_child
    }

    /// Remove this element from its parent.
    pub fn remove(&self) {
        run_disconnected(self.detach());
    }

    /// Replace all children with `children`.
    ///
    /// Removal reactions for the old children run before insertion reactions
    /// for the new ones.
    pub fn replace_children(&self, children: &[Element]) -> Result<(), RuntimeError> {
        for child in children {
            if child.contains(self) {
                return Err(RuntimeError::Hierarchy(format!(
                    "<{}> cannot be inserted into its own subtree",
                    child.tag()
                )));
            }
        }

        let old = std::mem::take(&mut self.node.borrow_mut().children);
        let was_connected = self.is_connected();
        let mut removed = Vec::new();
        for el in &old {
            el.node.borrow_mut().parent = Weak::new();
            if was_connected {
                removed.extend(el.subtree());
            }
        }
        for child in children {
            removed.extend(child.detach());
        }
        run_disconnected(removed);

        for child in children {
            child.node.borrow_mut().parent = Rc::downgrade(&self.node);
            self.node.borrow_mut().children.push(child.clone());
        }
        if self.is_connected() {
            let inserted = children.iter().flat_map(Element::subtree).collect();
            run_connected(inserted)?;
        }
        Ok(())
    }

    pub fn clear_children(&self) {
        // Replacing with nothing cannot trigger insertion reactions.
        let _ = self.replace_children(&[]);
    }

    /// Unlink from the parent. Returns the subtree that was connected before,
    /// so the caller can run removal reactions once the tree is consistent.
    fn detach(&self) -> Vec<Element> {
        let Some(parent) = self.parent() else {
            return Vec::new();
        };
        let was_connected = self.is_connected();
        parent
            .node
            .borrow_mut()
            .children
            .retain(|c| !c.ptr_eq(self));
        self.node.borrow_mut().parent = Weak::new();
        if was_connected {
            self.subtree()
        } else {
            Vec::new()
        }
    }

    /// First descendant matching `selector`.
    pub fn query_selector(&self, selector: &str) -> Result<Option<Element>, RuntimeError> {
        let selector = Selector::parse(selector)?;
        Ok(self.descendants().into_iter().find(|el| selector.matches(el)))
    }

    /// Every descendant matching `selector`, in tree order.
    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<Element>, RuntimeError> {
        let selector = Selector::parse(selector)?;
        Ok(self
            .descendants()
            .into_iter()
            .filter(|el| selector.matches(el))
            .collect())
    }

    /// Nearest inclusive ancestor matching `selector`.
    pub fn closest(&self, selector: &str) -> Result<Option<Element>, RuntimeError> {
        let selector = Selector::parse(selector)?;
        let mut current = Some(self.clone());
        while let Some(el) = current {
            if selector.matches(&el) {
                return Ok(Some(el));
            }
            current = el.parent();
        }
        Ok(None)
    }

    /// Indented, one-element-per-line rendering of this subtree.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        self.write_outline(0, &mut out);
        out
    }

    fn write_outline(&self, depth: usize, out: &mut String) {
        let node = self.node.borrow();
        out.push_str(&"  ".repeat(depth));
        out.push('<');
        out.push_str(&node.tag);
        for (name, value) in &node.attributes {
            out.push_str(&format!(" {name}=\"{value}\""));
        }
        out.push('>');
        if let Some(text) = &node.text {
            out.push_str(text);
        }
        out.push('\n');
        let children = node.children.clone();
        drop(node);
        for child in children {
            child.write_outline(depth + 1, out);
        }
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let node = self.node.borrow();
        let mut s = f.debug_struct("Element");
        s.field("tag", &node.tag);
        if let Some(id) = node.attributes.get("id") {
            s.field("id", id);
        }
        s.field("children", &node.children.len()).finish()
    }
}

fn run_connected(elements: Vec<Element>) -> Result<(), RuntimeError> {
    for el in elements {
        // An earlier reaction may have moved this element out again.
        if !el.is_connected() {
            continue;
        }
        if let Some(behavior) = el.behavior() {
            behavior.connected(&el)?;
        }
    }
    Ok(())
}

fn run_disconnected(elements: Vec<Element>) {
    for el in elements {
        if let Some(behavior) = el.behavior() {
            behavior.disconnected(&el);
        }
    }
}
