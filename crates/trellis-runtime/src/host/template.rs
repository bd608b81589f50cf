use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One node of a template outline.
///
/// Templates are element trees, not markup: instantiating one creates fresh
/// elements through the document so custom tags inside it are upgraded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateNode {
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub children: Vec<TemplateNode>,
}

impl TemplateNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn child(mut self, child: TemplateNode) -> Self {
        self.children.push(child);
        self
    }
}

/// The content a component renders into itself on first activation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    #[serde(default)]
    pub nodes: Vec<TemplateNode>,
}

impl Template {
    pub fn new(nodes: Vec<TemplateNode>) -> Self {
        Self { nodes }
    }
}

impl From<TemplateNode> for Template {
    fn from(node: TemplateNode) -> Self {
        Self { nodes: vec![node] }
    }
}
