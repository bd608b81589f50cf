use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use trellis_runtime::host::Template;
use trellis_runtime::{Component, ComponentClass, ComponentContext, Route, RouteData, RuntimeConfig};

/// A route table plus the runtime settings it runs under.
///
/// ```toml
/// [router]
/// base_path = "/app"
///
/// [[routes]]
/// path = "/users/:id"
/// component = "user-page"
/// template = "user"
///
/// [templates.user]
/// nodes = [{ tag = "h1", text = "User" }]
/// ```
#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(flatten)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub templates: BTreeMap<String, Template>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteSpec {
    pub path: String,
    pub component: String,
    pub template: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid manifest {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Routes mounting a [`RoutePreview`] for each declared component.
    pub fn routes(&self) -> Vec<Route> {
        self.routes
            .iter()
            .map(|entry| {
                let mut class = ComponentClass::new(entry.component.clone(), RoutePreview::default)
                    .with_dependencies(entry.dependencies.iter().cloned());
                if let Some(template) = &entry.template {
                    class = class.with_template(template.clone());
                }
                Route::new(entry.path.clone(), class)
            })
            .collect()
    }
}

/// Stand-in component for headless navigation: records what it was mounted
/// with on its own element so the document outline shows it.
#[derive(Default)]
pub struct RoutePreview;

impl Component for RoutePreview {
    fn on_init(&mut self, ctx: &ComponentContext, route: Option<&RouteData>) -> anyhow::Result<()> {
        let (Some(route), Some(element)) = (route, ctx.element()) else {
            return Ok(());
        };
        element.set_attribute("data-pattern", route.route.pattern.clone());
        if !route.route.params.is_empty() {
            element.set_attribute("data-params", serde_json::to_string(&route.route.params)?);
        }
        if route.state != Value::Null {
            element.set_attribute("data-nav-state", route.state.to_string());
        }
        Ok(())
    }
}
