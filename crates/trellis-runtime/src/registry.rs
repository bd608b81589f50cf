use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::component::{ComponentClass, RuntimeComponent, RuntimeServices};
use crate::error::RuntimeError;
use crate::host::{CustomElement, Document};

/// Defines component tags with the host document.
///
/// A tag is defined at most once. Registering it again is a no-op unless the
/// strict API is used.
pub struct ComponentRegistry {
    document: Document,
    services: RuntimeServices,
    registered: RefCell<BTreeMap<String, ComponentClass>>,
}

impl ComponentRegistry {
    pub fn new(document: Document, services: RuntimeServices) -> Self {
        Self {
            document,
            services,
            registered: RefCell::new(BTreeMap::new()),
        }
    }

    /// Define `tag` so its elements run `class`.
    pub fn register_component_class(
        &self,
        tag: &str,
        class: ComponentClass,
    ) -> Result<(), RuntimeError> {
        validate_tag(tag, self.services.config.components.prefix.as_deref())?;

        if self.is_registered(tag) {
            tracing::debug!(tag, "Component already registered");
            return Ok(());
        }

        let services = self.services.clone();
        let behavior_class = class.clone();
        self.document.define(
            tag,
            Rc::new(move || {
                Rc::new(RuntimeComponent::new(
                    behavior_class.clone(),
                    services.clone(),
                )) as Rc<dyn CustomElement>
            }),
        )?;

        tracing::info!(
            tag,
            dependencies = class.dependencies().len(),
            template = class.template().unwrap_or("-"),
            "Component registered"
        );
        self.registered.borrow_mut().insert(tag.to_string(), class);
        Ok(())
    }

    /// Register under the class's own tag.
    pub fn register(&self, class: ComponentClass) -> Result<(), RuntimeError> {
        let tag = class.tag().to_string();
        self.register_component_class(&tag, class)
    }

    /// Like [`register`](Self::register) but a repeat is an error.
    pub fn register_strict(&self, class: ComponentClass) -> Result<(), RuntimeError> {
        if self.is_registered(class.tag()) {
            return Err(RuntimeError::DuplicateRegistration {
                tag: class.tag().to_string(),
            });
        }
        self.register(class)
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.document.is_defined(tag)
    }

    /// Tags registered through this registry, sorted.
    pub fn tags(&self) -> Vec<String> {
        self.registered.borrow().keys().cloned().collect()
    }

    pub fn class(&self, tag: &str) -> Option<ComponentClass> {
        self.registered.borrow().get(tag).cloned()
    }
}

/// Custom element naming: starts with a lowercase ASCII letter, contains a
/// hyphen, no uppercase or whitespace, and carries the configured prefix.
fn validate_tag(tag: &str, prefix: Option<&str>) -> Result<(), RuntimeError> {
    let invalid = |reason: &str| RuntimeError::InvalidTagName {
        tag: tag.to_string(),
        reason: reason.to_string(),
    };

    if tag.is_empty() {
        return Err(invalid("tag name is empty"));
    }
    if !tag.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(invalid("must start with a lowercase ASCII letter"));
    }
    if !tag.contains('-') {
        return Err(invalid("must contain a hyphen"));
    }
    if let Some(bad) = tag
        .chars()
        .find(|c| c.is_ascii_uppercase() || c.is_whitespace() || matches!(c, '/' | '>' | '<' | '"' | '\'' | '='))
    {
        return Err(invalid(&format!("must not contain {bad:?}")));
    }
    if let Some(prefix) = prefix
        && !tag.starts_with(prefix)
    {
        return Err(invalid(&format!("must start with {prefix:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ReqwestTransport;
    use crate::component::Component;
    use crate::config::RuntimeConfig;
    use crate::state::StateBackends;
    use std::sync::Arc;
    use trellis_di::Container;

    struct Blank;
    impl Component for Blank {}

    fn registry(config: RuntimeConfig) -> ComponentRegistry {
        let services = RuntimeServices {
            container: Arc::new(Container::new()),
            backends: StateBackends::in_memory(),
            transport: Arc::new(ReqwestTransport::new(Default::default())),
            config: Rc::new(config),
        };
        ComponentRegistry::new(Document::new("/"), services)
    }

    #[test]
    fn repeat_registration_is_a_no_op() {
        let registry = registry(RuntimeConfig::default());
        registry.register(ComponentClass::new("home-page", || Blank)).unwrap();
        registry.register(ComponentClass::new("home-page", || Blank)).unwrap();

        assert!(registry.is_registered("home-page"));
        assert_eq!(registry.tags(), vec!["home-page"]);
    }

    #[test]
    fn strict_registration_rejects_repeats() {
        let registry = registry(RuntimeConfig::default());
        registry
            .register_strict(ComponentClass::new("home-page", || Blank))
            .unwrap();
        let err = registry
            .register_strict(ComponentClass::new("home-page", || Blank))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateRegistration { .. }));
    }

    #[test]
    fn rejects_invalid_names() {
        let registry = registry(RuntimeConfig::default());
        for tag in ["", "home", "Home-page", "1-page", "home page-x", "my-Page"] {
            let err = registry
                .register_component_class(tag, ComponentClass::new("x-y", || Blank))
                .unwrap_err();
            assert!(
                matches!(err, RuntimeError::InvalidTagName { .. }),
                "{tag:?} should be rejected"
            );
        }
        assert!(registry.tags().is_empty());
    }

    #[test]
    fn enforces_configured_prefix() {
        let config = RuntimeConfig::from_toml_str("[components]\nprefix = \"shop-\"").unwrap();
        let registry = registry(config);

        assert!(registry.register(ComponentClass::new("cart-view", || Blank)).is_err());
        registry
            .register(ComponentClass::new("shop-cart", || Blank))
            .unwrap();
        assert!(registry.is_registered("shop-cart"));
    }

    #[test]
    fn registered_tags_upgrade_to_runtime_components() {
        let registry = registry(RuntimeConfig::default());
        registry
            .register(ComponentClass::new("home-page", || Blank).with_template("home"))
            .unwrap();

        let el = registry.document.create_element("home-page");
        let template = el.with_behavior(|c: &RuntimeComponent| c.class().template().map(String::from));
        assert_eq!(template, Some(Some("home".to_string())));
    }
}
