use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::client::Credentials;
use crate::error::RuntimeError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub components: ComponentsConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub injection: InjectionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Prefix for every route and relative navigation target. Detected from
    /// the initial location when absent.
    pub base_path: Option<String>,
    /// Id of the node routed components mount under.
    #[serde(default = "default_host")]
    pub host: String,
    /// Attribute marking elements whose clicks navigate through the router.
    #[serde(default = "default_nav_attribute")]
    pub nav_attribute: String,
}

fn default_host() -> String {
    "app".into()
}
fn default_nav_attribute() -> String {
    "data-nav".into()
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            base_path: None,
            host: default_host(),
            nav_attribute: default_nav_attribute(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComponentsConfig {
    /// Prefix every component tag must start with, in addition to the
    /// custom-element naming rules.
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// Attribute holding inline state as a JSON object.
    #[serde(default = "default_state_attribute")]
    pub attribute: String,
    /// Attribute whose presence switches a component to persisted state.
    #[serde(default = "default_key_attribute")]
    pub key_attribute: String,
    /// Attribute selecting `session` or `local` persisted storage.
    #[serde(default = "default_kind_attribute")]
    pub kind_attribute: String,
    /// File backing `local` storage.
    pub durable_path: Option<PathBuf>,
}

fn default_state_attribute() -> String {
    "data-state".into()
}
fn default_key_attribute() -> String {
    "data-storage-key".into()
}
fn default_kind_attribute() -> String {
    "data-storage".into()
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            attribute: default_state_attribute(),
            key_attribute: default_key_attribute(),
            kind_attribute: default_kind_attribute(),
            durable_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Relative request URLs are joined onto this.
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub credentials: Credentials,
    /// Bearer credential attached according to `credentials`.
    /// `TRELLIS_API_TOKEN` takes precedence.
    pub bearer_token: Option<String>,
    /// Attribute holding the auto-fetch URL.
    #[serde(default = "default_url_attribute")]
    pub url_attribute: String,
    /// Attribute naming the state slot auto-fetched data lands in.
    #[serde(default = "default_fetch_key_attribute")]
    pub key_attribute: String,
}

fn default_timeout_ms() -> u64 {
    10_000
}
fn default_url_attribute() -> String {
    "data-fetch".into()
}
fn default_fetch_key_attribute() -> String {
    "data-fetch-key".into()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_timeout_ms(),
            credentials: Credentials::default(),
            bearer_token: None,
            url_attribute: default_url_attribute(),
            key_attribute: default_fetch_key_attribute(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn resolved_bearer_token(&self) -> Option<String> {
        std::env::var("TRELLIS_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.bearer_token.clone())
    }
}

/// What happens when a declared dependency cannot be resolved on activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InjectionPolicy {
    /// Log and leave the dependency out.
    #[default]
    BestEffort,
    /// Fail the activation.
    Strict,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InjectionConfig {
    #[serde(default)]
    pub policy: InjectionPolicy,
}

impl RuntimeConfig {
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, RuntimeError> {
        toml::from_str(content)
            .map_err(|e| RuntimeError::Config(format!("Failed to parse config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config.router.base_path, None);
        assert_eq!(config.router.host, "app");
        assert_eq!(config.router.nav_attribute, "data-nav");
        assert_eq!(config.state.attribute, "data-state");
        assert_eq!(config.state.key_attribute, "data-storage-key");
        assert_eq!(config.fetch.timeout(), Duration::from_secs(10));
        assert_eq!(config.fetch.credentials, Credentials::SameOrigin);
        assert_eq!(config.injection.policy, InjectionPolicy::BestEffort);
    }

    #[test]
    fn parses_full_config() {
        let toml_str = r#"
[router]
base_path = "/app"
host = "root"
nav_attribute = "data-link"

[components]
prefix = "shop-"

[state]
durable_path = "/tmp/trellis.json"

[fetch]
base_url = "https://api.example.com"
timeout_ms = 2500
credentials = "include"
url_attribute = "data-src"

[injection]
policy = "strict"
"#;
        let config = RuntimeConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.router.base_path.as_deref(), Some("/app"));
        assert_eq!(config.router.host, "root");
        assert_eq!(config.components.prefix.as_deref(), Some("shop-"));
        assert_eq!(
            config.state.durable_path,
            Some(PathBuf::from("/tmp/trellis.json"))
        );
        assert_eq!(config.fetch.timeout_ms, 2500);
        assert_eq!(config.fetch.credentials, Credentials::Include);
        assert_eq!(config.fetch.url_attribute, "data-src");
        assert_eq!(config.fetch.key_attribute, "data-fetch-key");
        assert_eq!(config.injection.policy, InjectionPolicy::Strict);
    }

    #[test]
    fn rejects_unknown_policy() {
        let err = RuntimeConfig::from_toml_str("[injection]\npolicy = \"lenient\"").unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
    }
}
