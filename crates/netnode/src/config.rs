//! Network-level configuration shared by all nodes of a topology.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default root for per-network state directories.
pub const DEFAULT_STATE_DIR: &str = "/var/run/netnode";

/// Default prefix for namespaces created by this crate.
pub const DEFAULT_NAMESPACE_PREFIX: &str = "netnode-";

/// Settings of the network that owns the nodes.
///
/// ```
/// use netnode::NetworkConfig;
///
/// let config = NetworkConfig::from_json(r#"{"name": "lab", "namespace_prefix": "t-"}"#).unwrap();
/// assert_eq!(config.namespace_name("h1"), "t-lab-h1");
/// assert_eq!(config.node_path("h1").to_str(), Some("/var/run/netnode/lab/nodes/h1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    /// Defaults to `/var/run/netnode/<name>`.
    #[serde(default)]
    base_path: Option<PathBuf>,
    #[serde(default = "default_prefix")]
    pub namespace_prefix: String,
}

fn default_prefix() -> String {
    DEFAULT_NAMESPACE_PREFIX.to_string()
}

impl NetworkConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_path: None,
            namespace_prefix: default_prefix(),
        }
    }

    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    pub fn with_namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.namespace_prefix = prefix.into();
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("network config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Names end up in paths and namespace names.
    pub fn validate(&self) -> Result<()> {
        validate_name("network", &self.name)?;
        if self.namespace_prefix.contains('/') {
            return Err(Error::Config(format!(
                "namespace prefix {:?} contains '/'",
                self.namespace_prefix
            )));
        }
        Ok(())
    }

    pub fn base_path(&self) -> PathBuf {
        self.base_path
            .clone()
            .unwrap_or_else(|| Path::new(DEFAULT_STATE_DIR).join(&self.name))
    }

    /// `<base>/nodes/<node>`
    pub fn node_path(&self, node: &str) -> PathBuf {
        self.base_path().join("nodes").join(node)
    }

    /// `<prefix><network>-<node>`
    pub fn namespace_name(&self, node: &str) -> String {
        format!("{}{}-{}", self.namespace_prefix, self.name, node)
    }
}

/// Reject names that cannot be used as a single path component.
pub(crate) fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(Error::Config(format!("invalid {what} name {name:?}")));
    }
    Ok(())
}
