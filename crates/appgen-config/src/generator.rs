//! Generator configuration parsing.

use crate::{ConfigError, ConfigResult};
use appgen_core::validation::is_dns1123_label;
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Namespace probed after the caller's own.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Registry queried when none is configured.
pub const DEFAULT_REGISTRY: &str = "https://registry-1.docker.io";

/// Settings for the generator and its resolver backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Project namespace probed first by the platform resolver.
    pub namespace: Option<String>,
    /// Namespace probed after the project namespace.
    pub default_namespace: String,
    pub resolvers: ResolverSettings,
    /// Builder image overrides keyed by detector id.
    pub builders: BTreeMap<String, String>,
}

/// Which resolver backends to put in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverSettings {
    pub docker: bool,
    pub cluster: bool,
    /// Registry base URL, `None` when the registry backend is disabled.
    pub registry: Option<String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            docker: true,
            cluster: true,
            registry: Some(DEFAULT_REGISTRY.to_string()),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            resolvers: ResolverSettings::default(),
            builders: BTreeMap::new(),
        }
    }
}

impl GeneratorConfig {
    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => parse_generator_config(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the project namespace, held to the same rules as the config file.
    pub fn with_namespace(mut self, namespace: Option<String>) -> ConfigResult<Self> {
        if let Some(ns) = namespace {
            self.namespace = Some(validate_namespace("namespace", ns)?);
        }
        Ok(self)
    }
}

/// Parse a generator configuration from KDL text.
pub fn parse_generator_config(kdl: &str) -> ConfigResult<GeneratorConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = GeneratorConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "namespace" => {
                let ns = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("namespace value".to_string()))?;
                config.namespace = Some(validate_namespace("namespace", ns)?);
            }
            "default-namespace" => {
                let ns = get_first_string_arg(node).ok_or_else(|| {
                    ConfigError::MissingField("default-namespace value".to_string())
                })?;
                config.default_namespace = validate_namespace("default-namespace", ns)?;
            }
            "resolvers" => {
                config.resolvers = parse_resolvers(node)?;
            }
            "builders" => {
                config.builders = parse_builders(node)?;
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_resolvers(node: &KdlNode) -> ConfigResult<ResolverSettings> {
    let mut settings = ResolverSettings::default();

    let Some(children) = node.children() else {
        return Ok(settings);
    };

    for child in children.nodes() {
        let enabled = get_bool_prop(child, "enabled").unwrap_or(true);
        match child.name().value() {
            "docker" => settings.docker = enabled,
            "cluster" => settings.cluster = enabled,
            "registry" => {
                settings.registry = if enabled {
                    let url = get_first_string_arg(child)
                        .unwrap_or_else(|| DEFAULT_REGISTRY.to_string());
                    Some(validate_registry_url(url)?)
                } else {
                    None
                };
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "resolvers".to_string(),
                    message: format!("unknown resolver: {}", other),
                });
            }
        }
    }

    Ok(settings)
}

fn parse_builders(node: &KdlNode) -> ConfigResult<BTreeMap<String, String>> {
    let mut builders = BTreeMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let id = child.name().value().to_string();
            let image = get_first_string_arg(child)
                .ok_or_else(|| ConfigError::MissingField(format!("builder image for '{}'", id)))?;
            if builders.insert(id.clone(), image).is_some() {
                return Err(ConfigError::Duplicate(format!("builder '{}'", id)));
            }
        }
    }

    Ok(builders)
}

fn validate_namespace(field: &str, ns: String) -> ConfigResult<String> {
    if is_dns1123_label(&ns) {
        Ok(ns)
    } else {
        Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("{:?} is not a valid namespace", ns),
        })
    }
}

fn validate_registry_url(raw: String) -> ConfigResult<String> {
    let url = url::Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
        field: "registry".to_string(),
        message: format!("{}: {}", raw, e),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            field: "registry".to_string(),
            message: format!("unsupported scheme {:?}", url.scheme()),
        });
    }
    Ok(raw.trim_end_matches('/').to_string())
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}
