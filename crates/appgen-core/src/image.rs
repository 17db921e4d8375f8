//! Image names and resolved image references.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use crate::{Error, Result};

/// Tag used when a reference names none.
pub const DEFAULT_TAG: &str = "latest";

/// Label marking a builder image whose output cannot be run.
pub const NON_RUNNABLE_LABEL: &str = "io.appgen.non-runnable";

/// Label marking an image that only ever produces build artifacts.
pub const BUILD_ONLY_LABEL: &str = "io.appgen.build-only";

/// Label marking an image that drives its own build tooling.
pub const CUSTOM_BUILDER_LABEL: &str = "io.appgen.custom-builder";

static COMPONENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").unwrap());

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").unwrap());

/// A parsed `[registry/][namespace/]name[:tag][@digest]` image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageName {
    pub registry: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageName {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::validation("image", "may not be empty"));
        }

        let (rest, digest) = match input.split_once('@') {
            Some((rest, digest)) if !digest.is_empty() => (rest, Some(digest.to_string())),
            Some(_) => return Err(Error::validation("image", format!("{input}: empty digest"))),
            None => (input, None),
        };

        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (path, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&rest[..split], Some(rest[split + 1..].to_string()))
            }
            None => (rest, None),
        };

        if let Some(tag) = &tag {
            if !TAG.is_match(tag) {
                return Err(Error::validation("image", format!("{input}: invalid tag {tag:?}")));
            }
        }

        let mut parts: Vec<&str> = path.split('/').collect();
        let registry = if parts.len() > 1 && looks_like_registry(parts[0]) {
            Some(parts.remove(0).to_string())
        } else {
            None
        };

        let name = parts
            .pop()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::validation("image", format!("{input}: missing name")))?;

        for component in parts.iter().chain(std::iter::once(&name)) {
            if !COMPONENT.is_match(component) {
                return Err(Error::validation(
                    "image",
                    format!("{input}: invalid path component {component:?}"),
                ));
            }
        }

        let namespace = if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        };

        Ok(Self {
            registry,
            namespace,
            name: name.to_string(),
            tag,
            digest,
        })
    }

    /// `namespace/name`, or just `name`.
    pub fn repository(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }

    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }
}

impl std::fmt::Display for ImageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}", self.repository())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ImageName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

/// Which backend produced an image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImageSource {
    /// Found in the local container runtime's image store.
    LocalRuntime,
    /// Found in a platform image stream in the given namespace.
    Platform { namespace: String },
    /// Found in a remote registry.
    Registry,
    /// Named by a container-native build file, never resolved.
    Declared,
}

/// A concrete, resolved container image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: ImageName,
    /// Backend specific identifier (image id or manifest digest).
    pub id: Option<String>,
    pub exposed_ports: BTreeSet<u16>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub source: ImageSource,
}

impl ImageRef {
    pub fn new(name: ImageName, source: ImageSource) -> Self {
        Self {
            name,
            id: None,
            exposed_ports: BTreeSet::new(),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            source,
        }
    }

    /// Image named by a build file rather than resolved through a backend.
    pub fn declared(name: ImageName, exposed_ports: BTreeSet<u16>) -> Self {
        Self {
            exposed_ports,
            ..Self::new(name, ImageSource::Declared)
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_exposed_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.exposed_ports = ports.into_iter().collect();
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Full pull specification, e.g. `docker.io/openshift/ruby-20-centos:latest`.
    pub fn pull_spec(&self) -> String {
        self.name.to_string()
    }

    /// Whether the platform should track this image through an image repository.
    pub fn is_tracked(&self) -> bool {
        matches!(
            self.source,
            ImageSource::Platform { .. } | ImageSource::Registry
        )
    }

    pub fn is_runnable(&self) -> bool {
        !self.label_is_true(NON_RUNNABLE_LABEL)
    }

    pub fn is_build_only(&self) -> bool {
        self.label_is_true(BUILD_ONLY_LABEL)
    }

    pub fn is_custom_builder(&self) -> bool {
        self.label_is_true(CUSTOM_BUILDER_LABEL)
    }

    fn label_is_true(&self, key: &str) -> bool {
        self.labels
            .get(key)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

/// Parse a runtime port declaration such as `8080/tcp` or `8080`.
///
/// Only TCP ports are exposed through services.
pub fn parse_exposed_port(spec: &str) -> Option<u16> {
    let (port, proto) = spec.split_once('/').unwrap_or((spec, "tcp"));
    if !proto.eq_ignore_ascii_case("tcp") {
        return None;
    }
    port.trim().parse().ok().filter(|p| *p != 0)
}

/// Parse `KEY=VALUE` entries as found in an image config.
pub fn parse_env_entries<'a>(entries: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, String> {
    entries
        .into_iter()
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
