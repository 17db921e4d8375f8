//! Build strategy references.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ImageRef;

/// How the output image gets built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum StrategyKind {
    /// Build from a container build file in the source.
    #[display("Docker")]
    #[serde(rename = "Docker")]
    ContainerNative,
    /// Inject the source into a builder image.
    #[display("Source")]
    #[serde(rename = "Source")]
    BuilderImage,
    /// Hand the build to an image carrying its own tooling.
    #[display("Custom")]
    #[serde(rename = "Custom")]
    CustomTooling,
}

/// Strategy specific knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyOptions {
    /// Skip the layer cache (container-native builds).
    pub no_cache: bool,
    /// Reuse artifacts from the previous build (builder-image builds).
    pub incremental: bool,
    /// The build produces artifacts only; nothing gets deployed.
    pub build_only: bool,
}

/// The chosen strategy plus what it needs to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStrategyRef {
    pub kind: StrategyKind,
    /// Builder image, or the parent image declared by a build file.
    pub base: Option<ImageRef>,
    /// Directory within the source the build runs in.
    pub context_dir: Option<String>,
    pub options: StrategyOptions,
    /// Ports declared by the source's build file, whatever its base.
    #[serde(default)]
    pub detected_ports: BTreeSet<u16>,
    /// Caller supplied port that replaces anything detected.
    pub port_override: Option<u16>,
}

impl BuildStrategyRef {
    pub fn container_native(context_dir: Option<String>, base: Option<ImageRef>) -> Self {
        Self {
            kind: StrategyKind::ContainerNative,
            base,
            context_dir,
            options: StrategyOptions::default(),
            detected_ports: BTreeSet::new(),
            port_override: None,
        }
    }

    pub fn builder_image(base: ImageRef, context_dir: Option<String>) -> Self {
        Self {
            kind: StrategyKind::BuilderImage,
            base: Some(base),
            context_dir,
            options: StrategyOptions::default(),
            detected_ports: BTreeSet::new(),
            port_override: None,
        }
    }

    pub fn custom_tooling(base: ImageRef, context_dir: Option<String>) -> Self {
        Self {
            kind: StrategyKind::CustomTooling,
            base: Some(base),
            context_dir,
            options: StrategyOptions::default(),
            detected_ports: BTreeSet::new(),
            port_override: None,
        }
    }

    pub fn with_options(mut self, options: StrategyOptions) -> Self {
        self.options = options;
        self
    }

    /// Record the ports a build file exposes.
    pub fn with_detected_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.detected_ports = ports.into_iter().collect();
        self
    }

    /// Whether the build only produces artifacts and never runs.
    pub fn is_build_only(&self) -> bool {
        if self.options.build_only {
            return true;
        }
        match (&self.kind, &self.base) {
            (StrategyKind::BuilderImage, Some(base)) => !base.is_runnable() || base.is_build_only(),
            (StrategyKind::CustomTooling, Some(base)) => base.is_build_only(),
            _ => false,
        }
    }

    /// Ports the runtime container exposes, as far as the strategy knows.
    pub fn exposed_ports(&self) -> Vec<u16> {
        if let Some(port) = self.port_override {
            return vec![port];
        }
        match &self.base {
            Some(base) if !base.exposed_ports.is_empty() => {
                base.exposed_ports.iter().copied().collect()
            }
            _ => self.detected_ports.iter().copied().collect(),
        }
    }

    /// Replace every detected port with an explicit one.
    pub fn override_ports(&mut self, port: u16) {
        self.port_override = Some(port);
    }
}
