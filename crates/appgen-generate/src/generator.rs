//! Single entry point of the generation pipeline.

use crate::detector::{DetectorChain, SourceFetcher};
use crate::emitter::{AcceptFirst, add_services};
use crate::pipeline::Pipeline;
use crate::source::{CheckoutInspector, SourceRefGenerator};
use crate::strategy::{StrategyOverride, StrategyRefGenerator};
use appgen_core::{Error, GeneratedObject, Resolver, Result, StrategyOptions};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Where the source to generate from lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    Url(String),
    Directory(PathBuf),
}

/// Everything the caller can say about a generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub location: SourceInput,
    /// Name for every generated object, derived from the source when absent.
    pub name: Option<String>,
    pub git_ref: Option<String>,
    pub strategy_override: Option<StrategyOverride>,
    /// Replaces every port found while detecting the strategy.
    pub port: Option<u16>,
    pub env: BTreeMap<String, String>,
    pub options: StrategyOptions,
}

impl GenerateRequest {
    pub fn new(location: SourceInput) -> Self {
        Self {
            location,
            name: None,
            git_ref: None,
            strategy_override: None,
            port: None,
            env: BTreeMap::new(),
            options: StrategyOptions::default(),
        }
    }
}

/// Generates platform objects for a source.
pub struct Generator {
    sources: SourceRefGenerator,
    strategies: StrategyRefGenerator,
}

impl Generator {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        fetcher: Arc<dyn SourceFetcher>,
        inspector: Arc<dyn CheckoutInspector>,
        detectors: DetectorChain,
    ) -> Self {
        Self {
            sources: SourceRefGenerator::new(inspector),
            strategies: StrategyRefGenerator::new(resolver, fetcher, detectors),
        }
    }

    /// Run every stage in order. The first error aborts the run.
    pub async fn generate(&self, request: GenerateRequest) -> Result<Vec<GeneratedObject>> {
        if request.port == Some(0) {
            return Err(Error::validation("port", "must be between 1 and 65535"));
        }

        let source = match &request.location {
            SourceInput::Url(url) => self.sources.from_url(url)?,
            SourceInput::Directory(dir) => self.sources.from_directory(dir).await?,
        };
        let source = self.sources.with_overrides(
            source,
            request.name.as_deref(),
            request.git_ref.as_deref(),
        )?;

        let mut strategy = self
            .strategies
            .generate(&source, request.strategy_override.as_ref(), request.options)
            .await?;
        if let Some(port) = request.port {
            strategy.override_ports(port);
        }

        let name = source.name.clone();
        let mut pipeline = Pipeline::new(&name, strategy.base.clone(), strategy, source)?;
        pipeline.needs_deployment(&request.env);

        let objects = add_services(pipeline.objects(&mut AcceptFirst::new()));
        info!(
            name = %name,
            strategy = %pipeline.strategy.kind,
            objects = objects.len(),
            "Generated objects"
        );
        Ok(objects)
    }
}
