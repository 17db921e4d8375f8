//! Image resolvers and the ordered resolver chain.
//!
//! A resolver maps a symbolic image name (`openshift/ruby-20-centos`) to a
//! concrete [`ImageRef`]. Backends (local runtime, platform image streams,
//! remote registries) each implement [`Resolver`]; [`ImageResolverChain`] is
//! itself a resolver, so chains nest and stub resolvers slot in for tests.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{Error, ImageName, ImageRef, Result};

/// Maps an image name to a concrete image reference.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Name of this resolver, used in logs.
    fn name(&self) -> &str;

    /// Resolve `name`.
    ///
    /// Fails with [`Error::ResolverNoMatch`] when the backend answered but
    /// knows no such image, and [`Error::ResolverTransient`] when the backend
    /// could not be reached.
    async fn resolve(&self, name: &str) -> Result<ImageRef>;
}

/// A resolver paired with a confidence weight.
///
/// Weights are carried for a future scoring tie-break; resolution order is
/// insertion order and the first match wins.
#[derive(Clone)]
pub struct WeightedResolver {
    pub resolver: Arc<dyn Resolver>,
    pub weight: f32,
}

impl WeightedResolver {
    pub fn new(resolver: Arc<dyn Resolver>, weight: f32) -> Self {
        Self { resolver, weight }
    }
}

impl std::fmt::Debug for WeightedResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightedResolver")
            .field("resolver", &self.resolver.name())
            .field("weight", &self.weight)
            .finish()
    }
}

/// Ordered first-successful-match resolver.
#[derive(Debug, Clone, Default)]
pub struct ImageResolverChain {
    resolvers: Vec<WeightedResolver>,
}

impl ImageResolverChain {
    pub fn new(resolvers: Vec<WeightedResolver>) -> Self {
        Self { resolvers }
    }

    /// Append a resolver. Only usable while the chain is being built.
    pub fn with(mut self, resolver: Arc<dyn Resolver>, weight: f32) -> Self {
        self.resolvers.push(WeightedResolver::new(resolver, weight));
        self
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Resolver names in probe order.
    pub fn names(&self) -> Vec<&str> {
        self.resolvers.iter().map(|r| r.resolver.name()).collect()
    }
}

#[async_trait]
impl Resolver for ImageResolverChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn resolve(&self, name: &str) -> Result<ImageRef> {
        ImageName::parse(name)?;

        for entry in &self.resolvers {
            let backend = entry.resolver.name();
            debug!(image = %name, resolver = %backend, "Querying resolver");

            match entry.resolver.resolve(name).await {
                Ok(image) => {
                    info!(
                        image = %name,
                        resolver = %backend,
                        pull_spec = %image.pull_spec(),
                        "Resolved image"
                    );
                    return Ok(image);
                }
                Err(Error::ResolverTransient(msg)) => {
                    warn!(image = %name, resolver = %backend, error = %msg, "Resolver unavailable, skipping");
                }
                Err(e) if e.is_skippable() => {
                    debug!(image = %name, resolver = %backend, "No match");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Resolution(name.to_string()))
    }
}
