//! Image resolver backends for appgen.
//!
//! Provides resolver implementations, in canonical probe order:
//! - Local Docker daemon (highest confidence)
//! - Platform image streams, probed namespace by namespace
//! - Remote registry (catch-all)

pub mod builder;
pub mod docker;
pub mod kubernetes;
pub mod registry;

pub use appgen_core::resolver::{ImageResolverChain, Resolver, WeightedResolver};
pub use builder::{ResolverChainBuilder, assemble};
pub use docker::LocalDockerResolver;
pub use kubernetes::{ClusterImageLookup, ImageStreamResolver, KubeImageStreamLookup};
pub use registry::{HttpRegistryClient, RegistryClient, RegistryImage, RegistryResolver};
