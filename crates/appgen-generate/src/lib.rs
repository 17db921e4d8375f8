//! Generation pipeline for appgen.
//!
//! Turns a source location into platform objects:
//! - `source`: normalize a URL or directory into a [`SourceRef`](appgen_core::SourceRef)
//! - `detector` / `strategy`: pick exactly one build strategy
//! - `pipeline`: assemble build and deployment definitions
//! - `emitter`: acceptance policies and service synthesis
//! - `generator`: the single entry point tying the stages together

pub mod detector;
pub mod emitter;
pub mod generator;
pub mod pipeline;
pub mod source;
pub mod strategy;

pub use detector::{
    BuildFile, ClonedSnapshot, Detection, Detector, DetectorChain, DirectorySnapshot, GitFetcher,
    SourceFetcher, SourceSnapshot, parse_build_file,
};
pub use emitter::{AcceptAll, AcceptFirst, Acceptor, add_services};
pub use generator::{GenerateRequest, Generator, SourceInput};
pub use pipeline::{DeploymentPlan, Pipeline};
pub use source::{CheckoutInfo, CheckoutInspector, GitCli, SourceRefGenerator, is_remote_repository};
pub use strategy::{StrategyOverride, StrategyRefGenerator};
