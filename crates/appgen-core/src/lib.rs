//! Core domain types and traits for appgen.
//!
//! This crate contains:
//! - Source, image and build strategy references
//! - The `Resolver` trait and the ordered image resolver chain
//! - Generated platform objects (build, deployment, service, image repository)
//! - Name validation shared by every stage

pub mod error;
pub mod image;
pub mod object;
pub mod resolver;
pub mod source;
pub mod strategy;
pub mod validation;

pub use error::{Error, Result};
pub use image::{ImageName, ImageRef, ImageSource};
pub use object::{GeneratedObject, ObjectKey, ObjectKind};
pub use resolver::{ImageResolverChain, Resolver, WeightedResolver};
pub use source::{SourceLocation, SourceRef};
pub use strategy::{BuildStrategyRef, StrategyKind, StrategyOptions};
