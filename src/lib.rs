//! # TEMPLAR - Template Management Engine
//!
//! A command-line template management engine built in Rust.
//!
//! ## Architecture
//!
//! - `engine`: expression evaluator and conditional block renderer
//! - `cache`: multi-tier content cache (memory, disk, remote)
//! - `resolver`: semantic versions, constraint solving, updates, snapshots
//! - `lifecycle`: version state machine with approval-gated transitions
//! - `registry`: template manifest discovery and indexing
//! - `transport`: bandwidth profiles, priority queue, circuit breaker
//! - `config`: one configuration surface for every component
//! - `commands`: the thin command layer the binary dispatches to

#![warn(missing_docs)]
#![warn(clippy::all)]

// Template engine - expressions and rendering
pub mod engine;

// Multi-tier content cache
pub mod cache;

// Version resolution, updates, snapshots
pub mod resolver;

// Lifecycle state machine and approvals
pub mod lifecycle;

// Template discovery
pub mod registry;

// Backpressure and failure containment
pub mod transport;

// Configuration
pub mod config;

// Command layer
pub mod commands;

// Re-export commonly used types
pub use cache::{CacheEngine, CacheStatistics};
pub use config::Config;
pub use engine::{Evaluator, RenderContext, RenderResult, TemplateRenderer, Value};
pub use lifecycle::{LifecycleManager, LifecycleState};
pub use registry::TemplateRegistry;
pub use resolver::{
    Dependency, DependencyResolver, Resolution, Version, VersionConstraint,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
