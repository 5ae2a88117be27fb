//! Dependency and update resolution
//!
//! The resolver owns the semantic-version core (`Version`,
//! `VersionConstraint`), the transitive dependency walk with conflict
//! diagnosis, update classification, and snapshot/rollback of the
//! resolved version map. Metadata, vulnerability, and license data come
//! from injected sources so the walk itself stays deterministic and
//! testable.

pub mod constraint;
pub mod dependency;
pub mod resolve;
pub mod snapshot;
pub mod update;
pub mod version;

pub use constraint::VersionConstraint;
pub use dependency::{Dependency, DependencyKind, MetadataSource};
pub use resolve::{Conflict, DependencyResolver, Resolution};
pub use snapshot::{Snapshot, SnapshotManager};
pub use update::{UpdateController, UpdateInfo, UpdateType};
pub use version::Version;

use thiserror::Error;

/// Resolver errors.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// A version string failed to parse.
    #[error("invalid version `{0}`")]
    InvalidVersion(String),

    /// A constraint string failed to parse.
    #[error("invalid version constraint `{0}`")]
    InvalidConstraint(String),

    /// The injected metadata source could not answer.
    #[error("metadata unavailable for `{0}`: {1}")]
    MetadataUnavailable(String, String),

    /// A dependency appeared in its own discovery path.
    #[error("circular dependency: {0}")]
    CircularDependency(String),

    /// No version satisfies the gathered constraints.
    #[error("unsatisfiable constraints for `{0}`")]
    UnsatisfiableConstraints(String),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type for resolver operations.
pub type ResolverResult<T> = Result<T, ResolverError>;
