//! Template version lifecycle
//!
//! Versions move through a fixed state machine; transitions outside the
//! table are rejected, and transitions into `Released`, `Deprecated`, or
//! `Archived` are gated behind an approval request that every listed
//! approver must accept.

pub mod approval;
pub mod manager;

pub use approval::{ApprovalComment, ApprovalRequest, ApprovalStatus};
pub use manager::{LifecycleManager, StateChangeOutcome, TemplateVersion};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The requested transition is not in the table.
    #[error("illegal transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },

    /// The actor is not on the request's approver list.
    #[error("`{0}` is not authorized to decide this request")]
    NotAuthorized(String),

    /// The approval request passed its deadline.
    #[error("approval request {0} has expired")]
    RequestExpired(Uuid),

    /// A version or request id did not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was already decided.
    #[error("approval request {0} is no longer pending")]
    AlreadyDecided(Uuid),
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Lifecycle states of a template version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Under active development.
    Development,
    /// Undergoing validation.
    Testing,
    /// Published for early adopters.
    Prerelease,
    /// Generally available.
    Released,
    /// Receiving fixes only.
    Maintenance,
    /// Discouraged for new use.
    Deprecated,
    /// Retained for history, not installable.
    Archived,
    /// Removed.
    Deleted,
}

impl LifecycleState {
    /// Whether the transition to `target` is in the table.
    pub fn can_transition_to(&self, target: LifecycleState) -> bool {
        use LifecycleState::*;

        matches!(
            (self, target),
            (Development, Testing)
                | (Testing, Development)
                | (Testing, Prerelease)
                | (Testing, Archived)
                | (Prerelease, Released)
                | (Released, Maintenance)
                | (Released, Deprecated)
                | (Maintenance, Archived)
                | (Deprecated, Archived)
                | (Archived, Deleted)
        )
    }

    /// Whether entering `target` requires an approved request.
    pub fn requires_approval(target: LifecycleState) -> bool {
        matches!(
            target,
            LifecycleState::Released | LifecycleState::Deprecated | LifecycleState::Archived
        )
    }

    /// The approver set attached when a request names none.
    pub fn default_approvers(target: LifecycleState) -> Vec<String> {
        match target {
            LifecycleState::Released => {
                vec!["release_manager".to_string(), "tech_lead".to_string()]
            }
            LifecycleState::Deprecated => {
                vec!["product_manager".to_string(), "tech_lead".to_string()]
            }
            LifecycleState::Archived => vec!["admin".to_string()],
            _ => vec!["tech_lead".to_string()],
        }
    }
}

/// A recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
    /// The affected version id.
    pub version_id: String,
    /// State before.
    pub from_state: LifecycleState,
    /// State after.
    pub to_state: LifecycleState,
    /// Who drove the transition.
    pub actor: String,
    /// Optional note.
    pub message: Option<String>,
}
