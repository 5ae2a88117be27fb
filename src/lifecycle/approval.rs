//! Approval requests for protected transitions
//!
//! A request collects decisions from a fixed approver list. It becomes
//! `Approved` exactly when every listed approver has approved; a single
//! rejection decides it. Requests expire after a deadline.

use super::{LifecycleError, LifecycleResult, LifecycleState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    /// Awaiting decisions.
    Pending,
    /// Every approver approved.
    Approved,
    /// An approver rejected.
    Rejected,
    /// The requester withdrew it.
    Withdrawn,
    /// The deadline passed before completion.
    Expired,
}

/// A recorded approval comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalComment {
    /// Who commented.
    pub approver: String,
    /// The comment.
    pub comment: String,
    /// When.
    pub timestamp: DateTime<Utc>,
}

/// A gate in front of a protected lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Request identifier.
    pub id: Uuid,
    /// The version the transition applies to.
    pub version_id: String,
    /// The state the transition targets.
    pub target_state: LifecycleState,
    /// The state the version was in when requested.
    pub current_state: LifecycleState,
    /// Current status.
    pub status: ApprovalStatus,
    /// Everyone who must approve.
    pub approvers: Vec<String>,
    /// Who has approved so far; always a subset of `approvers`.
    pub approved_by: Vec<String>,
    /// Who rejected, if anyone.
    pub rejected_by: Vec<String>,
    /// The requester's reason, or a rejection reason once decided.
    pub reason: Option<String>,
    /// Deadline after which the request expires.
    pub expires_at: DateTime<Utc>,
    /// Who requested the change.
    pub requested_by: String,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// Comments attached along the way.
    pub comments: Vec<ApprovalComment>,
}

impl ApprovalRequest {
    /// Create a pending request.
    pub fn new(
        version_id: String,
        current_state: LifecycleState,
        target_state: LifecycleState,
        approvers: Vec<String>,
        requested_by: String,
        reason: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            version_id,
            target_state,
            current_state,
            status: ApprovalStatus::Pending,
            approvers,
            approved_by: Vec::new(),
            rejected_by: Vec::new(),
            reason,
            expires_at,
            requested_by,
            created_at: Utc::now(),
            comments: Vec::new(),
        }
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Record an approval. Returns `true` when this decision completed
    /// the request (every approver has now approved).
    pub fn approve(&mut self, approver: &str, comment: Option<String>) -> LifecycleResult<bool> {
        self.ensure_pending()?;
        if !self.approvers.iter().any(|a| a == approver) {
            return Err(LifecycleError::NotAuthorized(approver.to_string()));
        }

        if !self.approved_by.iter().any(|a| a == approver) {
            self.approved_by.push(approver.to_string());
        }
        if let Some(comment) = comment {
            self.comments.push(ApprovalComment {
                approver: approver.to_string(),
                comment,
                timestamp: Utc::now(),
            });
        }

        let complete = self
            .approvers
            .iter()
            .all(|a| self.approved_by.iter().any(|b| b == a));
        if complete {
            self.status = ApprovalStatus::Approved;
        }
        Ok(complete)
    }

    /// Record a rejection; a single rejection decides the request.
    pub fn reject(&mut self, approver: &str, reason: String) -> LifecycleResult<()> {
        self.ensure_pending()?;
        if !self.approvers.iter().any(|a| a == approver) {
            return Err(LifecycleError::NotAuthorized(approver.to_string()));
        }
        self.rejected_by.push(approver.to_string());
        self.reason = Some(reason);
        self.status = ApprovalStatus::Rejected;
        Ok(())
    }

    /// Withdraw a pending request.
    pub fn withdraw(&mut self) -> LifecycleResult<()> {
        self.ensure_pending()?;
        self.status = ApprovalStatus::Withdrawn;
        Ok(())
    }

    /// Mark an overdue request expired.
    pub fn expire(&mut self) {
        if self.status == ApprovalStatus::Pending {
            self.status = ApprovalStatus::Expired;
        }
    }

    fn ensure_pending(&self) -> LifecycleResult<()> {
        if self.status != ApprovalStatus::Pending {
            return Err(LifecycleError::AlreadyDecided(self.id));
        }
        Ok(())
    }
}
