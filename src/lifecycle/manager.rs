//! Lifecycle manager
//!
//! Owns the version records, the approval request book, and the event
//! log. `request_state_change` validates the transition, attaches default
//! approvers when the caller names none, and either applies the change or
//! parks it behind a pending request. When the final approver accepts,
//! the transition executes under the implicit system actor.

use super::approval::{ApprovalRequest, ApprovalStatus};
use super::{LifecycleError, LifecycleEvent, LifecycleResult, LifecycleState};
use crate::resolver::version::Version;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Actor recorded when an approved request executes its transition.
const SYSTEM_ACTOR: &str = "system";

/// Default lifetime of a pending approval request.
pub const DEFAULT_APPROVAL_TTL_DAYS: i64 = 7;

/// A tracked template version with its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVersion {
    /// Identifier of the form `name@version`.
    pub id: String,
    /// Template name.
    pub name: String,
    /// The version itself.
    pub version: Version,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set when the version enters `Released`.
    pub released_at: Option<DateTime<Utc>>,
}

impl TemplateVersion {
    fn new(name: &str, version: Version) -> Self {
        Self {
            id: format!("{}@{}", name, version),
            name: name.to_string(),
            version,
            state: LifecycleState::Development,
            created_at: Utc::now(),
            released_at: None,
        }
    }
}

/// Outcome of a state-change request.
#[derive(Debug, Clone)]
pub enum StateChangeOutcome {
    /// The transition needed no approval and has been applied.
    Applied,
    /// The transition is parked behind this pending request.
    PendingApproval(ApprovalRequest),
}

/// The lifecycle manager.
pub struct LifecycleManager {
    versions: RwLock<HashMap<String, TemplateVersion>>,
    /// Current version id per template name, for update and rollback.
    current: RwLock<HashMap<String, String>>,
    requests: RwLock<HashMap<Uuid, ApprovalRequest>>,
    events: RwLock<Vec<LifecycleEvent>>,
    approval_ttl: Duration,
}

impl LifecycleManager {
    /// Manager with the default 7-day approval deadline.
    pub fn new() -> Self {
        Self::with_approval_ttl(Duration::days(DEFAULT_APPROVAL_TTL_DAYS))
    }

    /// Manager with an explicit approval deadline.
    pub fn with_approval_ttl(approval_ttl: Duration) -> Self {
        Self {
            versions: RwLock::new(HashMap::new()),
            current: RwLock::new(HashMap::new()),
            requests: RwLock::new(HashMap::new()),
            events: RwLock::new(Vec::new()),
            approval_ttl,
        }
    }

    /// Register a new version in `Development` and make it the template's
    /// current version when it has none.
    pub fn create_version(&self, name: &str, version: Version) -> TemplateVersion {
        let record = TemplateVersion::new(name, version);
        self.versions
            .write()
            .insert(record.id.clone(), record.clone());
        self.current
            .write()
            .entry(name.to_string())
            .or_insert_with(|| record.id.clone());
        log::info!("created version {}", record.id);
        record
    }

    /// Look up a version record.
    pub fn get_version(&self, version_id: &str) -> Option<TemplateVersion> {
        self.versions.read().get(version_id).cloned()
    }

    /// The current version of a template, if tracked.
    pub fn current_version(&self, name: &str) -> Option<TemplateVersion> {
        let current = self.current.read();
        let id = current.get(name)?;
        self.versions.read().get(id).cloned()
    }

    /// All current `(name, version)` pairs, for snapshots.
    pub fn current_versions(&self) -> std::collections::BTreeMap<String, Version> {
        let current = self.current.read();
        let versions = self.versions.read();
        current
            .iter()
            .filter_map(|(name, id)| {
                versions
                    .get(id)
                    .map(|record| (name.clone(), record.version.clone()))
            })
            .collect()
    }

    /// Point a template at a (possibly newly created) version, recording
    /// the switch. Used by update application and rollback.
    pub fn set_current_version(&self, name: &str, version: &Version, actor: &str) {
        let id = format!("{}@{}", name, version);
        if !self.versions.read().contains_key(&id) {
            self.create_version(name, version.clone());
        }
        self.current.write().insert(name.to_string(), id.clone());
        log::info!("{} switched {} to {}", actor, name, id);
    }

    /// Request a transition. Illegal transitions fail; protected targets
    /// return a pending approval request, everything else applies
    /// immediately.
    pub fn request_state_change(
        &self,
        version_id: &str,
        target: LifecycleState,
        requested_by: &str,
        approvers: Option<Vec<String>>,
        reason: Option<String>,
    ) -> LifecycleResult<StateChangeOutcome> {
        let current_state = self
            .get_version(version_id)
            .ok_or_else(|| LifecycleError::NotFound(version_id.to_string()))?
            .state;

        if !current_state.can_transition_to(target) {
            return Err(LifecycleError::IllegalTransition {
                from: current_state,
                to: target,
            });
        }

        if !LifecycleState::requires_approval(target) {
            self.apply_transition(version_id, target, requested_by, None)?;
            return Ok(StateChangeOutcome::Applied);
        }

        let approvers = match approvers {
            Some(approvers) if !approvers.is_empty() => approvers,
            _ => LifecycleState::default_approvers(target),
        };
        let request = ApprovalRequest::new(
            version_id.to_string(),
            current_state,
            target,
            approvers,
            requested_by.to_string(),
            reason,
            Utc::now() + self.approval_ttl,
        );
        log::info!(
            "state change {} -> {:?} awaits approval by {:?} (request {})",
            version_id,
            target,
            request.approvers,
            request.id
        );
        self.requests.write().insert(request.id, request.clone());
        Ok(StateChangeOutcome::PendingApproval(request))
    }

    /// Record an approval; when the final approver accepts, the gated
    /// transition executes under the system actor.
    pub fn approve(
        &self,
        request_id: Uuid,
        approver: &str,
        comment: Option<String>,
    ) -> LifecycleResult<ApprovalRequest> {
        let (complete, request) = {
            let mut requests = self.requests.write();
            let request = requests
                .get_mut(&request_id)
                .ok_or_else(|| LifecycleError::NotFound(request_id.to_string()))?;
            if request.status == ApprovalStatus::Pending && request.is_expired(Utc::now()) {
                request.expire();
                return Err(LifecycleError::RequestExpired(request_id));
            }
            let complete = request.approve(approver, comment)?;
            (complete, request.clone())
        };

        if complete {
            self.apply_transition(
                &request.version_id,
                request.target_state,
                SYSTEM_ACTOR,
                Some(format!("approval request {}", request.id)),
            )?;
        }
        Ok(request)
    }

    /// Reject a pending request.
    pub fn reject(
        &self,
        request_id: Uuid,
        approver: &str,
        reason: String,
    ) -> LifecycleResult<ApprovalRequest> {
        let mut requests = self.requests.write();
        let request = requests
            .get_mut(&request_id)
            .ok_or_else(|| LifecycleError::NotFound(request_id.to_string()))?;
        if request.status == ApprovalStatus::Pending && request.is_expired(Utc::now()) {
            request.expire();
            return Err(LifecycleError::RequestExpired(request_id));
        }
        request.reject(approver, reason)?;
        Ok(request.clone())
    }

    /// Look up an approval request.
    pub fn get_request(&self, request_id: Uuid) -> Option<ApprovalRequest> {
        self.requests.read().get(&request_id).cloned()
    }

    /// Expire every overdue pending request; returns how many flipped.
    pub fn expire_overdue_requests(&self) -> usize {
        let now = Utc::now();
        let mut flipped = 0;
        for request in self.requests.write().values_mut() {
            if request.status == ApprovalStatus::Pending && request.is_expired(now) {
                request.expire();
                flipped += 1;
            }
        }
        if flipped > 0 {
            log::info!("expired {} overdue approval request(s)", flipped);
        }
        flipped
    }

    /// The recorded event log.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.read().clone()
    }

    fn apply_transition(
        &self,
        version_id: &str,
        target: LifecycleState,
        actor: &str,
        message: Option<String>,
    ) -> LifecycleResult<()> {
        let mut versions = self.versions.write();
        let record = versions
            .get_mut(version_id)
            .ok_or_else(|| LifecycleError::NotFound(version_id.to_string()))?;

        if !record.state.can_transition_to(target) {
            return Err(LifecycleError::IllegalTransition {
                from: record.state,
                to: target,
            });
        }

        let from = record.state;
        record.state = target;
        if target == LifecycleState::Released {
            record.released_at = Some(Utc::now());
        }

        log::info!("{} transitioned {:?} -> {:?}", version_id, from, target);
        self.events.write().push(LifecycleEvent {
            timestamp: Utc::now(),
            version_id: version_id.to_string(),
            from_state: from,
            to_state: target,
            actor: actor.to_string(),
            message,
        });
        Ok(())
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
