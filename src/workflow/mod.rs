//! Workflow sessions: `testing → issues → todos` over the routed backends.
//!
//! The engine owns every session entry. Phases only talk to backends through
//! the [`McpRouter`](crate::router::McpRouter), so they inherit routing,
//! retries and per-call timeouts.

mod engine;
mod methods;
mod phases;
mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

pub use engine::WorkflowEngine;
pub use methods::{workflow_capability, WORKFLOW_NAMESPACE};
pub use phases::{PhaseContext, PhaseOutcome};
pub use store::{SessionStore, DEFAULT_MAX_SESSIONS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PhaseName {
    Testing,
    Issues,
    Todos,
}

impl PhaseName {
    /// Fixed execution order for `workflow.execute`.
    pub const ORDER: [PhaseName; 3] = [PhaseName::Testing, PhaseName::Issues, PhaseName::Todos];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Testing => "testing",
            PhaseName::Issues => "issues",
            PhaseName::Todos => "todos",
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "testing" => Ok(PhaseName::Testing),
            "issues" => Ok(PhaseName::Issues),
            "todos" => Ok(PhaseName::Todos),
            other => Err(format!("unknown phase '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhaseResult {
    pub status: PhaseStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub output: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhaseResult {
    pub fn is_success(&self) -> bool {
        self.status == PhaseStatus::Success
    }
}

/// One workflow run for an owner/repo pair. `phases` only ever holds phases
/// that finished at least one attempt. `status` is `running` exactly while a
/// phase is executing and settles from `phases` once the session is idle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub owner: String,
    pub repo: String,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub phases: BTreeMap<PhaseName, PhaseResult>,
}

impl Session {
    pub fn new(session_id: String, owner: String, repo: String) -> Self {
        Self {
            session_id,
            owner,
            repo,
            created_at: Utc::now(),
            status: SessionStatus::Created,
            phases: BTreeMap::new(),
        }
    }

    /// Terminal status once no phase is in flight: `failed` if any recorded
    /// phase failed, `completed` otherwise.
    pub(crate) fn settle(&mut self) {
        self.status = if self.phases.values().all(PhaseResult::is_success) {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            created_at: self.created_at,
            status: self.status,
            phases: self.phases.keys().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub owner: String,
    pub repo: String,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub phases: Vec<PhaseName>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn phase_names_round_trip_through_strings() {
        for phase in PhaseName::ORDER {
            assert_eq!(phase.as_str().parse::<PhaseName>().unwrap(), phase);
        }
        assert!("deploy".parse::<PhaseName>().is_err());
    }

    #[test]
    fn new_session_serializes_with_empty_phases() {
        let session = Session::new("s1".into(), "acme".into(), "widget".into());
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["status"], "created");
        assert_eq!(value["phases"], json!({}));
    }

    #[test]
    fn settle_follows_recorded_phases() {
        let result = |status| PhaseResult {
            status,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            output: Map::new(),
            error: None,
        };
        let mut session = Session::new("s1".into(), "acme".into(), "widget".into());
        session.phases.insert(PhaseName::Issues, result(PhaseStatus::Success));
        session.settle();
        assert_eq!(session.status, SessionStatus::Completed);

        session.phases.insert(PhaseName::Testing, result(PhaseStatus::Failure));
        session.settle();
        assert_eq!(session.status, SessionStatus::Failed);

        session.phases.insert(PhaseName::Testing, result(PhaseStatus::Success));
        session.settle();
        assert_eq!(session.status, SessionStatus::Completed);
    }
}
