// Workflow session engine.
//
// Session entries are written only here. The store lock is never held across
// a backend call: a phase runs on a snapshot of the session's inputs and its
// result is written back once it has finished. While a phase runs the session
// carries an in-flight mark in the store, so it cannot be evicted, and its
// status is `running`; once idle the status settles from its phase results.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::SessionError;
use crate::router::McpRouter;

use super::phases::{self, PhaseContext};
use super::store::SessionStore;
use super::{PhaseName, PhaseResult, PhaseStatus, Session, SessionStatus, SessionSummary};

#[derive(Clone)]
pub struct WorkflowEngine {
    router: McpRouter,
    sessions: Arc<RwLock<SessionStore>>,
    parallel_tests: bool,
}

impl WorkflowEngine {
    pub fn new(router: McpRouter, max_sessions: usize) -> Self {
        Self {
            router,
            sessions: Arc::new(RwLock::new(SessionStore::new(max_sessions))),
            parallel_tests: false,
        }
    }

    /// Default for the testing fan-out when a call does not say.
    pub fn with_parallel_tests(mut self, parallel: bool) -> Self {
        self.parallel_tests = parallel;
        self
    }

    pub async fn create(
        &self,
        owner: &str,
        repo: &str,
        session_id: Option<String>,
    ) -> Result<Session, SessionError> {
        let session = new_session(owner, repo, session_id);
        self.sessions.write().await.insert(session.clone())?;
        log_created(&session);
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Result<Session, SessionError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Live sessions, newest first.
    pub async fn list(&self) -> Vec<SessionSummary> {
        self.sessions
            .read()
            .await
            .iter_newest_first()
            .map(Session::summary)
            .collect()
    }

    /// Run one phase and record its result. A phase failure is captured in
    /// the returned `PhaseResult`; only an unknown session is an error.
    pub async fn execute_phase(
        &self,
        session_id: &str,
        phase: PhaseName,
        args: &Map<String, Value>,
    ) -> Result<PhaseResult, SessionError> {
        let ctx = {
            let mut store = self.sessions.write().await;
            let session = store.acquire(session_id)?;
            session.status = SessionStatus::Running;
            let mut ctx = PhaseContext::new(&session.owner, &session.repo);
            ctx.parallel = self.parallel_tests;
            ctx.with_overrides(args)
        };

        tracing::info!(session_id = %session_id, phase = %phase, "workflow: phase started");
        let started_at = Utc::now();
        let outcome = phases::run(&self.router, phase, &ctx).await;
        let result = PhaseResult {
            status: if outcome.error.is_none() {
                PhaseStatus::Success
            } else {
                PhaseStatus::Failure
            },
            started_at,
            completed_at: Utc::now(),
            output: outcome.output,
            error: outcome.error,
        };

        match &result.error {
            None => tracing::info!(session_id = %session_id, phase = %phase, status = "success", "workflow: phase finished"),
            Some(e) => tracing::warn!(session_id = %session_id, phase = %phase, status = "failure", "workflow: phase finished: {}", e),
        }

        let mut store = self.sessions.write().await;
        let busy = store.release(session_id);
        let session = store
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        session.phases.insert(phase, result.clone());
        if !busy {
            session.settle();
        }
        Ok(result)
    }

    /// Run `testing → issues → todos` in order, continuing past failures.
    /// Reuses `session_id` when it names a live session, otherwise creates one.
    /// The session stays in flight for the whole run.
    pub async fn execute(
        &self,
        owner: &str,
        repo: &str,
        session_id: Option<String>,
        args: &Map<String, Value>,
    ) -> Result<Session, SessionError> {
        let session_id = {
            let mut store = self.sessions.write().await;
            let id = match session_id {
                Some(id) if store.contains(&id) => id,
                other => {
                    let session = new_session(owner, repo, other);
                    let id = session.session_id.clone();
                    store.insert(session)?;
                    if let Some(created) = store.get(&id) {
                        log_created(created);
                    }
                    id
                }
            };
            store.acquire(&id)?;
            id
        };

        let mut run = Ok(());
        for phase in PhaseName::ORDER {
            if let Err(e) = self.execute_phase(&session_id, phase, args).await {
                run = Err(e);
                break;
            }
        }

        let mut store = self.sessions.write().await;
        let busy = store.release(&session_id);
        run?;
        let session = store
            .get_mut(&session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
        if !busy {
            session.settle();
        }
        tracing::info!(
            session_id = %session_id,
            status = ?session.status,
            "workflow: session finished"
        );
        Ok(session.clone())
    }
}

fn new_session(owner: &str, repo: &str, session_id: Option<String>) -> Session {
    let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    Session::new(session_id, owner.to_string(), repo.to_string())
}

fn log_created(session: &Session) {
    tracing::info!(
        session_id = %session.session_id,
        owner = %session.owner,
        repo = %session.repo,
        "workflow: session created"
    );
}
