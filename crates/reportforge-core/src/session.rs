//! Process-local session state, keyed by run id.
//!
//! Each run owns one [`RunSession`]; all mutation goes through phase-gated
//! store methods so the invariants hold under the single-writer discipline
//! (one active stream consumer per run id).

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::error::{ReportForgeError, Result};

/// Phase of a single user-initiated run. Transitions are monotonic within
/// one run; terminal phases only give way to a brand-new session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Planning,
    AwaitingFeedback,
    Resuming,
    Reporting,
    Done,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Legal forward transitions. `Failed` is reachable from any
    /// non-terminal phase.
    pub fn allows(self, next: Self) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, Planning)
                | (Planning, AwaitingFeedback)
                | (Planning, Reporting)
                | (AwaitingFeedback, Resuming)
                | (Resuming, Reporting)
                | (Reporting, Done)
        ) || (next == Failed && !self.is_terminal())
    }
}

/// Mutable record for one run.
///
/// Invariant: `pending_interrupt` is set iff `phase == AwaitingFeedback`.
/// The stored `graph_config` is the minimal metadata needed to reconstruct
/// the resume call (the run id doubles as the graph's thread id).
#[derive(Debug, Clone, Serialize)]
pub struct RunSession {
    pub run_id: String,
    pub topic: String,
    pub phase: RunPhase,
    pub pending_interrupt: Option<String>,
    pub feedback: Option<String>,
    pub last_error: Option<String>,
    pub completed_sections: Vec<String>,
    pub final_report: Option<String>,
    pub graph_config: BTreeMap<String, String>,
}

impl RunSession {
    pub fn new(
        run_id: impl Into<String>,
        topic: impl Into<String>,
        graph_config: BTreeMap<String, String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            topic: topic.into(),
            phase: RunPhase::Idle,
            pending_interrupt: None,
            feedback: None,
            last_error: None,
            completed_sections: Vec::new(),
            final_report: None,
            graph_config,
        }
    }
}

/// Concurrent map of live sessions. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, RunSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh session, replacing any previous run under the same
    /// id. In-flight data for the old run is discarded, not merged.
    pub fn insert(&self, session: RunSession) {
        self.sessions.insert(session.run_id.clone(), session);
    }

    pub fn snapshot(&self, run_id: &str) -> Option<RunSession> {
        self.sessions.get(run_id).map(|entry| entry.clone())
    }

    pub fn list(&self) -> Vec<RunSession> {
        self.sessions.iter().map(|entry| entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Advance the phase, rejecting transitions the state machine forbids.
    pub fn advance(&self, run_id: &str, next: RunPhase) -> Result<()> {
        let mut entry = self.entry(run_id)?;
        if !entry.phase.allows(next) {
            return Err(ReportForgeError::protocol(format!(
                "illegal phase transition {:?} -> {next:?} for run {run_id}",
                entry.phase
            )));
        }
        entry.phase = next;
        Ok(())
    }

    /// Record an interrupt payload and enter `AwaitingFeedback`.
    pub fn suspend(&self, run_id: &str, payload: String) -> Result<()> {
        let mut entry = self.entry(run_id)?;
        if !entry.phase.allows(RunPhase::AwaitingFeedback) {
            return Err(ReportForgeError::protocol(format!(
                "interrupt observed while run {run_id} was {:?}",
                entry.phase
            )));
        }
        entry.phase = RunPhase::AwaitingFeedback;
        entry.pending_interrupt = Some(payload);
        Ok(())
    }

    /// Consume the pending interrupt exactly once, storing the feedback and
    /// entering `Resuming`. Holding the map entry for the whole check-and-set
    /// is what makes a second submission lose, not replay.
    pub fn claim_feedback(&self, run_id: &str, feedback: &str) -> Result<BTreeMap<String, String>> {
        let mut entry = self.entry(run_id)?;
        if entry.phase != RunPhase::AwaitingFeedback {
            return Err(ReportForgeError::protocol(format!(
                "feedback submitted while run {run_id} was {:?}",
                entry.phase
            )));
        }
        entry.pending_interrupt = None;
        entry.feedback = Some(feedback.to_string());
        entry.phase = RunPhase::Resuming;
        Ok(entry.graph_config.clone())
    }

    /// Latest cumulative section progress.
    pub fn record_progress(&self, run_id: &str, completed_sections: Vec<String>) -> Result<()> {
        let mut entry = self.entry(run_id)?;
        entry.completed_sections = completed_sections;
        Ok(())
    }

    /// Terminal success: store the report and walk `Reporting` into `Done`.
    pub fn complete(&self, run_id: &str, final_report: String) -> Result<()> {
        let mut entry = self.entry(run_id)?;
        if !entry.phase.allows(RunPhase::Reporting) {
            return Err(ReportForgeError::protocol(format!(
                "report observed while run {run_id} was {:?}",
                entry.phase
            )));
        }
        entry.phase = RunPhase::Done;
        entry.final_report = Some(final_report);
        Ok(())
    }

    /// Terminal failure: record the error and clear any pending interrupt so
    /// the `AwaitingFeedback` invariant keeps holding.
    pub fn fail(&self, run_id: &str, message: impl Into<String>) {
        if let Some(mut entry) = self.sessions.get_mut(run_id) {
            entry.phase = RunPhase::Failed;
            entry.last_error = Some(message.into());
            entry.pending_interrupt = None;
        }
    }

    fn entry(&self, run_id: &str) -> Result<dashmap::mapref::one::RefMut<'_, String, RunSession>> {
        self.sessions
            .get_mut(run_id)
            .ok_or_else(|| ReportForgeError::protocol(format!("unknown run id: {run_id}")))
    }
}
