//! Resume controller: drives the graph's event stream through the run state
//! machine, suspending on interrupts and issuing exactly one resume call per
//! suspend point.

use std::sync::Arc;

use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use crate::config::RunConfiguration;
use crate::error::{ReportForgeError, Result};
use crate::events::{EventDispatcher, GraphEvent};
use crate::graph::{GraphConfig, GraphInput, ResearchGraph};
use crate::session::{RunPhase, RunSession, SessionStore};

/// Sentinel forwarded to the graph's resume contract when the collected
/// feedback is blank, signalling "accept plan as-is".
pub const APPROVAL_SENTINEL: &str = "true";

/// Parameters for one fresh run.
pub struct RunRequest {
    pub topic: String,
    pub run_id: Option<String>,
    pub config: RunConfiguration,
}

impl RunRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            run_id: None,
            config: RunConfiguration::default(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_config(mut self, config: RunConfiguration) -> Self {
        self.config = config;
        self
    }
}

/// Where one invocation of the loop left the run: suspended awaiting human
/// feedback, or completed with the final report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Suspended { run_id: String, plan: String },
    Completed { run_id: String, report: String },
}

impl RunOutcome {
    pub fn run_id(&self) -> &str {
        match self {
            Self::Suspended { run_id, .. } => run_id,
            Self::Completed { run_id, .. } => run_id,
        }
    }
}

/// Orchestrates runs against one external graph handle. Cheap to clone;
/// state lives in the shared [`SessionStore`].
pub struct RunController<G: ResearchGraph> {
    graph: Arc<G>,
    store: SessionStore,
}

impl<G: ResearchGraph> Clone for RunController<G> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            store: self.store.clone(),
        }
    }
}

impl<G: ResearchGraph> RunController<G> {
    pub fn new(graph: Arc<G>) -> Self {
        Self {
            graph,
            store: SessionStore::new(),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn snapshot(&self, run_id: &str) -> Option<RunSession> {
        self.store.snapshot(run_id)
    }

    /// Start a fresh run and drain its stream until the graph suspends, the
    /// report arrives, or the stream fails. A reused run id discards the old
    /// run's session outright.
    #[instrument(skip(self, request), fields(topic = %request.topic))]
    pub async fn start_run(&self, request: RunRequest) -> Result<RunOutcome> {
        let run_id = request
            .run_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let config = GraphConfig::new(run_id.clone(), &request.config);
        self.store.insert(RunSession::new(
            run_id.clone(),
            request.topic.clone(),
            config.configurable.clone(),
        ));
        self.store.advance(&run_id, RunPhase::Planning)?;
        info!(%run_id, "run entering planning");

        let stream = match self
            .graph
            .stream(GraphInput::Topic(request.topic), &config)
            .await
        {
            Ok(stream) => stream,
            Err(cause) => return Err(self.fail_stream(&run_id, cause)),
        };

        self.drain(&run_id, EventDispatcher::new(stream), false).await
    }

    /// Supply human feedback for a suspended run and resume it.
    ///
    /// Blank feedback becomes [`APPROVAL_SENTINEL`]; non-blank text is
    /// forwarded verbatim as a modification request. At most one resume is
    /// ever issued per suspend point: a submission while the run is already
    /// `Resuming` or later is rejected, not replayed.
    #[instrument(skip(self, feedback))]
    pub async fn submit_feedback(&self, run_id: &str, feedback: &str) -> Result<RunOutcome> {
        let payload = if feedback.trim().is_empty() {
            APPROVAL_SENTINEL.to_string()
        } else {
            feedback.to_string()
        };

        let configurable = self.store.claim_feedback(run_id, &payload)?;
        let config = GraphConfig::from_parts(run_id, configurable);
        info!(%run_id, approved = payload == APPROVAL_SENTINEL, "resuming suspended run");

        let stream = match self.graph.stream(GraphInput::Resume(payload), &config).await {
            Ok(stream) => stream,
            Err(cause) => return Err(self.fail_stream(run_id, cause)),
        };

        self.drain(run_id, EventDispatcher::new(stream), true).await
    }

    async fn drain(
        &self,
        run_id: &str,
        mut dispatcher: EventDispatcher,
        resumed: bool,
    ) -> Result<RunOutcome> {
        while let Some(event) = dispatcher.next_event().await {
            match event {
                Ok(GraphEvent::Interrupt { value }) => {
                    if resumed {
                        // The graph's contract allows one feedback plateau per
                        // run; a second interrupt is a collaborator bug.
                        let err = ReportForgeError::protocol(format!(
                            "second interrupt observed after resume for run {run_id}"
                        ));
                        self.store.fail(run_id, err.to_string());
                        return Err(err);
                    }
                    self.store.suspend(run_id, value.clone())?;
                    info!(%run_id, "graph suspended awaiting feedback");
                    // The graph is suspended; any further read of this
                    // exhausted stream is a no-op or error, so stop here.
                    return Ok(RunOutcome::Suspended {
                        run_id: run_id.to_string(),
                        plan: value,
                    });
                }
                Ok(GraphEvent::Report { final_report }) => {
                    self.store.complete(run_id, final_report.clone())?;
                    info!(%run_id, "run completed with final report");
                    return Ok(RunOutcome::Completed {
                        run_id: run_id.to_string(),
                        report: final_report,
                    });
                }
                Ok(GraphEvent::Progress { completed_sections }) => {
                    debug!(%run_id, completed = completed_sections.len(), "section progress");
                    self.store.record_progress(run_id, completed_sections)?;
                }
                Ok(GraphEvent::Other { raw }) => {
                    trace!(%run_id, %raw, "ignoring unclassified event");
                }
                Err(err) => {
                    warn!(%run_id, error = %err, "stream consumption failed");
                    self.store.fail(run_id, err.to_string());
                    return Err(err);
                }
            }
        }

        // The stream ran dry without suspending or producing a report.
        let err = ReportForgeError::protocol(format!(
            "stream for run {run_id} ended without an interrupt or report"
        ));
        self.store.fail(run_id, err.to_string());
        Err(err)
    }

    fn fail_stream(&self, run_id: &str, cause: anyhow::Error) -> ReportForgeError {
        let err = ReportForgeError::stream(cause);
        self.store.fail(run_id, err.to_string());
        err
    }
}
