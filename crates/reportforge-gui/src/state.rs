use std::collections::BTreeMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use axum::response::sse::Event;
use dashmap::DashMap;
use reportforge_core::{
    DemoGraph, ReportForgeError, RunConfiguration, RunController, RunOutcome, RunPhase,
    RunRequest, RunSession, process_env,
};
use serde::Serialize;
use tokio::sync::{Semaphore, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{self as stream, Stream, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    run_service: Arc<RunService>,
    auth_token: Option<Arc<String>>,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Self {
        let service = RunService::new(
            RunController::new(Arc::new(DemoGraph::new())),
            config.max_concurrency,
            config.require_provider_keys,
        );

        Self {
            run_service: Arc::new(service),
            auth_token: config
                .auth_token
                .as_ref()
                .map(|token| Arc::new(token.clone())),
        }
    }

    pub fn run_service(&self) -> Arc<RunService> {
        self.run_service.clone()
    }

    pub fn auth_token(&self) -> Option<Arc<String>> {
        self.auth_token.clone()
    }
}

/// Drives runs on background tasks and fans their lifecycle events out to
/// SSE subscribers. Session state itself lives in the controller's store.
pub struct RunService {
    controller: RunController<DemoGraph>,
    semaphore: Arc<Semaphore>,
    streams: Arc<DashMap<String, broadcast::Sender<RunEvent>>>,
    require_provider_keys: bool,
    max_concurrency: usize,
}

impl RunService {
    pub fn new(
        controller: RunController<DemoGraph>,
        max_concurrency: usize,
        require_provider_keys: bool,
    ) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            controller,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            streams: Arc::new(DashMap::new()),
            require_provider_keys,
            max_concurrency,
        }
    }

    /// Resolve configuration, run the credential preflight, and kick off the
    /// run in the background. Returns the run id immediately; progress flows
    /// through [`RunService::event_stream`] and [`RunService::status`].
    pub async fn start_run(&self, submission: RunSubmission) -> Result<String, ReportForgeError> {
        let environment = process_env();
        let config = RunConfiguration::resolve(&submission.overrides, &environment)?;
        if self.require_provider_keys {
            config.validate_credentials(&environment)?;
        }

        let run_id = submission
            .run_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let sender = self.subscribe_sender(&run_id);
        let _ = sender.send(RunEvent::started());

        let controller = self.controller.clone();
        let streams = self.streams.clone();
        let semaphore = self.semaphore.clone();
        let request = RunRequest::new(submission.topic)
            .with_run_id(run_id.clone())
            .with_config(config);
        let task_run_id = run_id.clone();

        tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    let _ = sender.send(RunEvent::error(err.to_string()));
                    streams.remove(&task_run_id);
                    return;
                }
            };

            let result = controller.start_run(request).await;
            drop(permit);

            match result {
                Ok(RunOutcome::Suspended { plan, .. }) => {
                    info!(run_id = %task_run_id, "run awaiting feedback");
                    let _ = sender.send(RunEvent::awaiting_feedback(plan));
                }
                Ok(RunOutcome::Completed { report, .. }) => {
                    info!(run_id = %task_run_id, "run completed");
                    let _ = sender.send(RunEvent::completed(report));
                    streams.remove(&task_run_id);
                }
                Err(err) => {
                    error!(run_id = %task_run_id, error = %err, "run failed");
                    let _ = sender.send(RunEvent::error(err.to_string()));
                    streams.remove(&task_run_id);
                }
            }
        });

        Ok(run_id)
    }

    /// Accept feedback for a suspended run and resume it in the background.
    /// Rejected up front when the run is not awaiting feedback, so a second
    /// submission gets a deterministic conflict instead of a replay.
    pub async fn submit_feedback(
        &self,
        run_id: &str,
        feedback: String,
    ) -> Result<(), ReportForgeError> {
        let session = self.controller.snapshot(run_id).ok_or_else(|| {
            ReportForgeError::ProtocolViolation(format!("unknown run id: {run_id}"))
        })?;
        if session.phase != RunPhase::AwaitingFeedback {
            return Err(ReportForgeError::ProtocolViolation(format!(
                "feedback submitted while run {run_id} was {:?}",
                session.phase
            )));
        }

        let sender = self.subscribe_sender(run_id);
        let controller = self.controller.clone();
        let streams = self.streams.clone();
        let semaphore = self.semaphore.clone();
        let task_run_id = run_id.to_string();

        tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    let _ = sender.send(RunEvent::error(err.to_string()));
                    streams.remove(&task_run_id);
                    return;
                }
            };

            let result = controller.submit_feedback(&task_run_id, &feedback).await;
            drop(permit);

            match result {
                Ok(RunOutcome::Completed { report, .. }) => {
                    info!(run_id = %task_run_id, "resumed run completed");
                    let _ = sender.send(RunEvent::completed(report));
                }
                Ok(RunOutcome::Suspended { .. }) => {
                    // The controller rejects nested interrupt cycles, so this
                    // arm only fires if that contract changes underneath us.
                    let _ = sender.send(RunEvent::error(
                        "run suspended a second time".to_string(),
                    ));
                }
                Err(err) => {
                    error!(run_id = %task_run_id, error = %err, "resumed run failed");
                    let _ = sender.send(RunEvent::error(err.to_string()));
                }
            }
            streams.remove(&task_run_id);
        });

        Ok(())
    }

    pub fn status(&self, run_id: &str) -> Option<RunStatus> {
        self.controller.snapshot(run_id).map(RunStatus::from)
    }

    pub fn list(&self) -> Vec<RunStatus> {
        self.controller
            .store()
            .list()
            .into_iter()
            .map(RunStatus::from)
            .collect()
    }

    pub fn metrics(&self) -> ServiceMetrics {
        let sessions = self.controller.store().list();
        ServiceMetrics {
            max_concurrency: self.max_concurrency,
            available_permits: self.semaphore.available_permits(),
            active_runs: sessions
                .iter()
                .filter(|session| {
                    matches!(session.phase, RunPhase::Planning | RunPhase::Resuming)
                })
                .count(),
            awaiting_feedback: sessions
                .iter()
                .filter(|session| session.phase == RunPhase::AwaitingFeedback)
                .count(),
            total_runs: sessions.len(),
        }
    }

    /// SSE stream for one run: replays the current plateau (plan, report, or
    /// error) and follows live events while the run is in flight.
    pub fn event_stream(&self, run_id: &str) -> Option<SseStream> {
        let snapshot = self.controller.snapshot(run_id);
        let live = self.streams.get(run_id).map(|sender| sender.subscribe());
        if snapshot.is_none() && live.is_none() {
            return None;
        }

        let replay = snapshot.and_then(|session| match session.phase {
            RunPhase::Done => Some(RunEvent::completed(
                session.final_report.unwrap_or_default(),
            )),
            RunPhase::Failed => Some(RunEvent::error(session.last_error.unwrap_or_default())),
            RunPhase::AwaitingFeedback => Some(RunEvent::awaiting_feedback(
                session.pending_interrupt.unwrap_or_default(),
            )),
            _ => None,
        });
        let head = stream::iter(
            replay
                .into_iter()
                .map(|event| Result::<Event, Infallible>::Ok(event.into_sse_event()))
                .collect::<Vec<_>>(),
        );

        match live {
            Some(receiver) => {
                let tail = BroadcastStream::new(receiver).filter_map(|event| match event {
                    Ok(event) => Some(Result::<Event, Infallible>::Ok(event.into_sse_event())),
                    Err(err) => {
                        warn!(error = %err, "run event stream lagged");
                        None
                    }
                });
                Some(Box::pin(head.chain(tail)))
            }
            None => Some(Box::pin(head)),
        }
    }

    fn subscribe_sender(&self, run_id: &str) -> broadcast::Sender<RunEvent> {
        self.streams
            .entry(run_id.to_string())
            .or_insert_with(|| broadcast::channel(32).0)
            .clone()
    }
}

pub type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

/// Parameters accepted when starting a run over HTTP.
#[derive(Debug, Clone)]
pub struct RunSubmission {
    pub topic: String,
    pub run_id: Option<String>,
    pub overrides: BTreeMap<String, String>,
}

impl RunSubmission {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            run_id: None,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: Option<String>) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_overrides(mut self, overrides: BTreeMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Read-only view of one run exposed to HTTP clients.
#[derive(Clone, Debug, Serialize)]
pub struct RunStatus {
    pub run_id: String,
    pub topic: String,
    pub phase: RunPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    pub completed_sections: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<RunSession> for RunStatus {
    fn from(session: RunSession) -> Self {
        Self {
            run_id: session.run_id,
            topic: session.topic,
            phase: session.phase,
            plan: session.pending_interrupt,
            completed_sections: session.completed_sections,
            report: session.final_report,
            error: session.last_error,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ServiceMetrics {
    pub max_concurrency: usize,
    pub available_permits: usize,
    pub active_runs: usize,
    pub awaiting_feedback: usize,
    pub total_runs: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunEvent {
    pub kind: RunEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
}

impl RunEvent {
    pub fn started() -> Self {
        Self {
            kind: RunEventKind::Started,
            message: Some("run started".into()),
            plan: None,
            report: None,
        }
    }

    pub fn awaiting_feedback(plan: impl Into<String>) -> Self {
        Self {
            kind: RunEventKind::AwaitingFeedback,
            message: Some("report plan ready for review".into()),
            plan: Some(plan.into()),
            report: None,
        }
    }

    pub fn completed(report: impl Into<String>) -> Self {
        Self {
            kind: RunEventKind::Completed,
            message: Some("final report ready".into()),
            plan: None,
            report: Some(report.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: RunEventKind::Error,
            message: Some(message.into()),
            plan: None,
            report: None,
        }
    }

    pub fn into_sse_event(self) -> Event {
        let data = serde_json::to_string(&self).unwrap_or_else(|_| {
            serde_json::json!({
                "kind": RunEventKind::Error,
                "message": "failed to serialize run event",
            })
            .to_string()
        });

        Event::default().event(self.kind.as_str()).data(data)
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    Started,
    AwaitingFeedback,
    Completed,
    Error,
}

impl RunEventKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::AwaitingFeedback => "awaiting_feedback",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}
