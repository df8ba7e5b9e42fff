use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use reportforge_core::{
    APPROVAL_SENTINEL, DemoGraph, EventStream, GraphConfig, GraphInput, INTERRUPT_KEY,
    ReportForgeError, ResearchGraph, RunController, RunOutcome, RunPhase, RunRequest,
};
use serde_json::{Value, json};

/// Graph double that replays scripted event streams and records every call.
struct FakeGraph {
    scripts: Mutex<VecDeque<Vec<anyhow::Result<Value>>>>,
    calls: Mutex<Vec<GraphInput>>,
}

impl FakeGraph {
    fn new(scripts: Vec<Vec<anyhow::Result<Value>>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<GraphInput> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResearchGraph for FakeGraph {
    async fn stream(&self, input: GraphInput, _config: &GraphConfig) -> anyhow::Result<EventStream> {
        self.calls.lock().unwrap().push(input);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted stream left"))?;
        Ok(Box::pin(tokio_stream::iter(script)))
    }
}

fn interrupt(plan: &str) -> anyhow::Result<Value> {
    Ok(json!({INTERRUPT_KEY: [{"value": plan}]}))
}

fn progress(sections: &[&str]) -> anyhow::Result<Value> {
    Ok(json!({"completed_sections": sections}))
}

fn report(text: &str) -> anyhow::Result<Value> {
    Ok(json!({"final_report": text}))
}

#[tokio::test]
async fn interrupt_suspends_and_issues_no_further_graph_calls() {
    let graph = FakeGraph::new(vec![vec![interrupt("Section: A\n\nPlease provide feedback.")]]);
    let controller = RunController::new(graph.clone());

    let outcome = controller
        .start_run(RunRequest::new("quantum batteries").with_run_id("run-1"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Suspended {
            run_id: "run-1".into(),
            plan: "Section: A\n\nPlease provide feedback.".into(),
        }
    );
    assert_eq!(graph.calls().len(), 1, "no graph call until feedback");

    let session = controller.snapshot("run-1").unwrap();
    assert_eq!(session.phase, RunPhase::AwaitingFeedback);
    assert_eq!(
        session.pending_interrupt.as_deref(),
        Some("Section: A\n\nPlease provide feedback.")
    );
}

#[tokio::test]
async fn blank_feedback_resumes_with_the_approval_sentinel() {
    let graph = FakeGraph::new(vec![
        vec![interrupt("plan")],
        vec![progress(&["A"]), report("# Report")],
    ]);
    let controller = RunController::new(graph.clone());

    controller
        .start_run(RunRequest::new("quantum batteries").with_run_id("run-1"))
        .await
        .unwrap();
    let outcome = controller.submit_feedback("run-1", "   ").await.unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Completed {
            run_id: "run-1".into(),
            report: "# Report".into(),
        }
    );
    assert_eq!(
        graph.calls(),
        vec![
            GraphInput::Topic("quantum batteries".into()),
            GraphInput::Resume(APPROVAL_SENTINEL.into()),
        ]
    );

    let session = controller.snapshot("run-1").unwrap();
    assert_eq!(session.phase, RunPhase::Done);
    assert_eq!(session.completed_sections, vec!["A".to_string()]);
    assert_eq!(session.final_report.as_deref(), Some("# Report"));
}

#[tokio::test]
async fn non_blank_feedback_is_forwarded_verbatim() {
    let graph = FakeGraph::new(vec![vec![interrupt("plan")], vec![report("# Report")]]);
    let controller = RunController::new(graph.clone());

    controller
        .start_run(RunRequest::new("topic").with_run_id("run-1"))
        .await
        .unwrap();
    controller
        .submit_feedback("run-1", "Add a section on risks")
        .await
        .unwrap();

    assert_eq!(
        graph.calls()[1],
        GraphInput::Resume("Add a section on risks".into())
    );
}

#[tokio::test]
async fn second_feedback_submission_is_rejected_without_a_second_resume() {
    let graph = FakeGraph::new(vec![vec![interrupt("plan")], vec![report("# Report")]]);
    let controller = RunController::new(graph.clone());

    controller
        .start_run(RunRequest::new("topic").with_run_id("run-1"))
        .await
        .unwrap();
    controller.submit_feedback("run-1", "").await.unwrap();

    let err = controller.submit_feedback("run-1", "again").await.unwrap_err();
    assert!(matches!(err, ReportForgeError::ProtocolViolation(_)));
    assert_eq!(graph.calls().len(), 2, "exactly one resume call");
}

#[tokio::test]
async fn feedback_without_a_pending_interrupt_is_rejected() {
    let graph = FakeGraph::new(vec![vec![interrupt("plan")]]);
    let controller = RunController::new(graph.clone());

    let err = controller.submit_feedback("missing", "text").await.unwrap_err();
    assert!(matches!(err, ReportForgeError::ProtocolViolation(_)));
    assert!(graph.calls().is_empty());
}

#[tokio::test]
async fn stream_failure_during_planning_fails_the_run_without_a_pending_interrupt() {
    let graph = FakeGraph::new(vec![vec![
        progress(&[]),
        Err(anyhow!("provider timed out")),
    ]]);
    let controller = RunController::new(graph.clone());

    let err = controller
        .start_run(RunRequest::new("topic").with_run_id("run-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReportForgeError::StreamConsumption { .. }));

    let session = controller.snapshot("run-1").unwrap();
    assert_eq!(session.phase, RunPhase::Failed);
    assert!(session.pending_interrupt.is_none());
    assert!(session.last_error.as_deref().unwrap().contains("provider timed out"));

    // No resume may follow a failed run.
    let err = controller.submit_feedback("run-1", "").await.unwrap_err();
    assert!(matches!(err, ReportForgeError::ProtocolViolation(_)));
    assert_eq!(graph.calls().len(), 1);
}

#[tokio::test]
async fn run_can_complete_directly_when_the_graph_never_suspends() {
    let graph = FakeGraph::new(vec![vec![
        progress(&["A"]),
        progress(&["A", "B"]),
        report("# Direct"),
    ]]);
    let controller = RunController::new(graph);

    let outcome = controller
        .start_run(RunRequest::new("topic").with_run_id("run-1"))
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));

    let session = controller.snapshot("run-1").unwrap();
    assert_eq!(session.phase, RunPhase::Done);
    assert_eq!(session.completed_sections.len(), 2);
}

#[tokio::test]
async fn second_interrupt_after_resume_is_a_protocol_violation() {
    let graph = FakeGraph::new(vec![vec![interrupt("plan")], vec![interrupt("plan again")]]);
    let controller = RunController::new(graph.clone());

    controller
        .start_run(RunRequest::new("topic").with_run_id("run-1"))
        .await
        .unwrap();
    let err = controller.submit_feedback("run-1", "").await.unwrap_err();

    assert!(matches!(err, ReportForgeError::ProtocolViolation(_)));
    let session = controller.snapshot("run-1").unwrap();
    assert_eq!(session.phase, RunPhase::Failed);
    assert!(session.pending_interrupt.is_none());
}

#[tokio::test]
async fn stream_ending_without_a_terminal_event_fails_the_run() {
    let graph = FakeGraph::new(vec![vec![progress(&["A"])]]);
    let controller = RunController::new(graph);

    let err = controller
        .start_run(RunRequest::new("topic").with_run_id("run-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReportForgeError::ProtocolViolation(_)));
    assert_eq!(
        controller.snapshot("run-1").unwrap().phase,
        RunPhase::Failed
    );
}

#[tokio::test]
async fn starting_a_new_run_under_the_same_id_discards_the_old_session() {
    let graph = FakeGraph::new(vec![
        vec![Err(anyhow!("boom"))],
        vec![interrupt("fresh plan")],
    ]);
    let controller = RunController::new(graph);

    let _ = controller
        .start_run(RunRequest::new("first").with_run_id("run-1"))
        .await;
    controller
        .start_run(RunRequest::new("second").with_run_id("run-1"))
        .await
        .unwrap();

    let session = controller.snapshot("run-1").unwrap();
    assert_eq!(session.topic, "second");
    assert_eq!(session.phase, RunPhase::AwaitingFeedback);
    assert!(session.last_error.is_none());
}

#[tokio::test]
async fn end_to_end_demo_run_reaches_done_with_a_report() {
    let graph = Arc::new(DemoGraph::with_step_delay(Duration::from_millis(1)));
    let controller = RunController::new(graph);

    let outcome = controller
        .start_run(RunRequest::new("quantum batteries"))
        .await
        .unwrap();
    let (run_id, plan) = match outcome {
        RunOutcome::Suspended { run_id, plan } => (run_id, plan),
        other => panic!("expected suspension, got {other:?}"),
    };
    assert!(plan.contains("Section: Introduction"));
    assert!(plan.contains("Please provide feedback"));

    let outcome = controller.submit_feedback(&run_id, "").await.unwrap();
    let report = match outcome {
        RunOutcome::Completed { report, .. } => report,
        other => panic!("expected completion, got {other:?}"),
    };
    assert!(report.starts_with("# quantum batteries"));

    let session = controller.snapshot(&run_id).unwrap();
    assert_eq!(session.phase, RunPhase::Done);
    assert_eq!(session.feedback.as_deref(), Some(APPROVAL_SENTINEL));
    assert!(!session.completed_sections.is_empty());
}
