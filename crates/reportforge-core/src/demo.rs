//! In-process demo collaborator.
//!
//! Emits the same raw event shapes as the real research graph — a plan
//! interrupt, cumulative section progress, then a final report — with
//! simulated latencies, so the whole suspend/resume loop can be exercised
//! offline. Thread state is keyed by the correlation id carried in the
//! graph config.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;

use crate::controller::APPROVAL_SENTINEL;
use crate::events::INTERRUPT_KEY;
use crate::graph::{EventStream, GraphConfig, GraphInput, ResearchGraph};

const FEEDBACK_PROMPT: &str =
    "Please provide feedback on the report plan above, or approve it as-is.";

#[derive(Debug, Clone)]
struct DemoThread {
    topic: String,
    sections: Vec<String>,
}

/// Scripted stand-in for the external graph.
pub struct DemoGraph {
    threads: DashMap<String, DemoThread>,
    step_delay: Duration,
}

impl DemoGraph {
    pub fn new() -> Self {
        Self::with_step_delay(Duration::from_millis(25))
    }

    pub fn with_step_delay(step_delay: Duration) -> Self {
        Self {
            threads: DashMap::new(),
            step_delay,
        }
    }
}

impl Default for DemoGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResearchGraph for DemoGraph {
    async fn stream(&self, input: GraphInput, config: &GraphConfig) -> anyhow::Result<EventStream> {
        match input {
            GraphInput::Topic(topic) => {
                let sections = plan_sections(&topic);
                self.threads.insert(
                    config.thread_id.clone(),
                    DemoThread {
                        topic: topic.clone(),
                        sections: sections.clone(),
                    },
                );

                let plan = render_plan(&topic, &sections);
                let delay = self.step_delay;
                let (tx, rx) = mpsc::channel(8);
                tokio::spawn(async move {
                    let _ = tx
                        .send(Ok(json!({
                            "generate_report_plan": {"topic": topic, "sections": sections.len()}
                        })))
                        .await;
                    sleep(delay).await;
                    let _ = tx.send(Ok(json!({INTERRUPT_KEY: [{"value": plan}]}))).await;
                });
                Ok(Box::pin(ReceiverStream::new(rx)))
            }
            GraphInput::Resume(feedback) => {
                let (topic, sections) = {
                    let mut thread = self
                        .threads
                        .get_mut(&config.thread_id)
                        .ok_or_else(|| {
                            anyhow::anyhow!("unknown thread id: {}", config.thread_id)
                        })?;
                    if feedback != APPROVAL_SENTINEL {
                        thread.sections.push(section_from_feedback(&feedback));
                    }
                    (thread.topic.clone(), thread.sections.clone())
                };

                let delay = self.step_delay;
                let (tx, rx) = mpsc::channel(8);
                tokio::spawn(async move {
                    let mut completed: Vec<String> = Vec::new();
                    for section in &sections {
                        sleep(delay).await;
                        completed.push(section.clone());
                        let _ = tx
                            .send(Ok(json!({"completed_sections": completed.clone()})))
                            .await;
                    }
                    sleep(delay).await;
                    let _ = tx
                        .send(Ok(json!({"final_report": render_report(&topic, &sections)})))
                        .await;
                });
                Ok(Box::pin(ReceiverStream::new(rx)))
            }
        }
    }
}

fn plan_sections(topic: &str) -> Vec<String> {
    vec![
        "Introduction".to_string(),
        format!("Current State of {topic}"),
        "Technical Analysis".to_string(),
        "Future Outlook".to_string(),
        "Conclusion".to_string(),
    ]
}

fn render_plan(topic: &str, sections: &[String]) -> String {
    let body = sections
        .iter()
        .map(|section| {
            format!(
                "Section: {section}\nDescription: Research-backed coverage of {section} \
                 as it relates to {topic}."
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("{body}\n\n{FEEDBACK_PROMPT}")
}

fn render_report(topic: &str, sections: &[String]) -> String {
    let mut report = format!("# {topic}\n");
    for section in sections {
        report.push_str(&format!(
            "\n## {section}\n\nKey findings on {section}: demand signals, primary drivers, \
             and open risks identified for {topic}.\n"
        ));
    }
    report
}

/// Derive a section title from a modification request, capped to keep the
/// outline readable.
fn section_from_feedback(feedback: &str) -> String {
    let trimmed = feedback.trim().trim_end_matches('.');
    let mut title: String = trimmed.chars().take(60).collect();
    if let Some(first) = title.get(..1).map(str::to_uppercase) {
        title.replace_range(..1, &first);
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{GraphEvent, classify};
    use tokio_stream::StreamExt;

    fn config() -> GraphConfig {
        GraphConfig::from_parts("thread-1", Default::default())
    }

    async fn collect(stream: EventStream) -> Vec<GraphEvent> {
        let mut stream = stream;
        let mut events = Vec::new();
        while let Some(item) = stream.next().await {
            events.push(classify(item.unwrap()));
        }
        events
    }

    #[tokio::test]
    async fn topic_stream_ends_with_a_plan_interrupt() {
        let graph = DemoGraph::with_step_delay(Duration::from_millis(1));
        let stream = graph
            .stream(GraphInput::Topic("quantum batteries".into()), &config())
            .await
            .unwrap();
        let events = collect(stream).await;

        match events.last().unwrap() {
            GraphEvent::Interrupt { value } => {
                assert!(value.contains("Section: Introduction"));
                assert!(value.contains("Please provide feedback"));
            }
            other => panic!("expected interrupt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn modification_feedback_adds_a_section() {
        let graph = DemoGraph::with_step_delay(Duration::from_millis(1));
        let config = config();
        let _ = graph
            .stream(GraphInput::Topic("quantum batteries".into()), &config)
            .await
            .unwrap();

        let stream = graph
            .stream(
                GraphInput::Resume("add a section on risks".into()),
                &config,
            )
            .await
            .unwrap();
        let events = collect(stream).await;

        match events.last().unwrap() {
            GraphEvent::Report { final_report } => {
                assert!(final_report.contains("## Add a section on risks"));
            }
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resume_without_prior_topic_is_an_error() {
        let graph = DemoGraph::with_step_delay(Duration::from_millis(1));
        let err = graph
            .stream(GraphInput::Resume(APPROVAL_SENTINEL.into()), &config())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("unknown thread id"));
    }
}
