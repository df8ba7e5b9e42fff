//! Event classification and dispatch over the graph's raw stream.
//!
//! Classification is a pure translation; the dispatcher preserves arrival
//! order, pulls one event at a time, and terminates the sequence on the first
//! underlying stream failure without retrying.

use serde_json::Value;
use tokio_stream::StreamExt;

use crate::error::{ReportForgeError, Result};
use crate::graph::EventStream;

/// Marker key the graph attaches to suspend-for-input events.
pub const INTERRUPT_KEY: &str = "__interrupt__";

/// UI-relevant view of one raw graph event.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// The graph suspended itself awaiting human input; `value` holds the
    /// proposed plan text.
    Interrupt { value: String },
    /// Sections completed so far by the research/write stages.
    Progress { completed_sections: Vec<String> },
    /// Terminal success: the assembled report.
    Report { final_report: String },
    /// Anything else; ignored by the orchestration loop.
    Other { raw: Value },
}

/// Classify one raw event. First match wins: interrupt marker, then
/// `final_report`, then `completed_sections`, then opaque passthrough.
pub fn classify(raw: Value) -> GraphEvent {
    if let Some(first) = raw
        .get(INTERRUPT_KEY)
        .and_then(Value::as_array)
        .and_then(|payloads| payloads.first())
    {
        let value = first
            .get("value")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| first.to_string());
        return GraphEvent::Interrupt { value };
    }

    if let Some(final_report) = raw.get("final_report").and_then(Value::as_str) {
        return GraphEvent::Report {
            final_report: final_report.to_string(),
        };
    }

    if let Some(sections) = raw.get("completed_sections").and_then(Value::as_array) {
        let completed_sections = sections
            .iter()
            .map(|section| {
                section
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| section.to_string())
            })
            .collect();
        return GraphEvent::Progress { completed_sections };
    }

    GraphEvent::Other { raw }
}

/// Pull-based dispatcher over one graph invocation's stream.
pub struct EventDispatcher {
    inner: EventStream,
    finished: bool,
}

impl EventDispatcher {
    pub fn new(stream: EventStream) -> Self {
        Self {
            inner: stream,
            finished: false,
        }
    }

    /// Next classified event, `None` once the stream is exhausted. A stream
    /// error yields one `StreamConsumption` item and ends the sequence;
    /// resuming an already-failed stream is unsafe, so retries belong to the
    /// caller, if anywhere.
    pub async fn next_event(&mut self) -> Option<Result<GraphEvent>> {
        if self.finished {
            return None;
        }

        match self.inner.next().await {
            Some(Ok(raw)) => Some(Ok(classify(raw))),
            Some(Err(cause)) => {
                self.finished = true;
                Some(Err(ReportForgeError::stream(cause)))
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;

    fn stream_of(items: Vec<anyhow::Result<Value>>) -> EventStream {
        Box::pin(tokio_stream::iter(items))
    }

    #[test]
    fn interrupt_takes_priority_and_reads_first_payload_value() {
        let event = classify(json!({
            INTERRUPT_KEY: [{"value": "Section: A"}, {"value": "ignored"}],
            "final_report": "should not win",
        }));
        assert_eq!(
            event,
            GraphEvent::Interrupt {
                value: "Section: A".into()
            }
        );
    }

    #[test]
    fn report_beats_progress() {
        let event = classify(json!({
            "final_report": "# Report",
            "completed_sections": ["A"],
        }));
        assert_eq!(
            event,
            GraphEvent::Report {
                final_report: "# Report".into()
            }
        );
    }

    #[test]
    fn unrecognized_events_pass_through_as_other() {
        let raw = json!({"generate_queries": {"queries": ["q1"]}});
        assert_eq!(classify(raw.clone()), GraphEvent::Other { raw });
    }

    #[test]
    fn empty_interrupt_marker_falls_through() {
        let event = classify(json!({INTERRUPT_KEY: [], "completed_sections": ["A"]}));
        assert_eq!(
            event,
            GraphEvent::Progress {
                completed_sections: vec!["A".into()]
            }
        );
    }

    #[tokio::test]
    async fn dispatcher_preserves_arrival_order() {
        let plan = "Section: A\nDescription: overview\n\nPlease provide feedback on the plan.";
        let mut dispatcher = EventDispatcher::new(stream_of(vec![
            Ok(json!({INTERRUPT_KEY: [{"value": plan}]})),
            Ok(json!({"completed_sections": ["A"]})),
            Ok(json!({"final_report": "# Report"})),
        ]));

        assert_eq!(
            dispatcher.next_event().await.unwrap().unwrap(),
            GraphEvent::Interrupt { value: plan.into() }
        );
        assert_eq!(
            dispatcher.next_event().await.unwrap().unwrap(),
            GraphEvent::Progress {
                completed_sections: vec!["A".into()]
            }
        );
        assert_eq!(
            dispatcher.next_event().await.unwrap().unwrap(),
            GraphEvent::Report {
                final_report: "# Report".into()
            }
        );
        assert!(dispatcher.next_event().await.is_none());
    }

    #[tokio::test]
    async fn stream_error_terminates_the_sequence() {
        let mut dispatcher = EventDispatcher::new(stream_of(vec![
            Ok(json!({"completed_sections": []})),
            Err(anyhow!("connection reset")),
            Ok(json!({"final_report": "never seen"})),
        ]));

        assert!(dispatcher.next_event().await.unwrap().is_ok());
        let err = dispatcher.next_event().await.unwrap().unwrap_err();
        assert!(matches!(err, ReportForgeError::StreamConsumption { .. }));
        assert!(err.to_string().contains("connection reset"));
        assert!(dispatcher.next_event().await.is_none());
    }
}
