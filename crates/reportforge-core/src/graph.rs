//! Contract presented by the external research graph.
//!
//! The graph's internal planning/search/reflection algorithm is out of scope;
//! this seam only fixes how it is invoked and what its event stream looks
//! like. Streams are non-restartable and finite once the run halts or
//! completes.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::config::RunConfiguration;

/// Raw events as produced by the graph: JSON mappings that may carry an
/// `__interrupt__` marker, a `final_report` field, a `completed_sections`
/// sequence, or arbitrary other keys.
pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<Value>> + Send>>;

/// Initial input or resume signal for one invocation of the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphInput {
    /// Fresh run fed with the research topic.
    Topic(String),
    /// Single-shot continuation of a suspended run, carrying human feedback.
    Resume(String),
}

/// Correlation key plus the flat run configuration, passed with every call.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub thread_id: String,
    pub configurable: BTreeMap<String, String>,
}

impl GraphConfig {
    pub fn new(thread_id: impl Into<String>, configuration: &RunConfiguration) -> Self {
        Self {
            thread_id: thread_id.into(),
            configurable: configuration.to_graph_config(),
        }
    }

    pub fn from_parts(thread_id: impl Into<String>, configurable: BTreeMap<String, String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            configurable,
        }
    }
}

/// The external collaborator driving plan, review, research, and write
/// stages. Each `stream` call opens one asynchronous event sequence; a
/// suspended graph must only ever be re-entered through a `Resume` input.
#[async_trait]
pub trait ResearchGraph: Send + Sync {
    async fn stream(&self, input: GraphInput, config: &GraphConfig) -> anyhow::Result<EventStream>;
}
