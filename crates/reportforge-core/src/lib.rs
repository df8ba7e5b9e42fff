//! ReportForge core: the resumable human-in-the-loop orchestration loop.
//!
//! Drives an external research graph's event stream through a single
//! suspend/resume cycle: plan, await human feedback on the proposed report
//! plan, resume exactly once, and collect the final report.

mod config;
mod controller;
mod demo;
mod error;
mod events;
mod graph;
mod models;
mod session;
mod telemetry;

pub use config::{
    DEFAULT_REPORT_STRUCTURE, PlannerProvider, RunConfiguration, SearchApi, WriterProvider,
    process_env,
};
pub use controller::{APPROVAL_SENTINEL, RunController, RunOutcome, RunRequest};
pub use demo::DemoGraph;
pub use error::{ReportForgeError, Result};
pub use events::{EventDispatcher, GraphEvent, INTERRUPT_KEY, classify};
pub use graph::{EventStream, GraphConfig, GraphInput, ResearchGraph};
pub use models::{ChatClient, ModelSpec, Provider, create_client};
pub use session::{RunPhase, RunSession, SessionStore};
pub use telemetry::{TelemetryOptions, init_telemetry};
