//! HTTP surface for the ReportForge run/feedback loop: start a run, review
//! the suspended plan, submit feedback, and stream lifecycle events.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
