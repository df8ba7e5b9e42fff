use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use reportforge_core::{
    DemoGraph, RunConfiguration, RunController, RunOutcome, RunRequest, TelemetryOptions,
    init_telemetry, process_env,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "reportforge-cli",
    version,
    about = "Human-in-the-loop research report generator"
)]
struct Cli {
    /// Research topic to turn into a report.
    #[arg(long)]
    topic: String,

    /// Optional run identifier (generated when omitted).
    #[arg(long)]
    run_id: Option<String>,

    /// Search backend: perplexity or tavily.
    #[arg(long)]
    search_api: Option<String>,

    /// Planner provider: openai or groq.
    #[arg(long)]
    planner_provider: Option<String>,

    /// Planner model identifier.
    #[arg(long)]
    planner_model: Option<String>,

    /// Writer provider: anthropic or openai.
    #[arg(long)]
    writer_provider: Option<String>,

    /// Writer model identifier.
    #[arg(long)]
    writer_model: Option<String>,

    /// Search queries generated per section, at least 1.
    #[arg(long)]
    number_of_queries: Option<u32>,

    /// Reflection + search iterations per section, at least 1.
    #[arg(long)]
    max_search_depth: Option<u32>,

    /// Custom report outline handed to the planner.
    #[arg(long)]
    report_structure: Option<String>,

    /// Skip the provider credential preflight (the demo graph performs no
    /// provider calls).
    #[arg(long)]
    skip_preflight: bool,
}

impl Cli {
    fn overrides(&self) -> BTreeMap<String, String> {
        let mut overrides = BTreeMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                overrides.insert(key.to_string(), value);
            }
        };
        put("search_api", self.search_api.clone());
        put("planner_provider", self.planner_provider.clone());
        put("planner_model", self.planner_model.clone());
        put("writer_provider", self.writer_provider.clone());
        put("writer_model", self.writer_model.clone());
        put(
            "number_of_queries",
            self.number_of_queries.map(|n| n.to_string()),
        );
        put(
            "max_search_depth",
            self.max_search_depth.map(|n| n.to_string()),
        );
        put("report_structure", self.report_structure.clone());
        overrides
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry(TelemetryOptions::default())?;
    let cli = Cli::parse();

    let environment = process_env();
    let config = RunConfiguration::resolve(&cli.overrides(), &environment)?;
    if !cli.skip_preflight {
        config.validate_credentials(&environment)?;
    }

    let controller = RunController::new(Arc::new(DemoGraph::new()));
    let mut request = RunRequest::new(&cli.topic).with_config(config);
    if let Some(run_id) = cli.run_id {
        request = request.with_run_id(run_id);
    }

    match controller.start_run(request).await? {
        RunOutcome::Completed { run_id, report } => {
            info!(%run_id, "run completed without suspension");
            println!("{report}");
        }
        RunOutcome::Suspended { run_id, plan } => {
            println!("{plan}\n");
            println!("Feedback (press Enter to approve the plan as-is):");

            let mut feedback = String::new();
            BufReader::new(tokio::io::stdin())
                .read_line(&mut feedback)
                .await?;

            match controller.submit_feedback(&run_id, feedback.trim_end()).await? {
                RunOutcome::Completed { report, .. } => println!("{report}"),
                RunOutcome::Suspended { .. } => {
                    bail!("graph suspended a second time; run {run_id} abandoned")
                }
            }
        }
    }

    Ok(())
}
