//! Run configuration: the typed settings bag consumed by the external graph.
//!
//! Resolution merges caller overrides with environment values under a fixed
//! precedence (override > environment > default) and is fully deterministic
//! given the two mappings.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{ReportForgeError, Result};

/// Default outline handed to the planner when the caller supplies none.
pub const DEFAULT_REPORT_STRUCTURE: &str = "\
Use this structure to create a comprehensive report on the user-provided topic:

1. Executive Summary
   - Key findings and insights
   - Scope and objectives

2. Introduction
   - Background and context
   - Problem statement or research question
   - Research methodology details

3. Main Research Findings
   - Historical context and evolution
   - Current state analysis
   - Technical/detailed analysis
   - Challenges and opportunities

4. Comparative Analysis
   - Industry benchmarks
   - Competitive landscape
   - Best practices and case studies

5. Impact Assessment
   - Economic, social, and environmental implications
   - Ethical considerations

6. Future Outlook
   - Predicted trends
   - Strategic recommendations

7. Conclusion
   - Summary of key findings
   - Research limitations
   - Recommendations for further research";

const DEFAULT_NUMBER_OF_QUERIES: u32 = 2;
const DEFAULT_MAX_SEARCH_DEPTH: u32 = 3;
const DEFAULT_PLANNER_MODEL: &str = "o3-mini";
const DEFAULT_WRITER_MODEL: &str = "gpt-4o";

/// Search backend the graph queries during section research.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchApi {
    Perplexity,
    Tavily,
}

impl SearchApi {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Perplexity => "perplexity",
            Self::Tavily => "tavily",
        }
    }

    fn parse(field: &'static str, value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "perplexity" => Ok(Self::Perplexity),
            "tavily" => Ok(Self::Tavily),
            _ => Err(ReportForgeError::invalid_value(field, value)),
        }
    }
}

/// Provider serving the planning model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlannerProvider {
    Openai,
    Groq,
}

impl PlannerProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Groq => "groq",
        }
    }

    fn parse(field: &'static str, value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::Openai),
            "groq" => Ok(Self::Groq),
            _ => Err(ReportForgeError::invalid_value(field, value)),
        }
    }
}

/// Provider serving the section-writing model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterProvider {
    Anthropic,
    Openai,
}

impl WriterProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
        }
    }

    fn parse(field: &'static str, value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::Openai),
            _ => Err(ReportForgeError::invalid_value(field, value)),
        }
    }
}

/// Immutable, fully-resolved configuration for one run.
///
/// Constructed once per run and consumed by the external graph as an opaque
/// flat mapping (see [`RunConfiguration::to_graph_config`]).
#[derive(Debug, Clone, Serialize)]
pub struct RunConfiguration {
    pub report_structure: String,
    pub number_of_queries: u32,
    pub max_search_depth: u32,
    pub planner_provider: PlannerProvider,
    pub planner_model: String,
    pub writer_provider: WriterProvider,
    pub writer_model: String,
    pub search_api: SearchApi,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            report_structure: DEFAULT_REPORT_STRUCTURE.to_string(),
            number_of_queries: DEFAULT_NUMBER_OF_QUERIES,
            max_search_depth: DEFAULT_MAX_SEARCH_DEPTH,
            planner_provider: PlannerProvider::Openai,
            planner_model: DEFAULT_PLANNER_MODEL.to_string(),
            writer_provider: WriterProvider::Openai,
            writer_model: DEFAULT_WRITER_MODEL.to_string(),
            search_api: SearchApi::Tavily,
        }
    }
}

impl RunConfiguration {
    /// Resolve every field under the precedence: explicit override, then the
    /// environment variable named by the upper-cased field name, then the
    /// documented default. Blank values count as absent.
    pub fn resolve(
        overrides: &BTreeMap<String, String>,
        environment: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let defaults = Self::default();

        let text = |field: &'static str, fallback: &str| -> String {
            lookup(field, overrides, environment)
                .map(str::to_string)
                .unwrap_or_else(|| fallback.to_string())
        };

        let positive_int = |field: &'static str, fallback: u32| -> Result<u32> {
            match lookup(field, overrides, environment) {
                Some(raw) => raw
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|value| *value >= 1)
                    .ok_or_else(|| ReportForgeError::invalid_value(field, raw)),
                None => Ok(fallback),
            }
        };

        let planner_provider = match lookup("planner_provider", overrides, environment) {
            Some(raw) => PlannerProvider::parse("planner_provider", raw)?,
            None => defaults.planner_provider,
        };
        let writer_provider = match lookup("writer_provider", overrides, environment) {
            Some(raw) => WriterProvider::parse("writer_provider", raw)?,
            None => defaults.writer_provider,
        };
        let search_api = match lookup("search_api", overrides, environment) {
            Some(raw) => SearchApi::parse("search_api", raw)?,
            None => defaults.search_api,
        };

        Ok(Self {
            report_structure: text("report_structure", &defaults.report_structure),
            number_of_queries: positive_int("number_of_queries", defaults.number_of_queries)?,
            max_search_depth: positive_int("max_search_depth", defaults.max_search_depth)?,
            planner_provider,
            planner_model: text("planner_model", &defaults.planner_model),
            writer_provider,
            writer_model: text("writer_model", &defaults.writer_model),
            search_api,
        })
    }

    /// Flat key/value mapping handed to the graph alongside the thread id.
    pub fn to_graph_config(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("report_structure".into(), self.report_structure.clone()),
            (
                "number_of_queries".into(),
                self.number_of_queries.to_string(),
            ),
            ("max_search_depth".into(), self.max_search_depth.to_string()),
            (
                "planner_provider".into(),
                self.planner_provider.as_str().into(),
            ),
            ("planner_model".into(), self.planner_model.clone()),
            (
                "writer_provider".into(),
                self.writer_provider.as_str().into(),
            ),
            ("writer_model".into(), self.writer_model.clone()),
            ("search_api".into(), self.search_api.as_str().into()),
        ])
    }

    /// Credential variables the external collaborators will read for this
    /// configuration.
    pub fn required_credentials(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        keys.push(match self.planner_provider {
            PlannerProvider::Openai => "OPENAI_API_KEY",
            PlannerProvider::Groq => "GROQ_API_KEY",
        });
        keys.push(match self.writer_provider {
            WriterProvider::Openai => "OPENAI_API_KEY",
            WriterProvider::Anthropic => "ANTHROPIC_API_KEY",
        });
        keys.push(match self.search_api {
            SearchApi::Tavily => "TAVILY_API_KEY",
            SearchApi::Perplexity => "PERPLEXITY_API_KEY",
        });
        keys.dedup();
        keys
    }

    /// Presence check for every credential the selected configuration needs.
    ///
    /// Runs before PLANNING starts; the values themselves are consumed by the
    /// external collaborators and are not validated here.
    pub fn validate_credentials(&self, environment: &BTreeMap<String, String>) -> Result<()> {
        for key in self.required_credentials() {
            let present = environment
                .get(key)
                .map(|value| !value.trim().is_empty())
                .unwrap_or(false);
            if !present {
                return Err(ReportForgeError::MissingSecret(key.to_string()));
            }
        }
        Ok(())
    }
}

fn lookup<'a>(
    field: &str,
    overrides: &'a BTreeMap<String, String>,
    environment: &'a BTreeMap<String, String>,
) -> Option<&'a str> {
    let non_blank = |value: &&'a String| !value.trim().is_empty();
    overrides
        .get(field)
        .filter(non_blank)
        .or_else(|| environment.get(&field.to_ascii_uppercase()).filter(non_blank))
        .map(String::as_str)
}

/// Snapshot the process environment into the mapping shape `resolve` expects.
pub fn process_env() -> BTreeMap<String, String> {
    std::env::vars().collect()
}
