//! Model factory: maps a (provider, model, temperature) triple to a
//! ready-to-call chat-completion client, applying per-provider capability
//! constraints. No network access happens here.

use std::collections::HashSet;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::ReportForgeError;

/// Model identifiers known to reject a temperature parameter.
///
/// Some providers error on the parameter, others silently ignore it; keeping
/// the allow-list in one place avoids per-call special-casing.
static NO_TEMPERATURE_MODELS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from(["gpt-4o", "o3-mini", "mixtral-8x7b", "llama2-70b"]));

fn rejects_temperature(model: &str) -> bool {
    NO_TEMPERATURE_MODELS.contains(model.to_ascii_lowercase().as_str())
}

/// Chat-completion provider. Closed set so that adding a provider is a
/// compile-time-checked extension rather than a silent string fallthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Anthropic,
    Groq,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
            Self::Groq => "groq",
        }
    }
}

impl FromStr for Provider {
    type Err = ReportForgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::Openai),
            "anthropic" => Ok(Self::Anthropic),
            "groq" => Ok(Self::Groq),
            _ => Err(ReportForgeError::UnsupportedProvider(value.to_string())),
        }
    }
}

/// Logical request for a chat client. Not persisted.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub provider: Provider,
    pub model: String,
    pub temperature: Option<f64>,
}

impl ModelSpec {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A constructed client carrying the parameters the provider accepts.
///
/// The provider's wire contract itself is out of scope; callers hand
/// [`ChatClient::request_params`] to their transport of choice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatClient {
    pub provider: Provider,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl ChatClient {
    pub fn request_params(&self) -> Value {
        let mut params = json!({ "model": self.model });
        if let Some(temperature) = self.temperature {
            params["temperature"] = json!(temperature);
        }
        params
    }
}

/// Construct a chat client from a spec.
///
/// OpenAI and Anthropic omit temperature for registry models and default it
/// to 0 otherwise; Groq never forwards temperature since no Groq model in the
/// registry accepts it.
pub fn create_client(spec: &ModelSpec) -> ChatClient {
    let temperature = match spec.provider {
        Provider::Groq => None,
        Provider::Openai | Provider::Anthropic => {
            if rejects_temperature(&spec.model) {
                None
            } else {
                Some(spec.temperature.unwrap_or(0.0))
            }
        }
    };

    ChatClient {
        provider: spec.provider,
        model: spec.model.clone(),
        temperature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_models_never_carry_temperature() {
        for model in ["gpt-4o", "o3-mini", "GPT-4o", "Mixtral-8x7B", "llama2-70b"] {
            let client = create_client(
                &ModelSpec::new(Provider::Openai, model).with_temperature(0.7),
            );
            assert_eq!(client.temperature, None, "model {model}");
        }
    }

    #[test]
    fn temperature_defaults_to_zero_for_other_models() {
        let client = create_client(&ModelSpec::new(Provider::Openai, "gpt-4-turbo"));
        assert_eq!(client.temperature, Some(0.0));
    }

    #[test]
    fn explicit_temperature_is_forwarded_verbatim() {
        let client = create_client(
            &ModelSpec::new(Provider::Anthropic, "claude-3-5-sonnet").with_temperature(0.4),
        );
        assert_eq!(client.temperature, Some(0.4));
        assert_eq!(client.request_params()["temperature"], 0.4);
    }

    #[test]
    fn groq_never_forwards_temperature() {
        let client = create_client(
            &ModelSpec::new(Provider::Groq, "gemma-7b-it").with_temperature(0.9),
        );
        assert_eq!(client.temperature, None);
        assert!(client.request_params().get("temperature").is_none());
    }

    #[test]
    fn unknown_provider_fails_naming_the_value() {
        let err = "mistral".parse::<Provider>().unwrap_err();
        assert!(matches!(
            err,
            ReportForgeError::UnsupportedProvider(value) if value == "mistral"
        ));
    }

    #[test]
    fn known_providers_parse_case_insensitively() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::Openai);
        assert_eq!("ANTHROPIC".parse::<Provider>().unwrap(), Provider::Anthropic);
        assert_eq!("groq".parse::<Provider>().unwrap(), Provider::Groq);
    }
}
