//! The closed-set picker itself.

use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use fault_match_config::Settings;
use fault_match_core::LlmVerdict;

use crate::prompt::{build_user_prompt, Message, Role, SYSTEM_PROMPT};

/// Endpoint configuration for the picker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl LlmConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            base_url: settings.openai_api_base.trim_end_matches('/').to_string(),
            api_key: settings.openai_api_key.clone(),
            model: settings.openai_model.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.api_key.is_empty() && !self.model.is_empty()
    }
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct PickerOptions {
    pub timeout: Duration,
    /// Hard cap on how many candidates reach the prompt
    pub max_candidates: usize,
    pub max_query_len: usize,
    pub max_candidate_len: usize,
}

impl Default for PickerOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_candidates: 5,
            max_query_len: 200,
            max_candidate_len: 300,
        }
    }
}

/// A candidate as submitted to the model.
#[derive(Debug, Clone)]
pub struct PickCandidate {
    pub id: String,
    pub text: String,
    pub system: Option<String>,
    pub part: Option<String>,
}

/// Long-lived connection pools, one per `(base_url, api_key)`. HTTP/2 is
/// negotiated via ALPN when the endpoint supports it.
static CLIENTS: Lazy<Mutex<HashMap<(String, String), reqwest::Client>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn pooled_client(config: &LlmConfig) -> Result<reqwest::Client, reqwest::Error> {
    let key = (config.base_url.clone(), config.api_key.clone());
    let mut clients = CLIENTS.lock();
    if let Some(client) = clients.get(&key) {
        return Ok(client.clone());
    }
    let client = reqwest::Client::builder().build()?;
    clients.insert(key, client.clone());
    Ok(client)
}

/// Shape the model is asked to produce. `why` is accepted as a legacy
/// spelling of `reason`.
#[derive(Debug, Deserialize)]
struct PickResponse {
    chosen_id: Option<String>,
    confidence: Option<f64>,
    #[serde(alias = "why")]
    reason: Option<String>,
}

/// Submit a bounded candidate list and return the model's pick.
///
/// This function never fails: an unconfigured endpoint, transport error,
/// timeout, or malformed/out-of-set response all come back as an `UNKNOWN`
/// verdict with zero confidence and a short reason.
pub async fn closed_set_pick(
    config: &LlmConfig,
    query: &str,
    candidates: &[PickCandidate],
    options: &PickerOptions,
) -> LlmVerdict {
    if !config.is_configured() {
        return LlmVerdict::unknown("llm not configured");
    }
    if candidates.is_empty() {
        return LlmVerdict::unknown("no candidates submitted");
    }

    let bounded = &candidates[..candidates.len().min(options.max_candidates.max(1))];
    let allowed: HashSet<&str> = bounded.iter().map(|c| c.id.as_str()).collect();

    let messages = vec![
        Message {
            role: Role::System,
            content: SYSTEM_PROMPT.to_string(),
        },
        Message {
            role: Role::User,
            content: build_user_prompt(
                query,
                bounded,
                options.max_query_len,
                options.max_candidate_len,
            ),
        },
    ];
    let payload = json!({
        "model": config.model,
        "messages": messages,
        "temperature": 0,
        "response_format": { "type": "json_object" },
    });

    let client = match pooled_client(config) {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "failed to build LLM client");
            return LlmVerdict::unknown("llm client error");
        }
    };

    let url = format!("{}/v1/chat/completions", config.base_url);
    let response = client
        .post(&url)
        .bearer_auth(&config.api_key)
        .timeout(options.timeout)
        .json(&payload)
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "LLM request failed");
            return LlmVerdict::unknown(format!("llm transport error: {e}"));
        }
    };
    if !response.status().is_success() {
        let status = response.status().as_u16();
        warn!(status, "LLM endpoint returned an error");
        return LlmVerdict::unknown(format!("llm http {status}"));
    }

    let body: serde_json::Value = match response.json().await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "LLM response body unreadable");
            return LlmVerdict::unknown("llm parse failure");
        }
    };
    let Some(content) = body["choices"][0]["message"]["content"].as_str() else {
        warn!("LLM response missing message content");
        return LlmVerdict::unknown("llm parse failure");
    };

    debug!(content, "LLM picker raw output");
    parse_verdict(content, &allowed)
}

/// Parse the model output and enforce the closed set. An unconstrained
/// string must never flow into `chosen_id`.
fn parse_verdict(content: &str, allowed: &HashSet<&str>) -> LlmVerdict {
    let parsed: PickResponse = match serde_json::from_str(content) {
        Ok(parsed) => parsed,
        Err(_) => return LlmVerdict::unknown("llm parse failure"),
    };

    let chosen = parsed.chosen_id.unwrap_or_default();
    if chosen != LlmVerdict::UNKNOWN && !allowed.contains(chosen.as_str()) {
        return LlmVerdict::unknown("llm chose an id outside the candidate set");
    }
    if chosen == LlmVerdict::UNKNOWN || chosen.is_empty() {
        return LlmVerdict {
            chosen_id: LlmVerdict::UNKNOWN.to_string(),
            confidence: 0.0,
            reason: parsed.reason,
        };
    }

    LlmVerdict {
        chosen_id: chosen,
        confidence: parsed.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
        reason: parsed.reason,
    }
}
