//! LLM adapter (C3, spec.md §4.3).
//!
//! `generate` issues one chat-completion call with retry/backoff, adapted
//! from the teacher's `OpenAIProvider` embeddings client (same 429/5xx-retry,
//! 4xx-fail-fast shape, pointed at a chat endpoint instead). Tolerant JSON
//! parsing lives in [`crate::json_repair`].

use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::config::LlmConfig;

#[derive(Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build LLM HTTP client")?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    /// `Generate(prompt) -> raw_text` (spec.md §4.3). Single logical call;
    /// retries transient failures (429/5xx/network) with exponential
    /// backoff, fails immediately on other 4xx errors.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.2,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return extract_message_content(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("LLM API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("LLM API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("LLM generate failed after retries")))
    }
}

fn extract_message_content(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid LLM response: missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_message_content() {
        let json = serde_json::json!({
            "choices": [{"message": {"content": "{\"bridges\":[]}"}}]
        });
        assert_eq!(extract_message_content(&json).unwrap(), "{\"bridges\":[]}");
    }

    #[test]
    fn missing_choices_errors() {
        let json = serde_json::json!({});
        assert!(extract_message_content(&json).is_err());
    }
}
