//! Speech synthesis over an OpenAI-compatible `/audio/speech` endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use narration_player::SynthesisError;
use narration_player::decode::PayloadFormat;
use narration_player::provider::Synthesizer;
use reqwest::Client;
use serde::Serialize;

use crate::config::SynthesisConfig;

const ERROR_EXCERPT_CHARS: usize = 200;

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// Requests raw 16-bit PCM from the speech endpoint.
pub struct HttpSynthesizer {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    sample_rate: u32,
}

impl HttpSynthesizer {
    pub fn new(config: &SynthesisConfig, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: speech_endpoint(&config.base_url),
            model: config.model.clone(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            sample_rate: config.sample_rate,
        })
    }

    /// Build from config, reading the key from the configured environment variable.
    pub fn from_env(config: &SynthesisConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(var = %config.api_key_env, "api key not set; requests are sent without auth");
        }
        Self::new(config, api_key)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SynthesisError> {
        let body = SpeechRequest {
            model: &self.model,
            input: text,
            voice,
            response_format: "pcm",
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| SynthesisError::new(voice, format!("request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(SynthesisError::new(
                voice,
                format!("speech endpoint returned {status}: {}", excerpt(&detail)),
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SynthesisError::new(voice, format!("read response body: {e}")))?;
        tracing::debug!(chars = text.chars().count(), bytes = bytes.len(), voice, "synthesized");
        Ok(bytes.to_vec())
    }

    fn payload_format(&self) -> PayloadFormat {
        PayloadFormat::Pcm16 {
            sample_rate: self.sample_rate,
            channels: 1,
        }
    }
}

fn speech_endpoint(base_url: &str) -> String {
    format!("{}/audio/speech", base_url.trim().trim_end_matches('/'))
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= ERROR_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(ERROR_EXCERPT_CHARS).collect();
    out.push_str("...");
    out
}
