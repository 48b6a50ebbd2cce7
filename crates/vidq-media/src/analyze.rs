//! Transcript analysis over HTTP (Ollama or an OpenAI-compatible endpoint).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use vidq_models::AnalysisProvider;

use crate::error::{MediaError, MediaResult};

/// Longest transcript excerpt sent to the model. Anything longer gets
/// truncated from the end; the opening of a video carries most of the
/// context a summary needs.
const MAX_TRANSCRIPT_CHARS: usize = 24_000;

/// Result of analyzing one transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub provider: String,
    pub model: String,
    /// Raw model output: a short summary followed by people and topic tags.
    pub summary: String,
    pub generated_at: DateTime<Utc>,
}

/// Analyzer speaking to a local Ollama instance or any OpenAI-compatible
/// chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpAnalyzer {
    client: reqwest::Client,
    ollama_url: String,
    openai_url: String,
}

impl HttpAnalyzer {
    pub fn new(ollama_url: impl Into<String>, openai_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            ollama_url: trim_slash(ollama_url.into()),
            openai_url: trim_slash(openai_url.into()),
        }
    }

    /// Analyze a transcript, returning the model's report.
    pub async fn analyze(
        &self,
        provider: AnalysisProvider,
        model: &str,
        api_key: Option<&str>,
        transcript: &str,
        title: Option<&str>,
    ) -> MediaResult<AnalysisReport> {
        let prompt = build_prompt(transcript, title);
        info!(
            provider = provider.as_str(),
            model = model,
            prompt_chars = prompt.len(),
            "Analyzing transcript"
        );

        let summary = match provider {
            AnalysisProvider::Ollama => self.generate_ollama(model, &prompt).await?,
            AnalysisProvider::OpenAi => {
                let key = api_key.ok_or_else(|| {
                    MediaError::analysis_failed("API key required for OpenAI-compatible provider")
                })?;
                self.generate_openai(model, key, &prompt).await?
            }
        };

        Ok(AnalysisReport {
            provider: provider.as_str().to_string(),
            model: model.to_string(),
            summary,
            generated_at: Utc::now(),
        })
    }

    /// Analyze and write the report as JSON to `output`.
    pub async fn analyze_to_file(
        &self,
        provider: AnalysisProvider,
        model: &str,
        api_key: Option<&str>,
        transcript: &str,
        title: Option<&str>,
        output: impl AsRef<Path>,
    ) -> MediaResult<PathBuf> {
        let output = output.as_ref();
        let report = self
            .analyze(provider, model, api_key, transcript, title)
            .await?;
        let json = serde_json::to_vec_pretty(&report)?;
        tokio::fs::write(output, json).await?;
        info!(output = %output.display(), "Wrote analysis report");
        Ok(output.to_path_buf())
    }

    async fn generate_ollama(&self, model: &str, prompt: &str) -> MediaResult<String> {
        #[derive(Deserialize)]
        struct OllamaResponse {
            response: String,
        }

        let url = format!("{}/api/generate", self.ollama_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "model": model,
                "prompt": prompt,
                "stream": false,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            debug!(status = %status, body = %body, "Ollama error response");
            return Err(MediaError::analysis_failed(format!(
                "Ollama returned HTTP {status}"
            )));
        }

        let parsed: OllamaResponse = response.json().await?;
        Ok(parsed.response)
    }

    async fn generate_openai(
        &self,
        model: &str,
        api_key: &str,
        prompt: &str,
    ) -> MediaResult<String> {
        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<ChatChoice>,
        }
        #[derive(Deserialize)]
        struct ChatChoice {
            message: ChatMessage,
        }
        #[derive(Deserialize)]
        struct ChatMessage {
            content: String,
        }

        let url = format!("{}/v1/chat/completions", self.openai_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&json!({
                "model": model,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(MediaError::analysis_failed(format!(
                "analysis endpoint returned HTTP {status}"
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| MediaError::analysis_failed("empty completion response"))
    }
}

/// Build the analysis prompt: a short content summary plus people and
/// topic tags.
fn build_prompt(transcript: &str, title: Option<&str>) -> String {
    let title_context = title
        .map(|t| format!("\nThe video is titled: \"{t}\"."))
        .unwrap_or_default();
    let excerpt = truncate_chars(transcript, MAX_TRANSCRIPT_CHARS);

    format!(
        "Provide a brief 2-3 sentence summary of this video based on its transcript.{title_context}\n\
         Focus on: What is the video about? What are the main topics? Who is speaking, if identifiable?\n\
         Then list the people speaking or discussed, one per line, prefixed with 'person: '.\n\
         Then list 3-8 concise topic tags (1-3 words each), one per line, prefixed with 'topic: '.\n\n\
         Transcript:\n{excerpt}\n\nSummary:"
    )
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn trim_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}
