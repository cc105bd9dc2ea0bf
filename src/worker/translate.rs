use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::artifact::Segment;
use crate::config::TranslationConfig;
use crate::error::{AutokrError, Result};

/// Machine translation backend used by the translation worker
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `texts` from `source` to `target`. The reply has exactly one
    /// entry per input, in input order.
    async fn translate_batch(&self, texts: &[String], source: &str, target: &str) -> Result<Vec<String>>;

    /// Fail early when the backend cannot serve requests
    async fn check_availability(&self) -> Result<()>;

    /// Give back whatever the backend holds for this worker. Called once,
    /// after the last batch, whether or not translation succeeded.
    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Translate a segment sequence in fixed-size batches.
///
/// Batches are sent in input order; the last one may be shorter. Timestamps
/// are copied unchanged, so the result lines up 1:1 with `segments`.
pub async fn translate_segments(
    translator: &dyn Translator,
    segments: &[Segment],
    source: &str,
    target: &str,
    batch_size: usize,
) -> Result<Vec<Segment>> {
    let batch_size = batch_size.max(1);
    let total = segments.len();
    let mut translated = Vec::with_capacity(total);

    for (index, batch) in segments.chunks(batch_size).enumerate() {
        let first = index * batch_size;
        info!("Translating segments {}-{}/{}", first + 1, first + batch.len(), total);

        let texts: Vec<String> = batch.iter().map(|segment| segment.text.clone()).collect();
        let results = translator.translate_batch(&texts, source, target).await?;
        if results.len() != batch.len() {
            return Err(AutokrError::Translation(format!(
                "Backend returned {} translations for a batch of {}",
                results.len(),
                batch.len()
            )));
        }

        translated.extend(
            batch
                .iter()
                .zip(results)
                .map(|(segment, text)| Segment::new(segment.start, segment.end, text.trim())),
        );
    }

    Ok(translated)
}

/// Factory for creating translator instances
pub struct TranslatorFactory;

impl TranslatorFactory {
    pub fn create_default(config: TranslationConfig) -> Result<Box<dyn Translator>> {
        Ok(Box::new(OllamaTranslator::new(config)?))
    }
}

/// How long an unload request may take before the worker gives up on it
const UNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    /// Seconds the server keeps the model loaded after this request
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<u64>,
}

impl<'a> GenerateRequest<'a> {
    fn json(model: &'a str, prompt: String) -> Self {
        Self {
            model,
            prompt,
            stream: false,
            format: Some("json"),
            keep_alive: None,
        }
    }

    /// Empty prompt with `keep_alive: 0`; the server evicts the model.
    fn unload(model: &'a str) -> Self {
        Self {
            model,
            prompt: String::new(),
            stream: false,
            format: None,
            keep_alive: Some(0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BatchReply {
    Wrapped { translations: Vec<String> },
    Bare(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct SingleReply {
    text: String,
}

/// Translation through an Ollama server
pub struct OllamaTranslator {
    client: Client,
    config: TranslationConfig,
}

impl OllamaTranslator {
    pub fn new(config: TranslationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// POST one prompt, retrying up to `max_retries` times.
    async fn generate(&self, prompt: String) -> Result<String> {
        let url = self.generate_url();
        let request = GenerateRequest::json(&self.config.model, prompt);

        let mut attempt = 0;
        loop {
            match self.post_generate(&url, &request).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "Translation request failed (attempt {}/{}): {}",
                        attempt,
                        self.config.max_retries + 1,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'))
    }

    async fn post_generate(&self, url: &str, request: &GenerateRequest<'_>) -> Result<String> {
        debug!("Sending translation request to: {}", url);
        let mut builder = self.client.post(url).json(request);
        if request.keep_alive == Some(0) {
            builder = builder.timeout(UNLOAD_TIMEOUT);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| AutokrError::Translation(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AutokrError::Translation(format!(
                "Ollama API error {}: {}",
                status, error_text
            )));
        }

        let reply: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AutokrError::Translation(format!("Failed to parse response: {}", e)))?;
        debug!("Raw Ollama response: {}", reply.response);
        Ok(reply.response)
    }

    async fn translate_one(&self, text: &str, source: &str, target: &str) -> Result<String> {
        let raw = self.generate(build_single_prompt(text, source, target)).await?;
        parse_single(&raw)
            .ok_or_else(|| AutokrError::Translation(format!("Empty translation received for \"{}\"", text)))
    }
}

#[async_trait]
impl Translator for OllamaTranslator {
    async fn translate_batch(&self, texts: &[String], source: &str, target: &str) -> Result<Vec<String>> {
        let mut results = vec![String::new(); texts.len()];

        // Blank lines need no request and must not shift the numbering.
        let pending: Vec<usize> = (0..texts.len())
            .filter(|&i| !texts[i].trim().is_empty())
            .collect();
        if pending.is_empty() {
            return Ok(results);
        }

        let batch: Vec<&str> = pending.iter().map(|&i| texts[i].trim()).collect();
        let raw = self.generate(build_batch_prompt(&batch, source, target)).await?;

        match parse_translations(&raw) {
            Some(translations) if translations.len() == batch.len() => {
                for (&i, text) in pending.iter().zip(translations) {
                    results[i] = text.trim().to_string();
                }
            }
            other => {
                warn!(
                    "Batch reply had {} entries for {} lines, translating one by one",
                    other.map(|t| t.len()).unwrap_or(0),
                    batch.len()
                );
                for &i in &pending {
                    results[i] = self.translate_one(texts[i].trim(), source, target).await?;
                }
            }
        }

        Ok(results)
    }

    async fn check_availability(&self) -> Result<()> {
        let url = format!("{}/api/show", self.config.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&json!({ "name": self.config.model }))
            .send()
            .await
            .map_err(|e| AutokrError::Translation(format!("Failed to connect to Ollama: {}", e)))?;

        if response.status().is_success() {
            info!("Ollama model '{}' is available", self.config.model);
            Ok(())
        } else {
            Err(AutokrError::Translation(format!(
                "Ollama model '{}' not found. Please pull the model first: ollama pull {}",
                self.config.model, self.config.model
            )))
        }
    }

    async fn release(&self) -> Result<()> {
        let request = GenerateRequest::unload(&self.config.model);
        self.post_generate(&self.generate_url(), &request).await?;
        info!("Unloaded Ollama model '{}'", self.config.model);
        Ok(())
    }
}

fn build_batch_prompt(texts: &[&str], source: &str, target: &str) -> String {
    let source_name = language_code_to_name(source);
    let target_name = language_code_to_name(target);
    let lines = serde_json::to_string_pretty(texts).unwrap_or_else(|_| "[]".to_string());

    format!(
        "You are a professional subtitle translator.\n\
         \n\
         Translate each {source} subtitle line below into {target} (language code: {code}).\n\
         The lines come from consecutive subtitles of one video; use them as context for each other,\n\
         but translate every line separately. Never merge, split, drop or reorder lines.\n\
         \n\
         Return ONLY JSON in the form {{\"translations\": [\"...\", \"...\"]}} with exactly {count} entries,\n\
         entry N being the {target} translation of line N.\n\
         \n\
         [Lines]\n\
         {lines}\n",
        source = source_name,
        target = target_name,
        code = target,
        count = texts.len(),
        lines = lines,
    )
}

fn build_single_prompt(text: &str, source: &str, target: &str) -> String {
    let target_name = language_code_to_name(target);
    format!(
        "You are a professional subtitle translator.\n\
         \n\
         Translate the {} text below into {} ONLY (language code: {}).\n\
         Return ONLY JSON in the form {{\"text\": \"your {} translation here\"}}.\n\
         \n\
         Text to translate: {}\n",
        language_code_to_name(source),
        target_name,
        target,
        target_name,
        serde_json::to_string(text).unwrap_or_else(|_| text.to_string()),
    )
}

/// Extract the translation list from a model reply.
fn parse_translations(raw: &str) -> Option<Vec<String>> {
    match serde_json::from_str::<BatchReply>(raw.trim()).ok()? {
        BatchReply::Wrapped { translations } => Some(translations),
        BatchReply::Bare(translations) => Some(translations),
    }
}

/// Extract one translation, falling back to the raw reply text.
fn parse_single(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let text = match serde_json::from_str::<SingleReply>(raw) {
        Ok(reply) => reply.text.trim().to_string(),
        Err(_) => raw.to_string(),
    };
    if text.is_empty() { None } else { Some(text) }
}

/// Full language name for prompts
fn language_code_to_name(code: &str) -> String {
    match code.to_lowercase().as_str() {
        "ja" => "Japanese".to_string(),
        "ko" => "Korean".to_string(),
        "zh" => "Chinese".to_string(),
        "en" => "English".to_string(),
        "fr" => "French".to_string(),
        "de" => "German".to_string(),
        "es" => "Spanish".to_string(),
        "it" => "Italian".to_string(),
        "pt" => "Portuguese".to_string(),
        "ru" => "Russian".to_string(),
        "th" => "Thai".to_string(),
        "vi" => "Vietnamese".to_string(),
        "id" => "Indonesian".to_string(),
        _ => code.to_string(),
    }
}
