use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AutokrError, Result};

fn default_search_width() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    2
}

fn default_request_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub media: MediaConfig,
    pub recognition: RecognitionConfig,
    pub translation: TranslationConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Sample rate of the extracted audio (16kHz is what whisper expects)
    pub sample_rate: u32,
    /// Channel count of the extracted audio
    pub channels: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Path to the whisper.cpp CLI binary
    pub binary_path: String,
    /// Model name (e.g. "large-v3") or path to a ggml model file
    pub model: String,
    /// Directory searched for `ggml-<name>.bin` when `model` is a bare name
    pub models_dir: PathBuf,
    /// Spoken language of the input
    pub language: String,
    /// Worker threads passed to whisper.cpp, if set
    #[serde(default)]
    pub threads: Option<u32>,
    /// Beam search width
    #[serde(default = "default_search_width")]
    pub beam_size: u32,
    /// Candidates kept when sampling
    #[serde(default = "default_search_width")]
    pub best_of: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// Ollama endpoint URL
    pub endpoint: String,
    /// LLM model to use for translation
    pub model: String,
    /// Language of the recognized text
    pub source_language: String,
    /// Language of the generated subtitles
    pub target_language: String,
    /// Number of segments sent per translation request
    pub batch_size: usize,
    /// Retries per request before the batch fails
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// HTTP timeout per request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root directory holding one working namespace per video
    pub work_dir: PathBuf,
    /// Keep the extracted audio after a successful run
    pub keep_audio: bool,
    /// Keep recognition/translation artifacts after a successful run
    pub keep_artifacts: bool,
    /// Upper bound for each heavy stage, unbounded when unset
    #[serde(default)]
    pub stage_timeout_secs: Option<u64>,
    /// Program used to start workers. Defaults to this executable.
    #[serde(default)]
    pub worker_program: Option<PathBuf>,
    /// Arguments placed before `worker <stage> --job <file>`
    #[serde(default)]
    pub worker_args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media: MediaConfig {
                binary_path: "ffmpeg".to_string(),
                sample_rate: 16000,
                channels: 1,
            },
            recognition: RecognitionConfig {
                binary_path: "whisper-cli".to_string(),
                model: "large-v3".to_string(),
                models_dir: PathBuf::from(".autokr").join("models"),
                language: "ja".to_string(),
                threads: None,
                beam_size: default_search_width(),
                best_of: default_search_width(),
            },
            translation: TranslationConfig {
                endpoint: "http://localhost:11434".to_string(),
                model: "llama3.2:3b".to_string(),
                source_language: "ja".to_string(),
                target_language: "ko".to_string(),
                batch_size: 16,
                max_retries: default_max_retries(),
                request_timeout_secs: default_request_timeout_secs(),
            },
            pipeline: PipelineConfig {
                work_dir: PathBuf::from(".autokr").join("work"),
                keep_audio: false,
                keep_artifacts: false,
                stage_timeout_secs: None,
                worker_program: None,
                worker_args: Vec::new(),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AutokrError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| AutokrError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AutokrError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| AutokrError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.media.binary_path.trim().is_empty() {
            return Err(AutokrError::Config("media.binary_path is empty".to_string()));
        }
        if self.media.sample_rate == 0 || self.media.channels == 0 {
            return Err(AutokrError::Config(
                "media.sample_rate and media.channels must be positive".to_string(),
            ));
        }
        if self.recognition.binary_path.trim().is_empty() {
            return Err(AutokrError::Config("recognition.binary_path is empty".to_string()));
        }
        if self.recognition.model.trim().is_empty() {
            return Err(AutokrError::Config("recognition.model is empty".to_string()));
        }
        if self.translation.model.trim().is_empty() {
            return Err(AutokrError::Config("translation.model is empty".to_string()));
        }
        if self.translation.batch_size == 0 {
            return Err(AutokrError::Config(
                "translation.batch_size must be at least 1".to_string(),
            ));
        }
        if self
            .translation
            .source_language
            .eq_ignore_ascii_case(&self.translation.target_language)
        {
            return Err(AutokrError::Config(format!(
                "Source and target language are both '{}'",
                self.translation.target_language
            )));
        }
        if self.pipeline.stage_timeout_secs == Some(0) {
            return Err(AutokrError::Config(
                "pipeline.stage_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
