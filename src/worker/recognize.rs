use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::artifact::{Artifact, Segment};
use crate::config::RecognitionConfig;
use crate::error::{AutokrError, Result};

/// Speech recognition backend used by the recognition worker
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognize speech in a 16-bit PCM WAV file
    async fn recognize(&self, audio_path: &Path, language: &str) -> Result<Artifact>;
}

/// Recognizer implementation type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerImplementation {
    WhisperCpp,
}

/// Factory for creating recognizer instances
pub struct RecognizerFactory;

impl RecognizerFactory {
    pub fn create_recognizer(
        implementation: RecognizerImplementation,
        config: RecognitionConfig,
    ) -> Box<dyn Recognizer> {
        match implementation {
            RecognizerImplementation::WhisperCpp => Box::new(WhisperCppRecognizer::new(config)),
        }
    }

    pub fn create_default(config: RecognitionConfig) -> Box<dyn Recognizer> {
        Self::create_recognizer(RecognizerImplementation::WhisperCpp, config)
    }
}

/// whisper.cpp `-oj` output
#[derive(Debug, Clone, Deserialize)]
pub struct WhisperCppOutput {
    #[serde(default)]
    pub result: Option<WhisperCppResult>,
    #[serde(default)]
    pub transcription: Vec<WhisperCppSegment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhisperCppResult {
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhisperCppSegment {
    pub offsets: WhisperCppOffsets,
    pub text: String,
}

/// Milliseconds from the start of the audio
#[derive(Debug, Clone, Deserialize)]
pub struct WhisperCppOffsets {
    pub from: u64,
    pub to: u64,
}

impl WhisperCppOutput {
    pub fn into_artifact(self) -> Artifact {
        let segments = self
            .transcription
            .into_iter()
            .map(|segment| {
                Segment::new(
                    segment.offsets.from as f64 / 1000.0,
                    segment.offsets.to as f64 / 1000.0,
                    segment.text.trim(),
                )
            })
            .collect();

        let mut artifact = Artifact::new(segments);
        if let Some(language) = self.result.and_then(|r| r.language) {
            artifact = artifact.with_language(language);
        }
        artifact
    }
}

/// Resolve a model setting to a ggml model file. Bare names such as
/// `large-v3` map to `<models_dir>/ggml-large-v3.bin`.
pub fn resolve_model_path(config: &RecognitionConfig) -> PathBuf {
    let model = config.model.trim();
    if model.contains('/') || model.contains('\\') || model.ends_with(".bin") {
        PathBuf::from(model)
    } else {
        config.models_dir.join(format!("ggml-{}.bin", model))
    }
}

/// Recognition through the whisper.cpp CLI
pub struct WhisperCppRecognizer {
    config: RecognitionConfig,
}

impl WhisperCppRecognizer {
    pub fn new(config: RecognitionConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, audio_path: &Path, model_path: &Path, output_base: &Path, language: &str) -> Vec<String> {
        let mut args = vec![
            "-oj".to_string(),
            "-of".to_string(),
            output_base.to_string_lossy().to_string(),
            "-m".to_string(),
            model_path.to_string_lossy().to_string(),
            "-f".to_string(),
            audio_path.to_string_lossy().to_string(),
            "-l".to_string(),
            language.to_string(),
            "-bs".to_string(),
            self.config.beam_size.to_string(),
            "-bo".to_string(),
            self.config.best_of.to_string(),
        ];
        if let Some(threads) = self.config.threads {
            args.push("-t".to_string());
            args.push(threads.to_string());
        }
        args
    }
}

#[async_trait]
impl Recognizer for WhisperCppRecognizer {
    async fn recognize(&self, audio_path: &Path, language: &str) -> Result<Artifact> {
        let model_path = resolve_model_path(&self.config);
        if !model_path.is_file() {
            return Err(AutokrError::Recognition(format!(
                "Model file not found: {}",
                model_path.display()
            )));
        }

        let temp_dir = tempfile::tempdir()
            .map_err(|e| AutokrError::Recognition(format!("Failed to create temp directory: {}", e)))?;
        let output_base = temp_dir.path().join("transcript");
        let args = self.build_args(audio_path, &model_path, &output_base, language);

        info!(
            "Running whisper.cpp on {} (model: {})",
            audio_path.display(),
            model_path.display()
        );
        debug!("{} {:?}", self.config.binary_path, args);

        let output = Command::new(&self.config.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                AutokrError::Recognition(format!(
                    "Failed to execute {}: {}",
                    self.config.binary_path, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AutokrError::Recognition(format!(
                "whisper.cpp failed ({}): {}",
                output.status,
                stderr.trim_end()
            )));
        }

        let json_file = output_base.with_extension("json");
        let content = std::fs::read_to_string(&json_file)
            .map_err(|e| AutokrError::Recognition(format!("Failed to read whisper.cpp output: {}", e)))?;
        let parsed: WhisperCppOutput = serde_json::from_str(&content)
            .map_err(|e| AutokrError::Recognition(format!("Failed to parse whisper.cpp JSON: {}", e)))?;

        let artifact = parsed.into_artifact();
        info!("Recognized {} segments", artifact.len());
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    const SAMPLE: &str = r#"{
        "systeminfo": "AVX = 1",
        "model": {"type": "large"},
        "params": {"model": "models/ggml-large-v3.bin", "language": "ja"},
        "result": {"language": "ja"},
        "transcription": [
            {
                "timestamps": {"from": "00:00:00,000", "to": "00:00:02,500"},
                "offsets": {"from": 0, "to": 2500},
                "text": " こんにちは"
            },
            {
                "timestamps": {"from": "00:00:02,500", "to": "00:00:05,040"},
                "offsets": {"from": 2500, "to": 5040},
                "text": "世界 "
            }
        ]
    }"#;

    #[test]
    fn whisper_json_maps_to_artifact() {
        let parsed: WhisperCppOutput = serde_json::from_str(SAMPLE).unwrap();
        let artifact = parsed.into_artifact();

        assert_eq!(
            artifact.segments,
            vec![
                Segment::new(0.0, 2.5, "こんにちは"),
                Segment::new(2.5, 5.04, "世界"),
            ]
        );
        assert_eq!(artifact.full_text.as_deref(), Some("こんにちは 世界"));
        assert_eq!(artifact.language.as_deref(), Some("ja"));
    }

    #[test]
    fn silence_gives_an_empty_artifact() {
        let parsed: WhisperCppOutput = serde_json::from_str(r#"{"transcription": []}"#).unwrap();
        let artifact = parsed.into_artifact();
        assert!(artifact.is_empty());
        assert!(artifact.language.is_none());
    }

    #[test]
    fn bare_model_names_resolve_into_models_dir() {
        let mut config = Config::default().recognition;
        config.models_dir = PathBuf::from("/opt/models");
        assert_eq!(resolve_model_path(&config), PathBuf::from("/opt/models/ggml-large-v3.bin"));

        config.model = "custom/ggml-ja.bin".to_string();
        assert_eq!(resolve_model_path(&config), PathBuf::from("custom/ggml-ja.bin"));
    }

    #[test]
    fn cli_arguments_carry_language_and_search_settings() {
        let mut config = Config::default().recognition;
        config.threads = Some(8);
        let recognizer = WhisperCppRecognizer::new(config);
        let args = recognizer.build_args(
            Path::new("audio.wav"),
            Path::new("ggml-large-v3.bin"),
            Path::new("/tmp/out/transcript"),
            "ja",
        );
        assert_eq!(
            args,
            vec![
                "-oj", "-of", "/tmp/out/transcript", "-m", "ggml-large-v3.bin", "-f", "audio.wav",
                "-l", "ja", "-bs", "5", "-bo", "5", "-t", "8"
            ]
        );
    }

    #[tokio::test]
    async fn missing_model_is_reported_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default().recognition;
        config.models_dir = dir.path().to_path_buf();
        let recognizer = RecognizerFactory::create_default(config);

        let err = recognizer.recognize(Path::new("audio.wav"), "ja").await.unwrap_err();
        assert!(matches!(err, AutokrError::Recognition(ref m) if m.contains("ggml-large-v3.bin")));
    }
}
