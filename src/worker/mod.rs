// Process-isolated stage workers
//
// Recognition and translation each load a large model. They run in a child
// process (this binary started with the hidden `worker` subcommand) that
// performs one job and exits, which hands every byte of model memory back to
// the OS. The orchestrator and a worker share nothing but files:
// - the job file: an explicit configuration object written by the orchestrator
// - the artifact: written by the worker through an atomic rename
//
// - launcher: orchestrator side (spawn, capture output, timeout, kill)
// - recognize: whisper.cpp recognition backend
// - translate: batched translation with an Ollama backend

pub mod launcher;
pub mod recognize;
pub mod translate;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub use launcher::WorkerLauncher;
pub use recognize::{Recognizer, RecognizerFactory};
pub use translate::{translate_segments, Translator, TranslatorFactory};

use crate::artifact::{read_artifact, write_artifact, write_atomic, Artifact};
use crate::config::{RecognitionConfig, TranslationConfig};
use crate::error::{AutokrError, Result};

/// Everything the recognition worker needs for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionJob {
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
    pub config: RecognitionConfig,
}

/// Everything the translation worker needs for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationJob {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub config: TranslationConfig,
}

pub fn write_job<T: Serialize>(path: &Path, job: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(job)?;
    write_atomic(path, content.as_bytes())
}

pub fn read_job<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AutokrError::Config(format!("Failed to read job file {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| AutokrError::Config(format!("Invalid job file {}: {}", path.display(), e)))
}

/// Run one recognition job with the given backend and persist its artifact.
pub async fn run_recognition_job(job: &RecognitionJob, recognizer: &dyn Recognizer) -> Result<Artifact> {
    if !job.audio_path.is_file() {
        return Err(AutokrError::FileNotFound(job.audio_path.display().to_string()));
    }

    let artifact = recognizer
        .recognize(&job.audio_path, &job.config.language)
        .await?
        .with_language(job.config.language.clone())
        .with_model(job.config.model.clone());

    write_artifact(&job.output_path, &artifact)?;
    info!(
        "Recognition artifact written: {} ({} segments)",
        job.output_path.display(),
        artifact.len()
    );
    Ok(artifact)
}

/// Run one translation job with the given backend and persist its artifact.
///
/// The backend is released afterwards on every path, so a model served by
/// another process does not outlive the worker.
pub async fn run_translation_job(job: &TranslationJob, translator: &dyn Translator) -> Result<Artifact> {
    let result = translate_job(job, translator).await;
    if let Err(e) = translator.release().await {
        warn!("Failed to release translation backend: {}", e);
    }
    result
}

async fn translate_job(job: &TranslationJob, translator: &dyn Translator) -> Result<Artifact> {
    let source = read_artifact(&job.input_path)?;
    let config = &job.config;

    info!(
        "Translating {} segments {} -> {} in batches of {}",
        source.len(),
        config.source_language,
        config.target_language,
        config.batch_size
    );

    let segments = translate_segments(
        translator,
        &source.segments,
        &config.source_language,
        &config.target_language,
        config.batch_size,
    )
    .await?;

    let artifact = Artifact::new(segments)
        .with_language(config.target_language.clone())
        .with_model(config.model.clone());
    artifact.check_translation_of(&source, &job.output_path)?;

    write_artifact(&job.output_path, &artifact)?;
    info!(
        "Translation artifact written: {} ({} segments)",
        job.output_path.display(),
        artifact.len()
    );
    Ok(artifact)
}

/// Entry point of the recognition worker process
pub async fn run_recognition_worker(job_path: &Path) -> Result<()> {
    let job: RecognitionJob = read_job(job_path)?;
    info!("Recognition worker started (model: {}, language: {})", job.config.model, job.config.language);
    let recognizer = RecognizerFactory::create_default(job.config.clone());
    run_recognition_job(&job, recognizer.as_ref()).await?;
    Ok(())
}

/// Entry point of the translation worker process
pub async fn run_translation_worker(job_path: &Path) -> Result<()> {
    let job: TranslationJob = read_job(job_path)?;
    info!("Translation worker started (model: {})", job.config.model);
    let translator = TranslatorFactory::create_default(job.config.clone())?;
    translator.check_availability().await?;
    run_translation_job(&job, translator.as_ref()).await?;
    Ok(())
}
