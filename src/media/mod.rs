// Audio extraction behind a small trait so the pipeline can be driven
// without a real ffmpeg:
// - commands: ffmpeg command builder and execution
// - FfmpegExtractor: the production extractor

pub mod commands;

use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

pub use commands::*;

use crate::config::MediaConfig;
use crate::error::{AutokrError, Result};

/// Turns a video into mono PCM audio for recognition
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Extract the audio track of `video_path` into `audio_path`
    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<()>;

    /// Check that the underlying tool can be started
    async fn check_availability(&self) -> Result<()>;
}

/// ffmpeg-based extractor
pub struct FfmpegExtractor {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl FfmpegExtractor {
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.binary_path);
        Self {
            config,
            command_builder,
        }
    }
}

#[async_trait]
impl AudioExtractor for FfmpegExtractor {
    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<()> {
        info!("Extracting audio from {} to {}", video_path.display(), audio_path.display());

        if !video_path.is_file() {
            return Err(AutokrError::FileNotFound(video_path.display().to_string()));
        }

        let command = self.command_builder.extract_audio(
            video_path,
            audio_path,
            self.config.sample_rate,
            self.config.channels,
        );
        command.execute().await?;

        if !audio_path.is_file() {
            return Err(AutokrError::ExternalTool(format!(
                "{} reported success but wrote no audio to {}",
                self.config.binary_path,
                audio_path.display()
            )));
        }

        info!("Audio extraction completed");
        Ok(())
    }

    async fn check_availability(&self) -> Result<()> {
        debug!("Checking for {}", self.config.binary_path);
        self.command_builder.version_check().execute().await?;
        info!("Media processor is available");
        Ok(())
    }
}

/// Factory for creating audio extractor instances
pub struct MediaProcessorFactory;

impl MediaProcessorFactory {
    /// Create the default extractor implementation (FFmpeg-based)
    pub fn create_extractor(config: MediaConfig) -> Box<dyn AudioExtractor> {
        Box::new(FfmpegExtractor::new(config))
    }
}
