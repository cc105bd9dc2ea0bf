use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::Config;
use crate::pipeline::Stage;
use crate::subtitle::SubtitleFormat;

/// Generate translated subtitles from a video's speech
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, subcommand_negates_reqs = true)]
pub struct Args {
    /// Input video file
    #[arg(short, long, required = true)]
    pub input: Option<PathBuf>,

    /// Output subtitle file [default: <input stem>.<format> next to the input]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Subtitle format (srt, smi)
    #[arg(short, long, default_value = "srt")]
    pub format: SubtitleFormat,

    /// Recognition model name or ggml model path
    #[arg(short, long, visible_alias = "whisper")]
    pub model: Option<String>,

    /// Translation model
    #[arg(short = 't', long, visible_alias = "translate")]
    pub translate_model: Option<String>,

    /// Spoken language of the video
    #[arg(long)]
    pub language: Option<String>,

    /// Subtitle language
    #[arg(long)]
    pub target_language: Option<String>,

    /// Segments per translation request
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Keep the extracted audio
    #[arg(long)]
    pub keep_audio: bool,

    /// Keep the recognition and translation artifacts
    #[arg(long)]
    pub keep_artifacts: bool,

    /// Root directory for per-video working directories
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Time limit in seconds for each recognition or translation run
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one heavy stage in this process (started by the pipeline)
    #[command(hide = true)]
    Worker {
        stage: WorkerStage,

        /// Job file written by the pipeline
        #[arg(long)]
        job: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerStage {
    Recognize,
    Translate,
}

impl From<WorkerStage> for Stage {
    fn from(stage: WorkerStage) -> Self {
        match stage {
            WorkerStage::Recognize => Stage::Recognize,
            WorkerStage::Translate => Stage::Translate,
        }
    }
}

impl Args {
    /// Apply command line settings on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(model) = &self.model {
            config.recognition.model = model.clone();
        }
        if let Some(model) = &self.translate_model {
            config.translation.model = model.clone();
        }
        if let Some(language) = &self.language {
            config.recognition.language = language.clone();
            config.translation.source_language = language.clone();
        }
        if let Some(language) = &self.target_language {
            config.translation.target_language = language.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.translation.batch_size = batch_size;
        }
        if self.keep_audio {
            config.pipeline.keep_audio = true;
        }
        if self.keep_artifacts {
            config.pipeline.keep_artifacts = true;
        }
        if let Some(work_dir) = &self.work_dir {
            config.pipeline.work_dir = work_dir.clone();
        }
        if let Some(timeout) = self.timeout {
            config.pipeline.stage_timeout_secs = Some(timeout);
        }
    }

    /// Where the subtitles go for `input`.
    pub fn output_path(&self, input: &std::path::Path) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| input.with_extension(self.format.extension()))
    }
}
