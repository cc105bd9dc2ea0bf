use thiserror::Error;

use crate::pipeline::Stage;

#[derive(Error, Debug)]
pub enum AutokrError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("External tool error: {0}")]
    ExternalTool(String),

    #[error("Failed to launch {stage} worker: {source}")]
    WorkerLaunch {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} worker exited with {status}{}", diagnostics_suffix(.diagnostics))]
    WorkerFailure {
        stage: Stage,
        status: String,
        diagnostics: String,
    },

    #[error("{stage} worker timed out after {seconds}s and was killed")]
    WorkerTimeout { stage: Stage, seconds: u64 },

    #[error("Invalid artifact {path}: {reason}")]
    ArtifactSchema { path: String, reason: String },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<AutokrError>,
    },
}

fn diagnostics_suffix(diagnostics: &str) -> String {
    if diagnostics.trim().is_empty() {
        String::new()
    } else {
        format!("\n--- worker output ---\n{}", diagnostics.trim_end())
    }
}

impl AutokrError {
    pub fn schema<P: std::fmt::Display, R: Into<String>>(path: P, reason: R) -> Self {
        Self::ArtifactSchema {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Attach the failing stage, unless one is already attached.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            Self::Stage { .. } => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. }
            | Self::WorkerLaunch { stage, .. }
            | Self::WorkerFailure { stage, .. }
            | Self::WorkerTimeout { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Process exit code for this failure, one per stage so scripts can
    /// tell which step needs attention.
    pub fn exit_code(&self) -> u8 {
        if let Self::Config(_) = self {
            return 2;
        }
        match self.stage() {
            Some(Stage::Extract) => 3,
            Some(Stage::Recognize) => 4,
            Some(Stage::Translate) => 5,
            Some(Stage::Encode) => 6,
            None => match self {
                Self::Encoding(_) => 6,
                _ => 1,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, AutokrError>;
