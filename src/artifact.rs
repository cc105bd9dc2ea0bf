//! Durable hand-off state between pipeline stages.
//!
//! Every video gets its own working namespace under the configured work
//! directory. Stages communicate only through the files in it: the extracted
//! audio, the recognition artifact and the translation artifact. Artifacts are
//! always written through a temp file in the same directory followed by a
//! rename, so a path that exists is a complete file.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{AutokrError, Result};

/// A timestamped unit of recognized or translated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start offset in seconds
    pub start: f64,
    /// End offset in seconds
    pub end: f64,
    pub text: String,
}

impl Segment {
    pub fn new<S: Into<String>>(start: f64, end: f64, text: S) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Check the ordering and range invariants of a segment sequence.
///
/// Returns a description of the first violation. Out-of-order input is
/// rejected rather than reordered.
pub fn check_segments(segments: &[Segment]) -> std::result::Result<(), String> {
    let mut previous_start = 0.0_f64;
    for (idx, segment) in segments.iter().enumerate() {
        let number = idx + 1;
        if !segment.start.is_finite() || !segment.end.is_finite() {
            return Err(format!("segment {} has a non-finite timestamp", number));
        }
        if segment.start < 0.0 {
            return Err(format!(
                "segment {} starts before zero ({})",
                number, segment.start
            ));
        }
        if segment.end < segment.start {
            return Err(format!(
                "segment {} ends before it starts ({} < {})",
                number, segment.end, segment.start
            ));
        }
        if segment.start < previous_start {
            return Err(format!(
                "segment {} starts at {} before the previous segment at {}",
                number, segment.start, previous_start
            ));
        }
        previous_start = segment.start;
    }
    Ok(())
}

/// Output of a recognition or translation stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Artifact {
    pub segments: Vec<Segment>,
    #[serde(rename = "fullText", default, skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
    /// Language of the text fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Model that produced the artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// On-disk shapes accepted when reading. Older translation output was a
/// bare segment array.
#[derive(Deserialize)]
#[serde(untagged)]
enum ArtifactFile {
    Document(Artifact),
    Segments(Vec<Segment>),
}

impl Artifact {
    pub fn new(segments: Vec<Segment>) -> Self {
        let full_text = join_text(&segments);
        Self {
            segments,
            full_text: Some(full_text),
            language: None,
            model: None,
        }
    }

    pub fn with_language<S: Into<String>>(mut self, language: S) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Parse and validate an artifact document.
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        let file: ArtifactFile = serde_json::from_str(content)
            .map_err(|e| AutokrError::schema(origin.display(), e.to_string()))?;
        let artifact = match file {
            ArtifactFile::Document(artifact) => artifact,
            ArtifactFile::Segments(segments) => Self {
                segments,
                ..Self::default()
            },
        };
        artifact.validate(origin)?;
        Ok(artifact)
    }

    pub fn validate(&self, origin: &Path) -> Result<()> {
        check_segments(&self.segments).map_err(|reason| AutokrError::schema(origin.display(), reason))
    }

    /// Verify that `self` is a translation of `source`: same count, same
    /// timestamps, in the same order.
    pub fn check_translation_of(&self, source: &Artifact, origin: &Path) -> Result<()> {
        if self.segments.len() != source.segments.len() {
            return Err(AutokrError::schema(
                origin.display(),
                format!(
                    "segment count mismatch: {} translated for {} recognized",
                    self.segments.len(),
                    source.segments.len()
                ),
            ));
        }
        for (idx, (translated, original)) in self.segments.iter().zip(&source.segments).enumerate() {
            if translated.start != original.start || translated.end != original.end {
                return Err(AutokrError::schema(
                    origin.display(),
                    format!(
                        "segment {} timestamps changed: {}-{} became {}-{}",
                        idx + 1,
                        original.start,
                        original.end,
                        translated.start,
                        translated.end
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Whether the recorded metadata agrees with what a run asks for.
    /// Missing metadata is treated as agreeing.
    pub fn matches(&self, language: Option<&str>, model: Option<&str>) -> bool {
        let agrees = |recorded: &Option<String>, wanted: Option<&str>| match (recorded, wanted) {
            (Some(recorded), Some(wanted)) => recorded.eq_ignore_ascii_case(wanted),
            _ => true,
        };
        agrees(&self.language, language) && agrees(&self.model, model)
    }
}

/// Join segment texts the way the full transcript is presented.
pub fn join_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|segment| segment.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Write `bytes` to `path` so that readers see either the old file, no file
/// or the complete new file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".autokr-")
        .suffix(".partial")
        .tempfile_in(&dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| AutokrError::Io(e.error))?;

    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// Serialize and atomically write an artifact.
pub fn write_artifact(path: &Path, artifact: &Artifact) -> Result<()> {
    artifact.validate(path)?;
    let content = serde_json::to_string_pretty(artifact)?;
    write_atomic(path, content.as_bytes())
}

/// Read and validate an artifact that must exist.
pub fn read_artifact(path: &Path) -> Result<Artifact> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AutokrError::schema(path.display(), "artifact was not written")
        } else {
            AutokrError::Io(e)
        }
    })?;
    Artifact::parse(&content, path)
}

/// Result of looking for an existing artifact.
#[derive(Debug)]
pub enum ArtifactStatus {
    Missing,
    Valid(Artifact),
    Invalid(String),
}

/// Inspect `path` without failing on a bad artifact.
pub fn inspect_artifact(path: &Path) -> Result<ArtifactStatus> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ArtifactStatus::Missing),
        Err(e) => return Err(AutokrError::Io(e)),
    };
    match Artifact::parse(&content, path) {
        Ok(artifact) => Ok(ArtifactStatus::Valid(artifact)),
        Err(AutokrError::ArtifactSchema { reason, .. }) => Ok(ArtifactStatus::Invalid(reason)),
        Err(e) => Err(e),
    }
}

/// Root of all working namespaces.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Namespace directory for a video. Stable across invocations for the
    /// same file and distinct for different files.
    pub fn namespace_for(&self, video_path: &Path) -> Result<PathBuf> {
        let canonical = std::fs::canonicalize(video_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AutokrError::FileNotFound(video_path.display().to_string())
            } else {
                AutokrError::Io(e)
            }
        })?;

        let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
        let key: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();

        let stem: String = canonical
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string())
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .take(48)
            .collect();

        Ok(self.root.join(format!("{}-{}", stem, key)))
    }

    /// Create (or reopen) the namespace for a video.
    pub fn open(&self, video_path: &Path) -> Result<RunWorkspace> {
        let dir = self.namespace_for(video_path)?;
        std::fs::create_dir_all(&dir)?;
        Ok(RunWorkspace::new(dir))
    }
}

/// Paths of one run's working namespace.
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    dir: PathBuf,
}

impl RunWorkspace {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn audio_path(&self) -> PathBuf {
        self.dir.join("audio.wav")
    }

    /// ffmpeg picks the container from the extension, so the partial file
    /// keeps `.wav`.
    pub fn partial_audio_path(&self) -> PathBuf {
        self.dir.join("audio.partial.wav")
    }

    pub fn recognition_path(&self) -> PathBuf {
        self.dir.join("recognition.json")
    }

    pub fn translation_path(&self) -> PathBuf {
        self.dir.join("translation.json")
    }

    pub fn recognition_job_path(&self) -> PathBuf {
        self.dir.join("recognize.job.json")
    }

    pub fn translation_job_path(&self) -> PathBuf {
        self.dir.join("translate.job.json")
    }

    pub fn has_audio(&self) -> bool {
        self.audio_path().is_file()
    }

    /// Remove intermediate files. Failures are logged and counted, never
    /// returned.
    pub fn cleanup(&self, keep_audio: bool, keep_artifacts: bool) -> usize {
        let mut targets = vec![self.partial_audio_path()];
        if !keep_audio {
            targets.push(self.audio_path());
        }
        if !keep_artifacts {
            targets.extend([
                self.recognition_path(),
                self.translation_path(),
                self.recognition_job_path(),
                self.translation_job_path(),
            ]);
        }

        let mut failures = 0;
        for path in targets {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    failures += 1;
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }

        // Only succeeds once nothing is left in the namespace.
        if std::fs::remove_dir(&self.dir).is_ok() {
            debug!("Removed working directory {}", self.dir.display());
        }
        failures
    }
}
