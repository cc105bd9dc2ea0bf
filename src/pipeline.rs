//! Stage orchestration with resume.
//!
//! A run is strictly sequential: extract, recognize, translate, encode. Before
//! each stage the orchestrator looks in the video's working namespace for the
//! stage's output and reuses it when it is valid and was produced with the
//! settings of this run. The heavy stages run in worker processes; the
//! orchestrator only ever talks to them through job files and artifacts.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::artifact::{
    inspect_artifact, read_artifact, write_atomic, Artifact, ArtifactStatus, ArtifactStore, RunWorkspace,
};
use crate::config::Config;
use crate::error::{AutokrError, Result};
use crate::media::{AudioExtractor, MediaProcessorFactory};
use crate::subtitle::{SubtitleEncoder, SubtitleFormat};
use crate::worker::{write_job, RecognitionJob, TranslationJob, WorkerLauncher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Extract,
    Recognize,
    Translate,
    Encode,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Extract, Stage::Recognize, Stage::Translate, Stage::Encode];

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Recognize => "recognize",
            Stage::Translate => "translate",
            Stage::Encode => "encode",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a stage did during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage ran
    Executed,
    /// A previous run's output was used
    Reused,
    /// Nothing downstream needed the stage
    Skipped,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageOutcome::Executed => "executed",
            StageOutcome::Reused => "reused",
            StageOutcome::Skipped => "skipped",
        })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub video_path: PathBuf,
    pub output_path: PathBuf,
    pub format: SubtitleFormat,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub output_path: PathBuf,
    pub workspace: PathBuf,
    pub segment_count: usize,
    pub stages: Vec<(Stage, StageOutcome)>,
}

impl PipelineReport {
    pub fn outcome(&self, stage: Stage) -> Option<StageOutcome> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, outcome)| *outcome)
    }
}

/// Runs videos through the four stages. Holds no per-run state, so one
/// instance can drive several videos at once.
pub struct Pipeline {
    config: Config,
    store: ArtifactStore,
    extractor: Box<dyn AudioExtractor>,
    launcher: WorkerLauncher,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        let store = ArtifactStore::new(config.pipeline.work_dir.clone());
        let extractor = MediaProcessorFactory::create_extractor(config.media.clone());
        let launcher = WorkerLauncher::from_config(&config.pipeline)?;

        Ok(Self {
            config,
            store,
            extractor,
            launcher,
        })
    }

    pub fn with_extractor(mut self, extractor: Box<dyn AudioExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_launcher(mut self, launcher: WorkerLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Produce the subtitle file for one video, resuming from whatever a
    /// previous run left in the video's namespace.
    pub async fn run(&self, request: &PipelineRequest) -> Result<PipelineReport> {
        info!("Processing {}", request.video_path.display());

        let workspace = self.store.open(&request.video_path)?;
        debug!("Working namespace: {}", workspace.dir().display());
        let mut stages = Vec::with_capacity(Stage::ALL.len());

        let existing = self
            .reusable_recognition(&workspace)
            .map_err(|e| e.in_stage(Stage::Recognize))?;

        let extract = if existing.is_some() {
            info!("Recognition output exists, audio not needed");
            StageOutcome::Skipped
        } else if workspace.has_audio() {
            info!("Reusing extracted audio {}", workspace.audio_path().display());
            StageOutcome::Reused
        } else {
            self.extract(request, &workspace)
                .await
                .map_err(|e| e.in_stage(Stage::Extract))?;
            StageOutcome::Executed
        };
        stages.push((Stage::Extract, extract));

        let recognition = match existing {
            Some(artifact) => {
                stages.push((Stage::Recognize, StageOutcome::Reused));
                artifact
            }
            None => {
                let artifact = self
                    .recognize(&workspace)
                    .await
                    .map_err(|e| e.in_stage(Stage::Recognize))?;
                stages.push((Stage::Recognize, StageOutcome::Executed));
                artifact
            }
        };

        let reusable = self
            .reusable_translation(&workspace, &recognition)
            .map_err(|e| e.in_stage(Stage::Translate))?;
        let translation = match reusable {
            Some(artifact) => {
                stages.push((Stage::Translate, StageOutcome::Reused));
                artifact
            }
            None => {
                let artifact = self
                    .translate(&workspace, &recognition)
                    .await
                    .map_err(|e| e.in_stage(Stage::Translate))?;
                stages.push((Stage::Translate, StageOutcome::Executed));
                artifact
            }
        };

        self.encode(&translation, request)
            .map_err(|e| e.in_stage(Stage::Encode))?;
        stages.push((Stage::Encode, StageOutcome::Executed));

        let failures = workspace.cleanup(
            self.config.pipeline.keep_audio,
            self.config.pipeline.keep_artifacts,
        );
        if failures > 0 {
            warn!("{} intermediate file(s) could not be removed from {}", failures, workspace.dir().display());
        }

        info!(
            "Wrote {} subtitles to {}",
            translation.len(),
            request.output_path.display()
        );
        Ok(PipelineReport {
            output_path: request.output_path.clone(),
            workspace: workspace.dir().to_path_buf(),
            segment_count: translation.len(),
            stages,
        })
    }

    fn reusable_recognition(&self, workspace: &RunWorkspace) -> Result<Option<Artifact>> {
        let path = workspace.recognition_path();
        let recognition = &self.config.recognition;

        match inspect_artifact(&path)? {
            ArtifactStatus::Missing => Ok(None),
            ArtifactStatus::Valid(artifact)
                if artifact.matches(Some(recognition.language.as_str()), Some(recognition.model.as_str())) =>
            {
                info!("Reusing recognition artifact {} ({} segments)", path.display(), artifact.len());
                Ok(Some(artifact))
            }
            ArtifactStatus::Valid(artifact) => {
                warn!(
                    "Recognition artifact {} was made with {:?}/{:?}, this run uses {}/{}; recomputing",
                    path.display(),
                    artifact.language,
                    artifact.model,
                    recognition.language,
                    recognition.model
                );
                discard(&path)?;
                Ok(None)
            }
            ArtifactStatus::Invalid(reason) => {
                warn!("Discarding invalid recognition artifact {}: {}", path.display(), reason);
                discard(&path)?;
                Ok(None)
            }
        }
    }

    fn reusable_translation(&self, workspace: &RunWorkspace, recognition: &Artifact) -> Result<Option<Artifact>> {
        let path = workspace.translation_path();
        let translation = &self.config.translation;

        match inspect_artifact(&path)? {
            ArtifactStatus::Missing => Ok(None),
            ArtifactStatus::Valid(artifact)
                if !artifact.matches(
                    Some(translation.target_language.as_str()),
                    Some(translation.model.as_str()),
                ) =>
            {
                warn!(
                    "Translation artifact {} was made with {:?}/{:?}, this run uses {}/{}; recomputing",
                    path.display(),
                    artifact.language,
                    artifact.model,
                    translation.target_language,
                    translation.model
                );
                discard(&path)?;
                Ok(None)
            }
            ArtifactStatus::Valid(artifact) => match artifact.check_translation_of(recognition, &path) {
                Ok(()) => {
                    info!("Reusing translation artifact {} ({} segments)", path.display(), artifact.len());
                    Ok(Some(artifact))
                }
                Err(e) => {
                    warn!("Translation artifact no longer matches the recognition output: {}", e);
                    discard(&path)?;
                    Ok(None)
                }
            },
            ArtifactStatus::Invalid(reason) => {
                warn!("Discarding invalid translation artifact {}: {}", path.display(), reason);
                discard(&path)?;
                Ok(None)
            }
        }
    }

    async fn extract(&self, request: &PipelineRequest, workspace: &RunWorkspace) -> Result<()> {
        self.extractor.check_availability().await?;

        let partial = workspace.partial_audio_path();
        discard(&partial)?;
        self.extractor.extract_audio(&request.video_path, &partial).await?;
        std::fs::rename(&partial, workspace.audio_path())?;
        Ok(())
    }

    async fn recognize(&self, workspace: &RunWorkspace) -> Result<Artifact> {
        let output_path = workspace.recognition_path();
        discard(&output_path)?;
        // Derived from the recognition that is about to be replaced.
        discard(&workspace.translation_path())?;

        let job = RecognitionJob {
            audio_path: workspace.audio_path(),
            output_path: output_path.clone(),
            config: self.config.recognition.clone(),
        };
        let job_path = workspace.recognition_job_path();
        write_job(&job_path, &job)?;

        self.launcher.run(Stage::Recognize, &job_path).await?;

        let artifact = read_artifact(&output_path)?;
        info!("Recognition produced {} segments", artifact.len());
        Ok(artifact)
    }

    async fn translate(&self, workspace: &RunWorkspace, recognition: &Artifact) -> Result<Artifact> {
        let output_path = workspace.translation_path();
        discard(&output_path)?;

        let job = TranslationJob {
            input_path: workspace.recognition_path(),
            output_path: output_path.clone(),
            config: self.config.translation.clone(),
        };
        let job_path = workspace.translation_job_path();
        write_job(&job_path, &job)?;

        self.launcher.run(Stage::Translate, &job_path).await?;

        let artifact = read_artifact(&output_path)?;
        artifact.check_translation_of(recognition, &output_path)?;
        Ok(artifact)
    }

    fn encode(&self, translation: &Artifact, request: &PipelineRequest) -> Result<()> {
        let encoder = SubtitleEncoder::new(self.config.translation.target_language.clone());
        let text = encoder.encode(&translation.segments, request.format)?;
        write_atomic(&request.output_path, text.as_bytes())
    }
}

/// Remove a file that may or may not exist.
fn discard(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AutokrError::Io(e)),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::artifact::{write_artifact, Segment};
    use crate::worker::launcher::process::{exits_soon, read_pid};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const RECOGNIZE_OK: &str = r#"cat > "$dir/recognition.json" <<'EOF'
{"segments":[{"start":0.0,"end":2.5,"text":"こんにちは"},{"start":2.5,"end":5.0,"text":"世界"}],"fullText":"こんにちは 世界","language":"ja","model":"large-v3"}
EOF"#;

    const TRANSLATE_OK: &str = r#"cat > "$dir/translation.json" <<'EOF'
{"segments":[{"start":0.0,"end":2.5,"text":"안녕"},{"start":2.5,"end":5.0,"text":"하세요"}],"language":"ko","model":"llama3.2:3b"}
EOF"#;

    const EXPECTED_SRT: &str =
        "1\n00:00:00,000 --> 00:00:02,500\n안녕\n\n2\n00:00:02,500 --> 00:00:05,000\n하세요\n\n";

    const WORKER_TEMPLATE: &str = r#"dir=$(dirname "$4")
echo "$2" >> "@CALLS@"
case "$2" in
recognize)
@RECOGNIZE@
;;
translate)
@TRANSLATE@
;;
esac
"#;

    struct FakeExtractor {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl AudioExtractor for FakeExtractor {
        async fn extract_audio(&self, _video_path: &Path, audio_path: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(audio_path.ends_with("audio.partial.wav"));
            if self.fail {
                return Err(AutokrError::ExternalTool("Audio extraction failed (exit status: 1)".to_string()));
            }
            std::fs::write(audio_path, b"RIFF")?;
            Ok(())
        }

        async fn check_availability(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        config: Config,
        extractions: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new(recognize: &str, translate: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let harness = Self {
                config: Config::default(),
                extractions: Arc::new(AtomicUsize::new(0)),
                dir,
            };
            harness.with_workers(recognize, translate)
        }

        fn with_workers(mut self, recognize: &str, translate: &str) -> Self {
            let script = self.dir.path().join("worker.sh");
            let body = WORKER_TEMPLATE
                .replace("@CALLS@", &self.calls_path().to_string_lossy())
                .replace("@RECOGNIZE@", recognize)
                .replace("@TRANSLATE@", translate);
            std::fs::write(&script, body).unwrap();

            self.config.pipeline.work_dir = self.dir.path().join("work");
            self.config.pipeline.worker_program = Some(PathBuf::from("/bin/sh"));
            self.config.pipeline.worker_args = vec![script.to_string_lossy().to_string()];
            self
        }

        fn calls_path(&self) -> PathBuf {
            self.dir.path().join("calls")
        }

        fn worker_calls(&self) -> Vec<String> {
            std::fs::read_to_string(self.calls_path())
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn video(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            if !path.exists() {
                std::fs::write(&path, b"video").unwrap();
            }
            path
        }

        fn request(&self, video: &str, format: SubtitleFormat) -> PipelineRequest {
            let video_path = self.video(video);
            PipelineRequest {
                output_path: video_path.with_extension(format.extension()),
                video_path,
                format,
            }
        }

        fn pipeline(&self) -> Pipeline {
            self.pipeline_with_extractor(false)
        }

        fn pipeline_with_extractor(&self, fail: bool) -> Pipeline {
            Pipeline::new(self.config.clone()).unwrap().with_extractor(Box::new(FakeExtractor {
                calls: self.extractions.clone(),
                fail,
            }))
        }

        fn workspace(&self, video: &str) -> RunWorkspace {
            let store = ArtifactStore::new(self.config.pipeline.work_dir.clone());
            store.open(&self.video(video)).unwrap()
        }
    }

    fn recognized() -> Artifact {
        Artifact::new(vec![
            Segment::new(0.0, 2.5, "こんにちは"),
            Segment::new(2.5, 5.0, "世界"),
        ])
        .with_language("ja")
        .with_model("large-v3")
    }

    #[tokio::test]
    async fn full_run_writes_subtitles_and_cleans_up() {
        let harness = Harness::new(RECOGNIZE_OK, TRANSLATE_OK);
        let request = harness.request("talk.mp4", SubtitleFormat::Srt);

        let report = harness.pipeline().run(&request).await.unwrap();

        assert_eq!(std::fs::read_to_string(&request.output_path).unwrap(), EXPECTED_SRT);
        assert_eq!(report.segment_count, 2);
        for stage in Stage::ALL {
            assert_eq!(report.outcome(stage), Some(StageOutcome::Executed));
        }
        assert_eq!(harness.worker_calls(), vec!["recognize", "translate"]);
        assert_eq!(harness.extractions.load(Ordering::SeqCst), 1);
        assert!(!report.workspace.exists());
    }

    #[tokio::test]
    async fn valid_recognition_artifact_skips_the_recognizer() {
        let harness = Harness::new("exit 1", TRANSLATE_OK);
        let workspace = harness.workspace("talk.mp4");
        write_artifact(&workspace.recognition_path(), &recognized()).unwrap();

        let request = harness.request("talk.mp4", SubtitleFormat::Srt);
        let report = harness.pipeline().run(&request).await.unwrap();

        assert_eq!(harness.worker_calls(), vec!["translate"]);
        assert_eq!(harness.extractions.load(Ordering::SeqCst), 0);
        assert_eq!(report.outcome(Stage::Extract), Some(StageOutcome::Skipped));
        assert_eq!(report.outcome(Stage::Recognize), Some(StageOutcome::Reused));
        assert_eq!(std::fs::read_to_string(&request.output_path).unwrap(), EXPECTED_SRT);
    }

    #[tokio::test]
    async fn extracted_audio_is_reused() {
        let harness = Harness::new(RECOGNIZE_OK, TRANSLATE_OK);
        let workspace = harness.workspace("talk.mp4");
        std::fs::write(workspace.audio_path(), b"RIFF").unwrap();

        let report = harness
            .pipeline()
            .run(&harness.request("talk.mp4", SubtitleFormat::Srt))
            .await
            .unwrap();

        assert_eq!(report.outcome(Stage::Extract), Some(StageOutcome::Reused));
        assert_eq!(harness.extractions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn worker_failure_carries_diagnostics_and_keeps_audio() {
        let harness = Harness::new("echo 'CUDA out of memory' >&2\nexit 1", TRANSLATE_OK);
        let request = harness.request("talk.mp4", SubtitleFormat::Srt);

        let err = harness.pipeline().run(&request).await.unwrap_err();

        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("CUDA out of memory"));
        assert!(harness.workspace("talk.mp4").has_audio());
        assert!(!request.output_path.exists());
    }

    #[tokio::test]
    async fn translation_count_mismatch_is_a_schema_error() {
        let short = r#"cat > "$dir/translation.json" <<'EOF'
{"segments":[{"start":0.0,"end":2.5,"text":"안녕"}]}
EOF"#;
        let harness = Harness::new(RECOGNIZE_OK, short);
        let err = harness
            .pipeline()
            .run(&harness.request("talk.mp4", SubtitleFormat::Srt))
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 5);
        match err {
            AutokrError::Stage { stage, source } => {
                assert_eq!(stage, Stage::Translate);
                assert!(matches!(*source, AutokrError::ArtifactSchema { .. }));
            }
            other => panic!("expected a stage error, got {:?}", other),
        }
        // The recognition output survives for the next attempt.
        assert!(harness.workspace("talk.mp4").recognition_path().exists());
    }

    #[tokio::test]
    async fn successful_exit_without_artifact_is_a_schema_error() {
        let harness = Harness::new("exit 0", TRANSLATE_OK);
        let err = harness
            .pipeline()
            .run(&harness.request("talk.mp4", SubtitleFormat::Srt))
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("artifact was not written"));
    }

    #[tokio::test]
    async fn unlaunchable_worker_fails_recognition() {
        let harness = Harness::new(RECOGNIZE_OK, TRANSLATE_OK);

        let err = harness
            .pipeline()
            .with_launcher(WorkerLauncher::new("/nonexistent/autokr"))
            .run(&harness.request("talk.mp4", SubtitleFormat::Srt))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("Failed to launch recognize worker"));
    }

    #[tokio::test]
    async fn hung_worker_times_out() {
        let mut harness = Harness::new(RECOGNIZE_OK, "exec sleep 30");
        harness.config.pipeline.stage_timeout_secs = Some(1);

        let err = harness
            .pipeline()
            .run(&harness.request("talk.mp4", SubtitleFormat::Srt))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 5);
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn cancelled_run_takes_the_worker_down() {
        let hanging = r#"echo $$ > "$dir/worker.pid"
sleep 30 &
echo $! > "$dir/child.pid"
wait"#;
        let harness = Harness::new(hanging, TRANSLATE_OK);
        let request = harness.request("talk.mp4", SubtitleFormat::Srt);
        let dir = harness.workspace("talk.mp4").dir().to_path_buf();
        let pipeline = harness.pipeline();

        let started = async {
            while !dir.join("child.pid").exists() || !dir.join("worker.pid").exists() {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            // Give the shell time to finish writing the pid.
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        };
        tokio::select! {
            result = pipeline.run(&request) => panic!("run finished early: {:?}", result.map(|r| r.output_path)),
            _ = tokio::time::timeout(std::time::Duration::from_secs(10), started) => {}
        }

        assert!(exits_soon(read_pid(&dir.join("worker.pid"))).await);
        assert!(exits_soon(read_pid(&dir.join("child.pid"))).await);
        assert!(!dir.join("recognition.json").exists());
    }

    #[tokio::test]
    async fn killed_worker_leaves_no_partial_artifact() {
        let dying = r#"printf '{"segments":[{"start":0.0,' > "$dir/.autokr-kill.partial"
kill -9 $$"#;
        let harness = Harness::new(dying, TRANSLATE_OK);
        let request = harness.request("talk.mp4", SubtitleFormat::Srt);

        let err = harness.pipeline().run(&request).await.unwrap_err();
        assert_eq!(err.exit_code(), 4);
        let workspace = harness.workspace("talk.mp4");
        assert!(!workspace.recognition_path().exists());

        // The next invocation resumes from the extracted audio.
        let harness = harness.with_workers(RECOGNIZE_OK, TRANSLATE_OK);
        let report = harness.pipeline().run(&request).await.unwrap();
        assert_eq!(report.outcome(Stage::Extract), Some(StageOutcome::Reused));
        assert_eq!(harness.extractions.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_to_string(&request.output_path).unwrap(), EXPECTED_SRT);
    }

    #[tokio::test]
    async fn invalid_recognition_artifact_is_recomputed() {
        let harness = Harness::new(RECOGNIZE_OK, TRANSLATE_OK);
        let workspace = harness.workspace("talk.mp4");
        std::fs::write(workspace.recognition_path(), "{\"segments\": [").unwrap();

        let report = harness
            .pipeline()
            .run(&harness.request("talk.mp4", SubtitleFormat::Srt))
            .await
            .unwrap();
        assert_eq!(report.outcome(Stage::Recognize), Some(StageOutcome::Executed));
        assert_eq!(harness.worker_calls(), vec!["recognize", "translate"]);
    }

    #[tokio::test]
    async fn recognition_from_another_model_is_recomputed() {
        let harness = Harness::new(RECOGNIZE_OK, TRANSLATE_OK);
        let workspace = harness.workspace("talk.mp4");
        write_artifact(&workspace.recognition_path(), &recognized().with_model("tiny")).unwrap();

        harness
            .pipeline()
            .run(&harness.request("talk.mp4", SubtitleFormat::Srt))
            .await
            .unwrap();
        assert_eq!(harness.worker_calls(), vec!["recognize", "translate"]);
    }

    #[tokio::test]
    async fn mismatched_translation_artifact_is_recomputed() {
        let harness = Harness::new("exit 1", TRANSLATE_OK);
        let workspace = harness.workspace("talk.mp4");
        write_artifact(&workspace.recognition_path(), &recognized()).unwrap();
        let stale = Artifact::new(vec![Segment::new(0.0, 1.0, "다른")]).with_language("ko");
        write_artifact(&workspace.translation_path(), &stale).unwrap();

        let report = harness
            .pipeline()
            .run(&harness.request("talk.mp4", SubtitleFormat::Srt))
            .await
            .unwrap();
        assert_eq!(report.outcome(Stage::Translate), Some(StageOutcome::Executed));
        assert_eq!(harness.worker_calls(), vec!["translate"]);
    }

    #[tokio::test]
    async fn retained_artifacts_make_a_rerun_free() {
        let mut harness = Harness::new(RECOGNIZE_OK, TRANSLATE_OK);
        harness.config.pipeline.keep_audio = true;
        harness.config.pipeline.keep_artifacts = true;
        let request = harness.request("talk.mp4", SubtitleFormat::Srt);

        let first = harness.pipeline().run(&request).await.unwrap();
        let workspace = RunWorkspace::new(first.workspace.clone());
        assert!(workspace.has_audio());
        assert!(workspace.recognition_path().exists());
        assert!(workspace.translation_path().exists());
        let first_bytes = std::fs::read(&request.output_path).unwrap();

        let second = harness.pipeline().run(&request).await.unwrap();
        assert_eq!(second.outcome(Stage::Extract), Some(StageOutcome::Skipped));
        assert_eq!(second.outcome(Stage::Recognize), Some(StageOutcome::Reused));
        assert_eq!(second.outcome(Stage::Translate), Some(StageOutcome::Reused));
        assert_eq!(harness.worker_calls(), vec!["recognize", "translate"]);
        assert_eq!(std::fs::read(&request.output_path).unwrap(), first_bytes);
    }

    #[tokio::test]
    async fn extraction_failure_stops_the_run() {
        let harness = Harness::new(RECOGNIZE_OK, TRANSLATE_OK);
        let err = harness
            .pipeline_with_extractor(true)
            .run(&harness.request("talk.mp4", SubtitleFormat::Srt))
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 3);
        assert!(harness.worker_calls().is_empty());
    }

    #[tokio::test]
    async fn missing_video_is_reported() {
        let harness = Harness::new(RECOGNIZE_OK, TRANSLATE_OK);
        let request = PipelineRequest {
            video_path: harness.dir.path().join("absent.mp4"),
            output_path: harness.dir.path().join("absent.srt"),
            format: SubtitleFormat::Srt,
        };
        let err = harness.pipeline().run(&request).await.unwrap_err();
        assert!(matches!(err, AutokrError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn smi_output_uses_target_language_class() {
        let harness = Harness::new(RECOGNIZE_OK, TRANSLATE_OK);
        let request = harness.request("talk.mp4", SubtitleFormat::Smi);

        harness.pipeline().run(&request).await.unwrap();

        let smi = std::fs::read_to_string(&request.output_path).unwrap();
        assert!(request.output_path.ends_with("talk.smi"));
        assert!(smi.contains("<SYNC Start=0>\n<P Class=KOCC>안녕</P>"));
        assert!(smi.contains("<SYNC Start=2500>\n<P Class=KOCC>하세요</P>"));
    }

    #[tokio::test]
    async fn independent_videos_run_concurrently() {
        let harness = Harness::new(RECOGNIZE_OK, TRANSLATE_OK);
        let pipeline = harness.pipeline();
        let first = harness.request("first.mp4", SubtitleFormat::Srt);
        let second = harness.request("second.mp4", SubtitleFormat::Srt);

        let (a, b) = tokio::join!(pipeline.run(&first), pipeline.run(&second));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.workspace, b.workspace);
        assert_eq!(a.workspace, pipeline.store().namespace_for(&first.video_path).unwrap());
        assert_eq!(std::fs::read_to_string(&first.output_path).unwrap(), EXPECTED_SRT);
        assert_eq!(std::fs::read_to_string(&second.output_path).unwrap(), EXPECTED_SRT);
        assert_eq!(harness.extractions.load(Ordering::SeqCst), 2);
        assert_eq!(harness.worker_calls().len(), 4);
    }
}
