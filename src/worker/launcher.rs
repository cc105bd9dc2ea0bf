use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{AutokrError, Result};
use crate::pipeline::Stage;

/// Lines of worker output kept for the failure report
const TAIL_LINES: usize = 40;

/// How long output readers may drain after the worker is gone
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// Starts one worker process per heavy stage and waits for it.
///
/// The command line is `<program> <args..> worker <stage> --job <job file>`.
/// On unix the worker leads its own process group. The whole group is killed
/// whenever the launcher stops waiting on the worker, including when the run
/// itself is cancelled, so anything the worker started (whisper-cli) goes
/// with it.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl WorkerLauncher {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    /// Launcher described by the pipeline settings. Without an explicit
    /// program the workers are this executable.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let program = match &config.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };
        Ok(Self::new(program)
            .with_args(config.worker_args.clone())
            .with_timeout(config.stage_timeout_secs.map(Duration::from_secs)))
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, stage: Stage, job_path: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("worker")
            .arg(stage.label())
            .arg("--job")
            .arg(job_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        own_process_group(&mut command);
        command
    }

    /// Run the worker for `stage` to completion.
    ///
    /// Success only means the process exited with status 0. Whether it left a
    /// usable artifact behind is for the caller to check.
    pub async fn run(&self, stage: Stage, job_path: &Path) -> Result<()> {
        info!("Starting {} worker: {}", stage, self.program.display());
        debug!("Worker job file: {}", job_path.display());

        let mut child = self
            .command(stage, job_path)
            .spawn()
            .map_err(|source| AutokrError::WorkerLaunch { stage, source })?;
        let mut group = ProcessGroup::of(child.id());

        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| forward_lines(stdout, stage, false));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| forward_lines(stderr, stage, true));

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!("{} worker exceeded {}s, killing it", stage, limit.as_secs());
                    group.kill();
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill {} worker: {}", stage, e);
                    }
                    // Descendants may still hold the pipes open.
                    for task in [stdout_task, stderr_task].into_iter().flatten() {
                        task.abort();
                    }
                    return Err(AutokrError::WorkerTimeout {
                        stage,
                        seconds: limit.as_secs(),
                    });
                }
            },
            None => child.wait().await?,
        };

        // Leftover descendants would keep the pipes open.
        group.kill();
        let stdout_tail = collect_tail(stdout_task).await;
        let stderr_tail = collect_tail(stderr_task).await;

        if !status.success() {
            let diagnostics = if stderr_tail.is_empty() {
                stdout_tail
            } else {
                stderr_tail
            };
            return Err(AutokrError::WorkerFailure {
                stage,
                status: status.to_string(),
                diagnostics: diagnostics.into_iter().collect::<Vec<_>>().join("\n"),
            });
        }

        info!("{} worker finished", stage);
        Ok(())
    }
}

/// Mirror a worker stream into the log and keep its last lines.
fn forward_lines<R>(reader: R, stage: Stage, is_stderr: bool) -> JoinHandle<VecDeque<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut tail = VecDeque::with_capacity(TAIL_LINES);
        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                info!("[{} worker] {}", stage, line);
            } else {
                debug!("[{} worker stdout] {}", stage, line);
            }
            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail
    })
}

async fn collect_tail(task: Option<JoinHandle<VecDeque<String>>>) -> VecDeque<String> {
    let Some(mut task) = task else {
        return VecDeque::new();
    };
    match tokio::time::timeout(OUTPUT_GRACE, &mut task).await {
        Ok(tail) => tail.unwrap_or_default(),
        Err(_) => {
            warn!("Worker output still open after the worker exited, dropping it");
            task.abort();
            VecDeque::new()
        }
    }
}

/// The worker's process group, killed on drop.
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    fn of(leader: Option<u32>) -> Self {
        Self(leader)
    }

    fn kill(&mut self) {
        if let Some(leader) = self.0.take() {
            kill_process_group(leader);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn own_process_group(command: &mut Command) {
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut Command) {}

#[cfg(unix)]
fn kill_process_group(leader: u32) {
    let Ok(pgid) = libc::pid_t::try_from(leader) else {
        return;
    };
    // SAFETY: killpg takes no pointers; the group id is the worker's pid
    // because it was spawned with process_group(0).
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("Failed to kill worker process group {}: {}", pgid, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_leader: u32) {}
