//! AutoKR - translated subtitles for video files
//!
//! Extracts the audio with ffmpeg, recognizes speech with whisper.cpp,
//! translates it through Ollama and writes SRT or SAMI subtitles. The two
//! model stages run in worker processes started from this same binary.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use autokr::cli::{Args, Commands, WorkerStage};
use autokr::config::Config;
use autokr::error::AutokrError;
use autokr::pipeline::{Pipeline, PipelineReport, PipelineRequest};
use autokr::worker;

const INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(Commands::Worker { stage, job }) = &args.command {
        return run_worker(*stage, job, args.verbose).await;
    }

    if let Err(e) = setup_logging(args.verbose) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }
    info!("Starting AutoKR");

    tokio::select! {
        result = run(&args) => match result {
            Ok(report) => {
                for (stage, outcome) in &report.stages {
                    info!("{:<10} {}", stage, outcome);
                }
                println!("{}", report.output_path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{}", e);
                ExitCode::from(e.exit_code())
            }
        },
        _ = shutdown_signal() => {
            // Dropping the run kills the worker it was waiting on.
            warn!("Interrupted, stopping");
            ExitCode::from(INTERRUPTED)
        }
    }
}

async fn run(args: &Args) -> std::result::Result<PipelineReport, AutokrError> {
    let mut config = load_config(args.config.as_deref())?;
    args.apply_overrides(&mut config);
    config.validate()?;

    let video_path = args
        .input
        .clone()
        .ok_or_else(|| AutokrError::Config("--input is required".to_string()))?;
    let request = PipelineRequest {
        output_path: args.output_path(&video_path),
        video_path,
        format: args.format,
    };

    let pipeline = Pipeline::new(config)?;
    pipeline.run(&request).await
}

fn load_config(path: Option<&Path>) -> std::result::Result<Config, AutokrError> {
    match path {
        Some(path) => Config::from_file(path),
        None => {
            let local = PathBuf::from("autokr.toml");
            if local.exists() {
                info!("Found autokr.toml in current directory, loading...");
                Config::from_file(&local)
            } else {
                Ok(Config::default())
            }
        }
    }
}

async fn run_worker(stage: WorkerStage, job: &Path, verbose: bool) -> ExitCode {
    if let Err(e) = setup_worker_logging(verbose) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    let result = match stage {
        WorkerStage::Recognize => worker::run_recognition_worker(job).await,
        WorkerStage::Translate => worker::run_translation_worker(job).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn log_level(verbose: bool) -> Level {
    if verbose { Level::DEBUG } else { Level::INFO }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".autokr").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotation
    let file_appender = rolling::daily(&log_dir, "autokr.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let level = log_level(verbose);

    let console_layer = fmt::layer()
        .with_target(false)
        .with_file(verbose)
        .with_line_number(verbose);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        level,
        log_dir.join("autokr.log").display()
    );
    Ok(())
}

/// Workers log to stderr only; the pipeline captures and forwards it.
fn setup_worker_logging(verbose: bool) -> Result<()> {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .without_time();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level(verbose).into()))
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    Ok(())
}
