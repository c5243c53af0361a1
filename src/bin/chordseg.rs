use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chordseg_lib::audio::load_waveform;
use chordseg_lib::config::PipelineConfig;
use chordseg_lib::features::{FeatureExtractor, FeatureLayout};
use chordseg_lib::pipeline::{InferenceContext, PipelineError, TraceWriter};
use chordseg_lib::state::{DirectoryStore, WavSegmentStore};
use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "chordseg",
    about = "Segment guitar recordings into chord events and classify them"
)]
struct Cli {
    /// Pipeline configuration JSON (defaults are used for missing fields)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify every chord event in an audio file and print JSON results
    Classify {
        audio: PathBuf,
        /// Directory holding model.json, scaler.json, labels.json (and optionally manifest.json)
        #[arg(long)]
        artifacts: PathBuf,
        /// Store each segment as WAV in this directory
        #[arg(long)]
        segments_dir: Option<PathBuf>,
        /// Append a JSONL trace of the request to this file
        #[arg(long)]
        trace: Option<PathBuf>,
    },
    /// Print the whole-clip feature vector with its layout
    Features { audio: PathBuf },
}

#[derive(Serialize)]
struct FeatureReport {
    layout: FeatureLayout,
    values: Vec<f32>,
}

#[derive(Serialize)]
struct ErrorReport<'a> {
    kind: &'a str,
    message: String,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Classify {
            audio,
            artifacts,
            segments_dir,
            trace,
        } => run_classify(config, &audio, &artifacts, segments_dir, trace),
        Commands::Features { audio } => run_features(config, &audio),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn run_classify(
    mut config: PipelineConfig,
    audio: &Path,
    artifacts: &Path,
    segments_dir: Option<PathBuf>,
    trace: Option<PathBuf>,
) -> Result<ExitCode> {
    let bytes = fs::read(audio).with_context(|| format!("reading {}", audio.display()))?;

    if segments_dir.is_some() {
        config.persist_segments = true;
    }

    let store = DirectoryStore::new(artifacts);
    let mut context = InferenceContext::load(&store, config)
        .with_context(|| format!("loading artifacts from {}", artifacts.display()))?;

    if let Some(dir) = segments_dir {
        let segments = WavSegmentStore::new(&dir)
            .with_context(|| format!("creating segment directory {}", dir.display()))?;
        context = context.with_segment_store(Arc::new(segments));
    }
    if let Some(path) = trace {
        context = context.with_trace(TraceWriter::new(path));
    }

    match context.classify(&bytes) {
        Ok(results) => {
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(ExitCode::from(0))
        }
        Err(err) => emit_error(&err),
    }
}

fn emit_error(err: &PipelineError) -> Result<ExitCode> {
    let report = ErrorReport {
        kind: err.kind(),
        message: err.to_string(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::from(if err.is_client_error() { 2 } else { 1 }))
}

fn run_features(config: PipelineConfig, audio: &Path) -> Result<ExitCode> {
    let bytes = fs::read(audio).with_context(|| format!("reading {}", audio.display()))?;
    let waveform = load_waveform(&bytes, config.loader.sample_rate)
        .with_context(|| format!("decoding {}", audio.display()))?;

    let features = FeatureExtractor::new(config.extractor)
        .extract(&waveform.samples, waveform.sample_rate)
        .with_context(|| format!("extracting features from {}", audio.display()))?;

    let report = FeatureReport {
        layout: FeatureLayout::current(),
        values: features.into_inner(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::from(0))
}
