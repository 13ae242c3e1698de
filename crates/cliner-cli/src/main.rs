//! CliNER CLI - Command-line interface
//!
//! Usage:
//!   cliner train --txt <dir> --annotations <dir> --model <path>
//!   cliner predict --txt <dir> --model <path> --out <dir>
//!   cliner evaluate --predictions <dir> --gold <dir> --txt <dir>
//!   cliner format --txt <dir> --annotations <dir> --out <dir>

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use cliner_core::{CliNerConfig, LoggingConfig};
use cliner_model::{EvaluationReport, Evaluator, FeatureExtractor, Model};
use cliner_notes::corpus::note_name;
use cliner_notes::{list_files, load_annotated, reformat_notes, I2b2Format, NoteFormat};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cliner")]
#[command(about = "Clinical named entity recognition")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model on annotated notes
    Train {
        /// Text file or directory of .txt notes
        #[arg(long)]
        txt: PathBuf,
        /// Directory of .con annotation files
        #[arg(long)]
        annotations: PathBuf,
        /// Where to write the trained model
        #[arg(long)]
        model: PathBuf,
        /// Cross-validated hyperparameter search
        #[arg(long)]
        grid: bool,
        /// Use the flat learner for span detection
        #[arg(long)]
        no_crf: bool,
        /// Train the multi-span linking pass
        #[arg(long)]
        third: bool,
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Extract concepts from notes
    Predict {
        /// Text file or directory of .txt notes
        #[arg(long)]
        txt: PathBuf,
        /// Trained model
        #[arg(long)]
        model: PathBuf,
        /// Output directory for .con files
        #[arg(long)]
        out: PathBuf,
        /// Merge spans with the linking pass
        #[arg(long)]
        third: bool,
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Score predicted concepts against gold annotations
    Evaluate {
        /// Directory of predicted .con files
        #[arg(long)]
        predictions: PathBuf,
        /// Directory of gold .con files
        #[arg(long)]
        gold: PathBuf,
        /// Text file or directory of .txt notes
        #[arg(long)]
        txt: PathBuf,
        /// Require exact span matches
        #[arg(long)]
        strict: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rewrite annotation files as validated, normalized i2b2 records
    Format {
        /// Text file or directory of .txt notes
        #[arg(long)]
        txt: PathBuf,
        /// Directory of .con annotation files
        #[arg(long)]
        annotations: PathBuf,
        /// Output directory for rewritten .con files
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Commands::Train { config, .. } | Commands::Predict { config, .. } => config.clone(),
        Commands::Evaluate { .. } | Commands::Format { .. } => None,
    };
    let config = load_config(config_path.as_deref())?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Train {
            txt,
            annotations,
            model,
            grid,
            no_crf,
            third,
            ..
        } => {
            let mut config = config;
            config.pipeline.grid_search |= grid;
            config.pipeline.third_pass |= third;
            if no_crf {
                config.pipeline.sequence_mode = false;
            }
            train(&config, &txt, &annotations, &model)
        }
        Commands::Predict {
            txt,
            model,
            out,
            third,
            ..
        } => predict(&config, &txt, &model, &out, third || config.pipeline.third_pass),
        Commands::Evaluate {
            predictions,
            gold,
            txt,
            strict,
            json,
        } => evaluate(&txt, &gold, &predictions, strict, json),
        Commands::Format { txt, annotations, out } => {
            let written = reformat_notes(&I2b2Format::new(), &txt, &annotations, &out)?;
            println!("Rewrote {written} annotation files into {}", out.display());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CliNerConfig> {
    let config = match path {
        Some(path) => CliNerConfig::from_file(path)?.with_env_override()?,
        None => CliNerConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn train(config: &CliNerConfig, txt: &Path, annotations: &Path, model_path: &Path) -> anyhow::Result<()> {
    let format = I2b2Format::new();
    let notes = load_annotated(&format, txt, annotations)?;
    if notes.is_empty() {
        anyhow::bail!(
            "no annotated notes found under {} with annotations in {}",
            txt.display(),
            annotations.display()
        );
    }
    let documents: Vec<_> = notes.into_iter().map(|n| n.document).collect();

    let mut model = Model::from_config(config)?;
    model.train(&documents, config.pipeline.grid_search, config.pipeline.third_pass)?;
    model
        .save(model_path)
        .with_context(|| format!("saving model to {}", model_path.display()))?;

    println!("Trained on {} notes, model written to {}", documents.len(), model_path.display());
    Ok(())
}

fn predict(config: &CliNerConfig, txt: &Path, model_path: &Path, out: &Path, third: bool) -> anyhow::Result<()> {
    let extractor = FeatureExtractor::from_config(&config.features)?;
    let model = Model::load_with(model_path, extractor)
        .with_context(|| format!("loading model from {}", model_path.display()))?;

    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let format = I2b2Format::new();
    let files = list_files(txt, "txt")?;

    for file in &files {
        let document = format.read(file, None)?;
        let concepts = model.predict(&document, third)?;

        let target = out.join(format!("{}.{}", note_name(file), format.annotation_extension()));
        format.write(&target, &document, &concepts)?;
        info!(note = %file.display(), concepts = concepts.len(), out = %target.display(), "Wrote predictions");
    }

    println!("Predicted {} notes into {}", files.len(), out.display());
    Ok(())
}

fn evaluate(txt: &Path, gold: &Path, predictions: &Path, strict: bool, json: bool) -> anyhow::Result<()> {
    let format = I2b2Format::new();
    let evaluator = if strict { Evaluator::new().strict() } else { Evaluator::new() };
    let mut report = EvaluationReport::default();

    for gold_note in load_annotated(&format, txt, gold)? {
        let predicted_path = predictions.join(format!("{}.{}", gold_note.name, format.annotation_extension()));
        if !predicted_path.is_file() {
            warn!(note = %gold_note.name, "No predictions for note, counting as empty");
        }
        let predicted = if predicted_path.is_file() {
            format.read(&gold_note.txt, Some(&predicted_path))?
        } else {
            format.read(&gold_note.txt, None)?
        };

        report.merge(&evaluator.evaluate(predicted.concepts(), gold_note.document.concepts()));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.report());
    }
    Ok(())
}
