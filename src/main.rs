// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Recidivism pipeline CLI
//!
//! Usage:
//!   recidivism-eval preprocess --raw compas-scores-two-years.csv
//!   recidivism-eval train --seed 42
//!   recidivism-eval validate --threshold 0.1
//!   recidivism-eval --config pipeline.toml run
//!
//! Exit codes: 0 on success or a passed fairness gate, 1 on a failed gate or
//! a missing input file, 2 on any other error.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recidivism_eval::pipeline::{Pipeline, TrainingReport, ValidationReport};
use recidivism_eval::preprocess::PreprocessSummary;
use recidivism_eval::{PipelineConfig, PipelineError};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "recidivism-eval")]
#[command(about = "Train a recidivism classifier and gate it on demographic parity")]
#[command(version)]
struct Args {
    /// TOML configuration file (defaults are used for absent keys)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Random seed for the split and the forest
    #[arg(short, long, global = true)]
    seed: Option<u64>,

    /// Maximum tolerated demographic parity difference
    #[arg(short, long, global = true)]
    threshold: Option<f64>,

    /// Fraction of rows held out for testing
    #[arg(long, global = true)]
    test_size: Option<f64>,

    /// Raw COMPAS export
    #[arg(long, global = true)]
    raw: Option<PathBuf>,

    /// Cleaned dataset path
    #[arg(long, global = true)]
    processed: Option<PathBuf>,

    /// Model artifact path
    #[arg(short, long, global = true)]
    model: Option<PathBuf>,

    /// Output directory for reports
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Filter the raw export into the cleaned dataset
    Preprocess,
    /// Train the model and save the artifact
    Train,
    /// Run the fairness gate on the held-out rows
    Validate,
    /// Preprocess, train and validate
    Run,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(seed) = args.seed {
        config.split.seed = seed;
        config.model.seed = seed;
    }
    if let Some(threshold) = args.threshold {
        config.fairness_threshold = threshold;
    }
    if let Some(test_size) = args.test_size {
        config.split.held_out_fraction = test_size;
    }
    if let Some(raw) = &args.raw {
        config.raw_data_path = raw.clone();
    }
    if let Some(processed) = &args.processed {
        config.processed_data_path = processed.clone();
    }
    if let Some(model) = &args.model {
        config.model_path = model.clone();
    }
    if let Some(output) = &args.output {
        config.report_dir = output.clone();
    }
    Ok(config)
}

fn print_preprocess(summary: &PreprocessSummary) {
    println!("\n{}", "=".repeat(70));
    println!("PREPROCESSING");
    println!("{}", "=".repeat(70));
    println!("Raw rows: {}", summary.raw_rows);
    for (filter, remaining) in &summary.remaining_after {
        println!("  {:<50} {:>8}", filter, remaining);
    }
    println!("Rows written: {}", summary.written_rows);
    println!("Columns: {}", summary.columns.join(", "));
}

fn print_training(report: &TrainingReport) {
    println!("\n{}", "=".repeat(70));
    println!("TRAINING");
    println!("{}", "=".repeat(70));
    println!(
        "Rows: {} (train={}, test={})",
        report.total_rows, report.train_rows, report.test_rows
    );
    println!("Model accuracy on test data: {:.4}", report.classification.accuracy);
    println!("Majority baseline accuracy:  {:.4}", report.baseline_accuracy);
    println!("\n{}", report.classification.format());
    println!("Model saved to: {}", report.model_path.display());
}

fn print_validation(report: &ValidationReport) {
    println!("\n{}", "=".repeat(70));
    println!("FAIRNESS VALIDATION");
    println!("{}", "=".repeat(70));
    println!("{:<25} {:>8} {:>15}", "Group", "Rows", "Selection rate");
    println!("{:-<70}", "");
    for group in &report.verdict.groups {
        println!("{:<25} {:>8} {:>15.4}", group.group, group.rows, group.rate);
    }
    println!("{:-<70}", "");
    println!(
        "Demographic Parity Difference (Recidivism Prediction Rate): {:.4}",
        report.verdict.difference
    );
    println!("{}", report.verdict.status_line());
}

fn save_validation(report: &ValidationReport, dir: &Path) -> Result<()> {
    let timestamp = report.timestamp.format("%Y%m%d_%H%M%S");

    let json_path = dir.join(format!("fairness_{}.json", timestamp));
    Pipeline::save_report(report, &json_path)?;
    println!("\nJSON report saved to: {}", json_path.display());

    let md_path = dir.join(format!("fairness_{}.md", timestamp));
    std::fs::write(&md_path, Pipeline::generate_report(report))
        .with_context(|| format!("writing {}", md_path.display()))?;
    println!("Markdown report saved to: {}", md_path.display());
    Ok(())
}

fn save_training(report: &TrainingReport, dir: &Path) -> Result<()> {
    let path = dir.join(format!("training_{}.json", report.timestamp.format("%Y%m%d_%H%M%S")));
    Pipeline::save_report(report, &path)?;
    println!("Training report saved to: {}", path.display());
    Ok(())
}

/// Run the selected stage and return the process exit code
fn execute(args: Args) -> Result<i32> {
    let config = load_config(&args)?;
    let report_dir = config.report_dir.clone();
    let pipeline = Pipeline::new(config)?;

    tracing::info!("Recidivism Fairness Pipeline");
    tracing::info!("============================");
    tracing::info!("Seed: {}", pipeline.config().split.seed);
    tracing::info!("Threshold: {}", pipeline.config().fairness_threshold);

    match args.command {
        Command::Preprocess => {
            print_preprocess(&pipeline.preprocess()?);
            Ok(0)
        }
        Command::Train => {
            let report = pipeline.train()?;
            print_training(&report);
            save_training(&report, &report_dir)?;
            Ok(0)
        }
        Command::Validate => {
            let report = pipeline.validate()?;
            print_validation(&report);
            save_validation(&report, &report_dir)?;
            Ok(if report.passed() { 0 } else { 1 })
        }
        Command::Run => {
            let report = pipeline.run()?;
            print_preprocess(&report.preprocess);
            print_training(&report.training);
            print_validation(&report.validation);
            save_training(&report.training, &report_dir)?;
            save_validation(&report.validation, &report_dir)?;
            Ok(if report.validation.passed() { 0 } else { 1 })
        }
    }
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let code = match execute(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            err.downcast_ref::<PipelineError>().map_or(2, PipelineError::exit_code)
        }
    };
    std::process::exit(code);
}
