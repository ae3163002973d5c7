use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use articulyzer::config::PipelineConfig;
use articulyzer::pipeline;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Articulyzer - phoneme pronunciation classifier
///
/// Extracts MFCC features from a labelled dataset, trains a bank of classical
/// models and compares them on the held-out split.
#[derive(Parser, Debug)]
#[command(name = "articulyzer")]
#[command(version = "0.1.0")]
#[command(about = "Phoneme pronunciation classifier", long_about = None)]
struct Args {
    /// Dataset root containing Train/ and Test/ label folders
    #[arg(value_name = "DATA_ROOT")]
    data_root: PathBuf,

    /// JSON pipeline configuration; missing fields take defaults
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the target sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Override the number of cepstral coefficients
    #[arg(long)]
    n_mfcc: Option<usize>,

    /// Override the fixed frame count
    #[arg(long)]
    max_len: Option<usize>,

    /// Worker threads for extraction and training
    #[arg(long)]
    jobs: Option<usize>,

    /// Seed for every randomised learner
    #[arg(long)]
    seed: Option<u64>,

    /// Write the full evaluation as JSON to this path
    #[arg(long, value_name = "PATH")]
    report_json: Option<PathBuf>,
}

impl Args {
    fn validate(&self) -> Result<()> {
        if !self.data_root.exists() {
            bail!("Dataset root does not exist: {:?}", self.data_root);
        }
        if !self.data_root.is_dir() {
            bail!("Dataset root is not a directory: {:?}", self.data_root);
        }
        if self.sample_rate == Some(0) {
            bail!("Sample rate must be positive");
        }
        if self.n_mfcc == Some(0) || self.max_len == Some(0) {
            bail!("n_mfcc and max_len must be positive");
        }
        if self.jobs == Some(0) {
            bail!("Job count must be positive");
        }
        if let Some(path) = &self.report_json {
            if path.is_dir() {
                bail!("Report path is a directory: {:?}", path);
            }
        }
        Ok(())
    }

    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(rate) = self.sample_rate {
            config.features.sample_rate = rate;
        }
        if let Some(n_mfcc) = self.n_mfcc {
            config.features.n_mfcc = n_mfcc;
        }
        if let Some(max_len) = self.max_len {
            config.features.max_len = max_len;
        }
        if let Some(seed) = self.seed {
            config.bank.seed = seed;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    args.validate()
        .context("Failed to validate command-line arguments")?;
    let config = args
        .pipeline_config()
        .context("Failed to load pipeline configuration")?;

    if let Some(jobs) = args.jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .context("Failed to initialise worker pool")?;
        info!(jobs, "worker pool initialised");
    }

    println!("Articulyzer v0.1.0 - Phoneme Pronunciation Classifier");
    println!("Dataset root: {:?}", args.data_root);

    let report = pipeline::run(&args.data_root, &config).context("Classification run failed")?;

    if let Some(path) = &args.report_json {
        report.write_json(path)?;
        println!("Report written to {:?}", path);
    }
    Ok(())
}
