use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use crate::grading::GradingPolicy;

#[derive(Parser)]
#[command(name = "codegrade", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file (defaults apply when omitted)
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Directory whose immediate subdirectories are one submission per group
    #[arg(long = "submissions", short = 's')]
    pub submissions_dir: String,

    /// File to write the JSON batch report to (stdout when omitted)
    #[arg(long = "output", short = 'o')]
    pub output_path: Option<String>,

    /// Override the configured number of evaluation workers
    #[arg(long = "workers", short = 'w')]
    pub workers: Option<u8>,
}

impl CliArgs {
    /// Load the configuration, merging the CLI worker override on top.
    pub fn to_config(&self) -> Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => {
                let file = std::fs::File::open(path)
                    .with_context(|| format!("failed to open configuration file {path}"))?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader(reader)
                    .with_context(|| format!("invalid configuration file {path}"))?
            }
            None => Config::default(),
        };
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct Config {
    /// Number of concurrent evaluation workers.
    pub workers: u8,
    /// Deadline for one compiler invocation, in milliseconds.
    pub compile_timeout_ms: u64,
    /// Byte budget for each captured output stream.
    pub output_cap_bytes: usize,
    pub grading: GradingPolicy,
    /// Per-language overrides and additions, merged over the built-ins.
    pub languages: Vec<LanguageProfileConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 4,
            compile_timeout_ms: 30_000,
            output_cap_bytes: 64 * 1024,
            grading: GradingPolicy::default(),
            languages: Vec::new(),
        }
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.workers > 0, "the number of workers must not be 0");
        anyhow::ensure!(
            self.output_cap_bytes > 0,
            "the output byte cap must not be 0"
        );
        self.grading.weights.normalized()?;
        Ok(())
    }
}

/// One language entry in the configuration file. A known name patches the
/// built-in profile field by field; an unknown name declares a new language.
#[derive(Deserialize, Debug, Clone)]
pub struct LanguageProfileConfig {
    pub name: String,
    pub extensions: Option<Vec<String>>,
    pub entry_names: Option<Vec<String>>,
    pub compile_command: Option<Vec<String>>,
    pub run_command: Option<Vec<String>>,
    pub run_timeout_ms: Option<u64>,
    pub memory_limit_kb: Option<u64>,
    pub hard_address_limit: Option<bool>,
    pub baseline_ms: Option<u64>,
}

/// Externally produced static-code and documentation sub-scores for one
/// group, read from an optional `scores.json` sidecar next to the sources.
/// The scorers themselves are outside this crate.
#[derive(Deserialize, Debug, Default, Clone, Copy)]
#[serde(default)]
pub struct ExternalScores {
    pub code: f64,
    pub documentation: f64,
}

pub const SCORES_SIDECAR: &str = "scores.json";

impl ExternalScores {
    /// Reads the sidecar from a submission directory; absent means 0/0 with
    /// a warning, since scoring is expected to have run beforehand.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SCORES_SIDECAR);
        if !path.exists() {
            log::warn!(
                "no {SCORES_SIDECAR} in {}, using zero external scores",
                dir.display()
            );
            return Ok(Self::default());
        }
        let file = std::fs::File::open(&path)?;
        let scores: Self = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("invalid {}", path.display()))?;
        Ok(scores)
    }
}
