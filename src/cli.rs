use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::view::extract::DEFAULT_IMPORTANCE_FLOOR;
use crate::view::{DEFAULT_MIN_FEATURE_COUNT, DEFAULT_MIN_ROW_COUNT, DEFAULT_PRIMARY_LIMIT};

#[derive(Parser, Debug)]
#[command(
    name = "reportgov",
    version,
    about = "Compose governed, trust-scored view models from analysis pipeline artifacts"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Compose(ComposeArgs),
    Guidance(GuidanceArgs),
    Status(StatusArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Full,
    Summary,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Summary => "summary",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ComposeArgs {
    #[arg(long = "run-dir", required = true)]
    pub run_dirs: Vec<PathBuf>,

    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long)]
    pub cache_db: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Full)]
    pub format: OutputFormat,

    #[arg(long, default_value_t = DEFAULT_PRIMARY_LIMIT)]
    pub primary_limit: usize,

    #[arg(long, default_value_t = DEFAULT_MIN_ROW_COUNT)]
    pub min_rows: u64,

    #[arg(long, default_value_t = DEFAULT_MIN_FEATURE_COUNT)]
    pub min_features: u64,

    #[arg(long, default_value_t = DEFAULT_IMPORTANCE_FLOOR)]
    pub importance_floor: f64,
}

#[derive(Args, Debug, Clone)]
pub struct GuidanceArgs {
    #[arg(long = "code", required = true)]
    pub codes: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/reportgov/views.sqlite")]
    pub cache_db: PathBuf,
}
