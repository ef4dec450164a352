#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process;

use staywise::batch::predict_file;
use staywise::bundle::DiskLoader;
use staywise::check::coverage;
use staywise::config::PredictorConfig;
use staywise::files::read_text_input;
use staywise::registry::{combine_manifests, read_manifest, write_manifest};
use staywise::types::{PredictionRequest, PredictionResponse};

/// Where the service artifacts live. Flags override values from `--config`.
#[derive(Args)]
pub struct ServiceArgs {
    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory that manifest bundle paths are resolved against
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Manifest CSV with `features` and `model_path` columns
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Diagnosis to procedure lookup CSV
    #[arg(long, value_name = "PATH")]
    pub diagnosis_table: Option<PathBuf>,

    /// Procedure description CSV
    #[arg(long, value_name = "PATH")]
    pub description_table: Option<PathBuf>,

    /// Number of ranked procedures returned for a diagnosis
    #[arg(long, value_name = "N")]
    pub max_results: Option<usize>,

    /// Deserialize bundles on every request instead of caching them
    #[arg(long)]
    pub no_cache: bool,
}

impl ServiceArgs {
    fn resolve(&self) -> Result<PredictorConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => PredictorConfig::load(path)?,
            None => PredictorConfig::default(),
        };
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        if let Some(manifest) = &self.manifest {
            config.manifest = manifest.clone();
        }
        if let Some(table) = &self.diagnosis_table {
            config.diagnosis_table = table.clone();
        }
        if let Some(table) = &self.description_table {
            config.description_table = table.clone();
        }
        if let Some(n) = self.max_results {
            config.max_results = n;
        }
        if self.no_cache {
            config.cache_bundles = false;
        }
        Ok(config)
    }
}

#[derive(Parser)]
#[command(
    name = "staywise",
    about = "Hospital stay cost, length of stay and mortality prediction",
    long_about = "Routes each prediction request to the model bundle trained for exactly the \
                 fields the request provides, and ranks candidate procedures for a diagnosis."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict a single JSON request
    #[command(about = "Predict one JSON request (stdin by default)")]
    Predict {
        #[command(flatten)]
        service: ServiceArgs,

        /// JSON request file, or `-` for standard input
        #[arg(long, value_name = "PATH")]
        request: Option<PathBuf>,
    },

    /// Predict every row of a CSV file in direct procedure mode
    #[command(about = "Predict a CSV of encounters (outputs: predictions.csv)")]
    Batch {
        #[command(flatten)]
        service: ServiceArgs,

        /// CSV with one encounter per row, columns named as in training
        #[arg(value_name = "INPUT_CSV")]
        input: PathBuf,

        #[arg(long, value_name = "PATH", default_value = "predictions.csv")]
        out: PathBuf,
    },

    /// Verify that every expected feature set has a loadable bundle
    #[command(about = "Check bundle coverage of the manifest")]
    Check {
        #[command(flatten)]
        service: ServiceArgs,
    },

    /// Merge the manifests of several training runs, keeping the best-scoring bundle
    #[command(about = "Combine training-run manifests by score")]
    Combine {
        #[arg(value_name = "MANIFEST", required = true)]
        manifests: Vec<PathBuf>,

        #[arg(long, value_name = "PATH", default_value = "model_paths.csv")]
        out: PathBuf,
    },

    /// Display version and build information
    #[command(about = "Display version and build information")]
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Predict { service, request }) => run_predict(&service, request),
        Some(Commands::Batch {
            service,
            input,
            out,
        }) => run_batch(&service, input, out),
        Some(Commands::Check { service }) => run_check(&service),
        Some(Commands::Combine { manifests, out }) => run_combine(manifests, out),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => {
            let _ = Cli::command().print_help();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_predict(
    service: &ServiceArgs,
    request: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let predictor = service.resolve()?.build_predictor()?;
    let text = read_text_input(request.as_deref())?;
    let request: PredictionRequest = serde_json::from_str(&text)?;

    let response = predictor.respond(&request);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &response)?;
    writeln!(out)?;

    match response {
        PredictionResponse::Error { error } => Err(error.into()),
        _ => Ok(()),
    }
}

fn run_batch(
    service: &ServiceArgs,
    input: PathBuf,
    out: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let predictor = service.resolve()?.build_predictor()?;
    eprintln!("Predicting rows of {}", input.display());
    let summary = predict_file(&predictor, &input, &out)?;
    println!(
        "{} of {} rows predicted ({} failed, {} skipped). Results saved to: {}",
        summary.predicted,
        summary.total(),
        summary.failed,
        summary.skipped,
        out.display()
    );
    Ok(())
}

fn run_check(service: &ServiceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = service.resolve()?;
    let registry = config.build_registry()?;
    let report = coverage(&registry, &DiskLoader);
    println!("{report}");
    if report.is_complete() {
        Ok(())
    } else {
        Err(format!(
            "{} expected feature sets have no usable bundle",
            report.failures()
        )
        .into())
    }
}

fn run_combine(manifests: Vec<PathBuf>, out: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mut runs = Vec::with_capacity(manifests.len());
    for path in &manifests {
        println!("Loading manifest from: {}", path.display());
        runs.push(read_manifest(path)?);
    }

    let combined = combine_manifests(&runs);
    write_manifest(&out, &combined)?;
    println!(
        "Combined {} manifests into {} feature sets. Saved to: {}",
        manifests.len(),
        combined.len(),
        out.display()
    );
    Ok(())
}

/// Format seconds into a human-readable duration like "2.4 hours ago"
fn format_duration_ago(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    if seconds < MINUTE {
        format!("{seconds} seconds ago")
    } else if seconds < HOUR {
        format!("{:.1} minutes ago", seconds as f64 / MINUTE as f64)
    } else if seconds < DAY {
        format!("{:.1} hours ago", seconds as f64 / HOUR as f64)
    } else {
        format!("{:.1} days ago", seconds as f64 / DAY as f64)
    }
}

fn print_version_info() {
    let version = env!("CARGO_PKG_VERSION");
    let release_tag = option_env!("STAYWISE_RELEASE_TAG");
    let build_timestamp: u64 = option_env!("STAYWISE_BUILD_TIMESTAMP")
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);

    println!("staywise {version}");

    match release_tag {
        Some(tag) => println!("Release: {tag}"),
        None => println!("Release: development build"),
    }

    if build_timestamp > 0 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if now > build_timestamp {
            println!("Built: {}", format_duration_ago(now - build_timestamp));
        } else {
            println!("Built: just now");
        }
    }
}

