use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "The atmoflux developers",
    version,
    about = "atmoflux CLI - Atmospheric neutrino flux maps, event weighting and post-processing of hypothesis-testing scans.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel spline evaluation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Turn Asimov injected-parameter scan logs into significance, minimiser and best-fit plot descriptions.
    Postprocess(PostprocessArgs),
    /// Evaluate Honda flux maps on a binning and write them as a CSV table.
    Flux(FluxArgs),
    /// Load events, run the flux and HNL weighting stages and write the weighted events.
    Weights(WeightsArgs),
}

/// Arguments for the `postprocess` subcommand.
#[derive(Args, Debug)]
pub struct PostprocessArgs {
    // --- Inputs ---
    /// Log directory of an injected-parameter scan. Repeat to overlay several scans.
    #[arg(short, long = "dir", required = true, value_name = "PATH")]
    pub dirs: Vec<String>,

    /// Legend label per directory. Give one per directory or none.
    #[arg(long = "dir-label", value_name = "LABEL")]
    pub dir_labels: Vec<String>,

    // --- Labelling ---
    /// Detector name used in titles and file names.
    #[arg(long, default_value = "", value_name = "NAME")]
    pub detector: String,

    /// Event selection name used in titles and file names.
    #[arg(long, default_value = "", value_name = "NAME")]
    pub selection: String,

    /// Units of the injected parameter. Derived from the fits when omitted.
    #[arg(long, value_name = "UNITS")]
    pub inj_param_units: Option<String>,

    // --- Outputs ---
    /// Produce one best-fit plot per systematic parameter.
    #[arg(long)]
    pub individual_fits: bool,

    /// Produce one plot with the best fits of all systematic parameters.
    #[arg(long)]
    pub combined_fits: bool,

    /// Extra points to add to the significance plot: a file of whitespace
    /// separated columns or a literal list such as '[(0.45,1.2),(0.5,1.4)]'.
    #[arg(long = "extra-points", value_name = "FILE_OR_LIST")]
    pub extra_points: Vec<String>,

    /// Legend label per set of extra points.
    #[arg(long = "extra-points-label", value_name = "LABEL")]
    pub extra_points_labels: Vec<String>,

    /// Directory receiving the plot descriptions and the significance table.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub outdir: PathBuf,
}

/// Arguments for the `flux` subcommand.
#[derive(Args, Debug)]
pub struct FluxArgs {
    /// Path to the flux configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Path for the output CSV table of flux maps.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S params.nue_numu_ratio=1.05
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `weights` subcommand.
#[derive(Args, Debug)]
pub struct WeightsArgs {
    /// Path to the pipeline configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Path for the output CSV table of weighted events.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S loader.seed=42
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}
