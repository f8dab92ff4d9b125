use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "The overlay developers",
    version,
    about = "overlay - loads molecular structures and density maps into one shared frame and drives them through a JSON command/event protocol.",
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

    /// Write logs to a specified file in addition to stderr
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read JSON commands from stdin, one per line, and write JSON events to stdout.
    Serve(ServeArgs),
    /// Print a summary of a local structure or density map file.
    Inspect(InspectArgs),
}

/// Arguments for the `serve` subcommand.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Path to a TOML configuration file. Defaults to the per-user config file when present.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the color palette (comma-separated, e.g. '#1f77b4,#ff7f0e').
    #[arg(long, value_name = "COLORS", value_delimiter = ',')]
    pub palette: Option<Vec<String>>,

    /// Override the default map threshold, in sigma units.
    #[arg(long, value_name = "SIGMA", allow_negative_numbers = true)]
    pub iso_value: Option<f64>,

    /// Override the smallest centering translation that is applied, in Angstroms.
    #[arg(long, value_name = "ANGSTROM")]
    pub translation_epsilon: Option<f64>,

    /// Override the minimum number of matched residues required for superposition.
    #[arg(long, value_name = "NUM")]
    pub min_pairs: Option<usize>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InspectFormat {
    Pdb,
    Mmcif,
    Ccp4,
}

/// Arguments for the `inspect` subcommand.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Structure (.pdb, .cif) or map (.map, .mrc, .ccp4) file, optionally gzipped.
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Force a file format instead of guessing from the extension.
    #[arg(short, long, value_enum)]
    pub format: Option<InspectFormat>,

    /// Threshold (sigma units) whose absolute value is reported for maps.
    #[arg(long, value_name = "SIGMA", allow_negative_numbers = true)]
    pub iso_value: Option<f64>,
}
