//! Strata command-line tool
//!
//! Checks and evaluates JSON declaration documents:
//! - `strata check` compiles and interprets, reporting diagnostics
//! - `strata eval` also instantiates the root models and prints values

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;

use commands::{check, eval, Document};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Strata declaration toolchain", long_about = None)]
#[command(version)]
struct Cli {
    /// Log engine activity at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// When to use colors: auto, always, never
    #[arg(long, global = true)]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and interpret a document, reporting diagnostics
    Check {
        /// Declaration document (JSON)
        file: PathBuf,
        /// Diagnostic output format
        #[arg(long, value_enum, default_value = "human")]
        format: Format,
        /// Configuration file (defaults to strata.toml next to the document)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Instantiate a document and print its top-level values
    Eval {
        /// Declaration document (JSON)
        file: PathBuf,
        /// Configuration file (defaults to strata.toml next to the document)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Values to print (all top-level values when omitted)
        names: Vec<String>,
    },
}

/// Diagnostic output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Human,
    Json,
}

fn init_tracing(verbose: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let color = output::resolve_color_choice(cli.color.as_deref());

    let code = match cli.command {
        Commands::Check { file, format, config } => {
            let document = Document::load(&file, config.as_deref())?;
            init_tracing(cli.verbose, &document.config.log.level);
            check::execute(&document, format, color)?
        }
        Commands::Eval { file, config, names } => {
            let document = Document::load(&file, config.as_deref())?;
            init_tracing(cli.verbose, &document.config.log.level);
            eval::execute(&document, &names, color)?
        }
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
