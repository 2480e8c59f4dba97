use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use calltrace::{ExportFormat, LocatorStrategy};
use clap::{Args, Parser, Subcommand, ValueEnum};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "calltrace-cli")]
#[command(version, about = "Record and inspect per-thread call traces", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a small traced workload, print its trace and export it
    Demo(DemoArgs),
    /// Print an exported trace as a tree
    Show {
        /// Exported trace (.xml or .json)
        file: PathBuf,
    },
    /// Aggregate an exported trace per routine
    Summary {
        /// Exported trace (.xml or .json)
        file: PathBuf,
        /// Number of routines to list
        #[arg(short, long, default_value_t = 20)]
        top: usize,
    },
}

#[derive(Args)]
struct DemoArgs {
    /// Export path (default from config, else ResultXML.xml)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Export format (default inferred from the output extension)
    #[arg(short, long, value_enum)]
    format: Option<FormatArg>,
    /// How the tracer finds the open call of a thread
    #[arg(long, value_enum)]
    locator: Option<LocatorArg>,
    /// Time each workload call sleeps, in milliseconds
    #[arg(long = "delay-ms", default_value_t = 100)]
    delay_ms: u64,
    /// Number of worker threads running the workload
    #[arg(long, default_value_t = 1)]
    threads: usize,
    /// TOML file with tracer settings; flags override it
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Xml,
    Json,
}

impl From<FormatArg> for ExportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Xml => ExportFormat::Xml,
            FormatArg::Json => ExportFormat::Json,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LocatorArg {
    CallStack,
    TreeScan,
}

impl From<LocatorArg> for LocatorStrategy {
    fn from(value: LocatorArg) -> Self {
        match value {
            LocatorArg::CallStack => LocatorStrategy::CallStack,
            LocatorArg::TreeScan => LocatorStrategy::TreeScan,
        }
    }
}

fn main() -> Result<()> {
    calltrace::init_tracing();
    let Cli { command } = Cli::parse();

    match command {
        Commands::Demo(args) => {
            commands::demo::execute(commands::demo::Options {
                config: args.config,
                output: args.output,
                format: args.format.map(Into::into),
                locator: args.locator.map(Into::into),
                delay: Duration::from_millis(args.delay_ms),
                threads: args.threads,
            })?;
        }
        Commands::Show { file } => {
            commands::show::execute(&file)?;
        }
        Commands::Summary { file, top } => {
            commands::summary::execute(&file, top)?;
        }
    }

    Ok(())
}
