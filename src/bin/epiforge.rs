use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{info, map, resolve, run, standardize};

#[derive(Parser, Debug)]
#[command(
    name = "epiforge",
    about = "Deterministic residue mapping, hotspot resolution, and design-tool supervision for antibody/target structures.",
    version,
    author,
    arg_required_else_help = true
)]
struct Cli {
    /// Settings file (TOML). Environment variables override it.
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
    /// Log filter such as `info` or `epi_forge=debug`. Overrides RUST_LOG.
    #[arg(long, value_name = "FILTER", global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize the chains of a structure file.
    Info(info::InfoArgs),
    /// Write the canonical copy of a structure and its chain map.
    Standardize(standardize::StandardizeArgs),
    /// Standardize a structure and write its residue mapping table.
    Map(map::MapArgs),
    /// Resolve hotspots against a structure or mapping report and export annotations.
    Resolve(resolve::ResolveArgs),
    /// Run a job file end to end, including external design tools.
    Run(run::RunArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    commands::init_logging(cli.log_level.as_deref())?;

    match cli.command {
        Command::Info(args) => info::run(&args)?,
        Command::Standardize(args) => standardize::run(&args)?,
        Command::Map(args) => map::run(&args)?,
        Command::Resolve(args) => {
            let settings = commands::load_settings(cli.config.as_deref())?;
            resolve::run(&args, &settings)?
        }
        Command::Run(args) => {
            let settings = commands::load_settings(cli.config.as_deref())?;
            run::run(&args, settings)?
        }
    }

    Ok(())
}
