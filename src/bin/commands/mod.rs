use std::io::{self as stdio, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use is_terminal::IsTerminal;
use tracing_subscriber::EnvFilter;

use epi_forge::config::Settings;
use epi_forge::io::{IoContext, LoadedFile, load_structure};
use epi_forge::mapping::{MappingResult, build_mapping};
use epi_forge::standardize::{StandardizedStructure, standardize};

pub mod info;
pub mod map;
pub mod resolve;
pub mod run;
pub mod standardize;

const DEFAULT_LOG_FILTER: &str = "epi_forge=info,epiforge=info";

/// Installs the stderr log subscriber. `--log-level` wins over `RUST_LOG`.
pub fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .map_err(|e| anyhow!("Invalid --log-level '{level}': {e}"))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(stdio::stderr)
        .with_ansi(stdio::stderr().is_terminal())
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {e}"))
}

pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    Settings::load(path).context("Failed to load settings")
}

/// Loads a structure file with the default residue vocabulary.
pub fn load_input(path: &Path) -> Result<LoadedFile> {
    load_structure(path, &IoContext::new_default())
        .with_context(|| format!("Failed to load structure {}", path.display()))
}

/// Standardizes `input` into `out_dir` and builds its mapping table.
pub fn map_input(
    input: &Path,
    out_dir: &Path,
    label: &str,
) -> Result<(StandardizedStructure, MappingResult)> {
    let loaded = load_input(input)?;
    let standardized = standardize(input, &loaded, out_dir, label)
        .with_context(|| format!("Failed to standardize {}", input.display()))?;
    let mapping = build_mapping(&standardized)
        .with_context(|| format!("Failed to map {}", standardized.standardized_path.display()))?;
    Ok((standardized, mapping))
}

/// Label used for canonical files, taken from the input's file stem.
pub fn file_label(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(|stem| {
            stem.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
                .collect()
        })
        .unwrap_or_else(|| "target".to_string())
}

pub fn default_out_dir(input: &Path) -> PathBuf {
    input
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
        .join(format!("{}_epiforge", file_label(input)))
}

/// Wraps long-running operations with a spinner rendered to stderr.
pub fn run_with_spinner<T, F>(message: &str, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    if !stdio::stderr().is_terminal() {
        return work();
    }

    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message(message.to_string());

    let result = work();

    match &result {
        Ok(_) => spinner.finish_with_message(format!("{} ✓", message)),
        Err(_) => spinner.abandon_with_message(format!("{} ✗", message)),
    }

    result
}

pub fn print_boxed_label<W: Write>(writer: &mut W, title: &str) -> stdio::Result<()> {
    let inner = format!(" {title} ");
    let width = inner.chars().count();
    writeln!(writer, "╭{}╮", "─".repeat(width))?;
    writeln!(writer, "│{}│", inner)?;
    writeln!(writer, "╰{}╯", "─".repeat(width))?;
    Ok(())
}
