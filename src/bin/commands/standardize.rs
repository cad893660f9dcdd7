use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use prettytable::{Table, format, row};

use epi_forge::standardize::{CHAIN_MAP_FILE, standardize};

use crate::commands::{default_out_dir, file_label, load_input, print_boxed_label, run_with_spinner};

#[derive(Debug, Args)]
pub struct StandardizeArgs {
    /// Structure file (PDB or mmCIF).
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,
    /// Output directory. Defaults to `<stem>_epiforge` next to the input.
    #[arg(short, long, value_name = "DIR")]
    out_dir: Option<PathBuf>,
    /// Label used in `standardized_<label>.cif`. Defaults to the input file stem.
    #[arg(long)]
    label: Option<String>,
}

pub fn run(args: &StandardizeArgs) -> Result<()> {
    let out_dir = args
        .out_dir
        .clone()
        .unwrap_or_else(|| default_out_dir(&args.input));
    let label = args.label.clone().unwrap_or_else(|| file_label(&args.input));

    let standardized = run_with_spinner("Standardizing structure", || {
        let loaded = load_input(&args.input)?;
        standardize(&args.input, &loaded, &out_dir, &label)
            .with_context(|| format!("Failed to standardize {}", args.input.display()))
    })?;

    let mut stderr = io::stderr().lock();
    print_boxed_label(&mut stderr, "Chain Map")?;
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);
    table.set_titles(row!["Author Chain", "Canonical Chain"]);
    for (author, canonical) in &standardized.chain_id_map {
        table.add_row(row![author, canonical]);
    }
    table
        .print(&mut stderr)
        .context("Failed to render chain map")?;

    if standardized.is_identity() {
        writeln!(&mut stderr, "Chain identifiers are already canonical.")?;
    }
    writeln!(
        &mut stderr,
        "Wrote {} and {}",
        standardized.standardized_path.display(),
        out_dir.join(CHAIN_MAP_FILE).display()
    )?;
    Ok(())
}
