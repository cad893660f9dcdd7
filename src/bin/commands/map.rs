use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use prettytable::{Table, format, row};

use epi_forge::pipeline::MAPPING_FILE;

use crate::commands::{default_out_dir, file_label, map_input, print_boxed_label, run_with_spinner};

#[derive(Debug, Args)]
pub struct MapArgs {
    /// Structure file (PDB or mmCIF).
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,
    /// Output directory. Defaults to `<stem>_epiforge` next to the input.
    #[arg(short, long, value_name = "DIR")]
    out_dir: Option<PathBuf>,
    /// Print every residue instead of the per-chain summary.
    #[arg(long)]
    residues: bool,
}

pub fn run(args: &MapArgs) -> Result<()> {
    let out_dir = args
        .out_dir
        .clone()
        .unwrap_or_else(|| default_out_dir(&args.input));
    let label = file_label(&args.input);

    let mapping = run_with_spinner("Building residue mapping", || {
        let (_, mapping) = map_input(&args.input, &out_dir, &label)?;
        let report_path = out_dir.join(MAPPING_FILE);
        mapping
            .write_report(&report_path)
            .with_context(|| format!("Failed to write {}", report_path.display()))?;
        Ok(mapping)
    })?;

    let mut stderr = io::stderr().lock();
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);

    if args.residues {
        print_boxed_label(&mut stderr, "Residue Mapping")?;
        table.set_titles(row!["Author", "Canonical", "Position", "Residue", "Category"]);
        for residue in mapping.residues() {
            table.add_row(row![
                residue.author_ref.token(),
                residue.canonical_chain_id,
                residue.canonical_sequence_position,
                residue.residue_name,
                residue.category
            ]);
        }
    } else {
        print_boxed_label(&mut stderr, "Chain Mapping")?;
        table.set_titles(row!["Author", "Canonical", "Residues", "Sequence Length"]);
        for chain in mapping.chains() {
            table.add_row(row![
                chain.author_chain_id,
                chain.canonical_chain_id,
                chain.residues.len(),
                chain.sequence.len()
            ]);
        }
    }
    table
        .print(&mut stderr)
        .context("Failed to render mapping table")?;

    writeln!(
        &mut stderr,
        "Mapped {} residues; report written to {}",
        mapping.len(),
        out_dir.join(MAPPING_FILE).display()
    )?;
    Ok(())
}
