use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Args, ValueEnum};
use prettytable::{Table, format, row};

use epi_forge::config::Settings;
use epi_forge::export::export_all;
use epi_forge::hotspot::{HotspotScope, HotspotSpec, HotspotSummary, resolve_hotspots};
use epi_forge::mapping::MappingResult;

use crate::commands::{default_out_dir, file_label, map_input, print_boxed_label, run_with_spinner};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScopeArg {
    Protein,
    All,
}

impl From<ScopeArg> for HotspotScope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Protein => HotspotScope::Protein,
            ScopeArg::All => HotspotScope::All,
        }
    }
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("source").required(true).args(["input", "mapping"])))]
pub struct ResolveArgs {
    /// Structure file to standardize and map first.
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,
    /// Previously written mapping report.
    #[arg(short, long, value_name = "FILE")]
    mapping: Option<PathBuf>,
    /// Hotspot such as `A:52` or `H:100A`. Repeat for more.
    #[arg(long = "hotspot", value_name = "SPEC", required = true)]
    hotspots: Vec<String>,
    /// Residue categories hotspots may point at. Defaults to the configured scope.
    #[arg(long, value_enum)]
    scope: Option<ScopeArg>,
    /// Chain role hint as `CHAIN=ROLE`, e.g. `B=heavy`. Repeat for more.
    #[arg(long = "chain-role", value_name = "CHAIN=ROLE", value_parser = parse_role_hint)]
    chain_roles: Vec<(String, String)>,
    /// Directory for exported artifacts. Nothing is exported when omitted.
    #[arg(short, long, value_name = "DIR")]
    out_dir: Option<PathBuf>,
    /// Exit with an error when any hotspot does not resolve.
    #[arg(long)]
    strict: bool,
}

fn parse_role_hint(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((chain, role)) if !chain.trim().is_empty() && !role.trim().is_empty() => {
            Ok((chain.trim().to_string(), role.trim().to_string()))
        }
        _ => Err(format!("expected CHAIN=ROLE, got '{raw}'")),
    }
}

pub fn run(args: &ResolveArgs, settings: &Settings) -> Result<()> {
    let scope = args.scope.map(HotspotScope::from).unwrap_or(settings.hotspot_scope);
    let specs: Vec<HotspotSpec> = args.hotspots.iter().map(|h| HotspotSpec::from(h.as_str())).collect();
    let hints: BTreeMap<String, String> = args.chain_roles.iter().cloned().collect();

    let mapping = run_with_spinner("Loading residue mapping", || load_mapping(args))?;
    let results = resolve_hotspots(&specs, &mapping, scope);
    let summary = HotspotSummary::from_results(&results);

    let mut stderr = io::stderr().lock();
    print_boxed_label(&mut stderr, "Hotspots")?;
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);
    table.set_titles(row!["Requested", "Status", "Canonical", "Absolute", "Residue", "Note"]);
    for result in &results {
        let (canonical, absolute, residue) = match &result.matched {
            Some(m) => (
                format!("{}:{}", m.canonical_chain_id, m.canonical_sequence_position),
                mapping
                    .absolute_index(&m.canonical_chain_id, m.canonical_sequence_position)
                    .map_or_else(|| "-".to_string(), |i| i.to_string()),
                m.residue_name.clone(),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string()),
        };
        table.add_row(row![
            result.requested,
            result.status,
            canonical,
            absolute,
            residue,
            result.message.as_deref().unwrap_or("")
        ]);
    }
    table
        .print(&mut stderr)
        .context("Failed to render hotspot table")?;
    writeln!(
        &mut stderr,
        "resolved {} / not found {} / malformed {} / ambiguous {}",
        summary.resolved, summary.not_found, summary.malformed, summary.ambiguous
    )?;

    if let Some(out_dir) = &args.out_dir {
        let outcome = export_all(&mapping, &results, scope, &hints, None, out_dir)
            .with_context(|| format!("Failed to export artifacts to {}", out_dir.display()))?;
        writeln!(&mut stderr)?;
        print_boxed_label(&mut stderr, "Exported Artifacts")?;
        let mut files = Table::new();
        files.set_format(*format::consts::FORMAT_BOX_CHARS);
        files.set_titles(row!["Artifact", "Path"]);
        for (artifact, path) in &outcome.files {
            files.add_row(row![artifact, path.display()]);
        }
        files
            .print(&mut stderr)
            .context("Failed to render artifact table")?;
        for (chain, role) in &outcome.chain_roles {
            writeln!(&mut stderr, "chain {chain} -> {role}")?;
        }
        for warning in &outcome.warnings {
            writeln!(&mut stderr, "warning: {warning}")?;
        }
    }

    if args.strict && summary.unresolved() > 0 {
        bail!("{} hotspot(s) did not resolve", summary.unresolved());
    }
    Ok(())
}

fn load_mapping(args: &ResolveArgs) -> Result<MappingResult> {
    if let Some(report) = &args.mapping {
        return MappingResult::read_report(report)
            .with_context(|| format!("Failed to read mapping report {}", report.display()));
    }
    let Some(input) = &args.input else {
        bail!("either --input or --mapping is required");
    };
    let out_dir = args
        .out_dir
        .clone()
        .unwrap_or_else(|| default_out_dir(input));
    let (_, mapping) = map_input(input, &out_dir, &file_label(input))?;
    Ok(mapping)
}
