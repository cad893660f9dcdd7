use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use prettytable::{Table, format, row};
use tracing::warn;

use epi_forge::config::Settings;
use epi_forge::pipeline::config::JobRequest;
use epi_forge::pipeline::{JOB_RESULT_FILE, Orchestrator};
use epi_forge::store::{FileTaskStore, TaskStatus};
use epi_forge::supervisor::CancelHandle;

use crate::commands::print_boxed_label;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Job file (TOML or JSON).
    #[arg(short, long, value_name = "FILE")]
    job: PathBuf,
}

pub fn run(args: &RunArgs, settings: Settings) -> Result<()> {
    let request = JobRequest::from_file(&args.job)
        .with_context(|| format!("Failed to read job file {}", args.job.display()))?;
    let store = FileTaskStore::open(&settings.task_store_dir).with_context(|| {
        format!(
            "Failed to open task store {}",
            settings.task_store_dir.display()
        )
    })?;
    let orchestrator = Orchestrator::new(settings, Arc::new(store));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let outcome = runtime.block_on(async {
        let submitted = orchestrator.submit(request)?;
        let mut stderr = io::stderr().lock();
        writeln!(&mut stderr, "Job {} submitted", submitted.id)?;
        drop(stderr);

        let cancel = CancelHandle::new();
        let signal = cancel.signal();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling job");
                cancel.cancel();
            }
        });

        orchestrator
            .run(&submitted, signal)
            .await
            .with_context(|| format!("Job {} failed", submitted.id))
    })?;

    let result = &outcome.result;
    let mut stderr = io::stderr().lock();
    print_boxed_label(&mut stderr, &format!("Job {}", result.job_id))?;
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);
    table.set_titles(row!["Tool", "Status", "Attempts", "Elapsed (s)", "Failure"]);
    for (name, tool) in &result.tools {
        table.add_row(row![
            name,
            tool.status,
            tool.attempts_made,
            format!("{:.1}", tool.elapsed_secs),
            tool.failure
                .as_ref()
                .map_or_else(String::new, ToString::to_string)
        ]);
    }
    table
        .print(&mut stderr)
        .context("Failed to render tool table")?;

    writeln!(
        &mut stderr,
        "Hotspots: {} resolved, {} unresolved",
        result.hotspot_summary.resolved,
        result.hotspot_summary.unresolved()
    )?;
    writeln!(
        &mut stderr,
        "Results written to {}",
        result.job_dir.join(JOB_RESULT_FILE).display()
    )?;

    if result.status == TaskStatus::Cancelled {
        bail!("Job {} was cancelled", result.job_id);
    }
    Ok(())
}
