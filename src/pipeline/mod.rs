//! Job orchestration.
//!
//! [`Orchestrator::run`] sequences one validated job: load and standardize the target (and
//! the optional scaffold), build the mapping table, resolve hotspots, export every artifact,
//! then run the enabled tools concurrently. Everything before the tools is fatal to the job.
//! Tool failures stay scoped to their own [`ToolInvocationResult`].
//!
//! Layout of `<storage_root>/<job_id>/`:
//!
//! ```text
//! target/            standardized_target.cif, chain_map.json
//! scaffold/          standardized_scaffold.cif, chain_map.json, mapping.json,
//!                    cdr_label_mapping.json, scaffold.HLT.pdb (optional)
//! mapping.json
//! exports/           hotspot report, RFantibody/BoltzGen inputs, annotated structures
//! tools/<name>/      inputs/, outputs/, logs/
//! job_result.json
//! ```

pub mod config;
pub mod result;

pub use config::{
    ConfigError, HotspotsFormat, JobRequest, StructureInput, ToolConfig, ToolPlan, ValidatedJob,
};
pub use result::{JobOutcome, JobResult, ScaffoldResult};

use crate::config::Settings;
use crate::export::{self, ExportError, ExportOutcome};
use crate::hotspot::{HotspotStatus, HotspotSummary, resolve_hotspots};
use crate::io::{IoContext, LoadError, load_structure};
use crate::mapping::{MappingError, build_mapping};
use crate::numbering::{
    CDR_MAPPING_FILE, CdrLabelMapping, CommandNumbering, NumberingService, annotate_cdrs,
};
use crate::standardize::{StandardizeError, StandardizedStructure, standardize};
use crate::store::{StoreError, TaskRecord, TaskStatus, TaskStore, TaskUpdate};
use crate::supervisor::descriptor::{CONTAINER_WORKDIR, ExecutionDescriptor, TemplateVars};
use crate::supervisor::{CancelSignal, ToolFailure, ToolInvocationResult, ToolSupervisor};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const MAPPING_FILE: &str = "mapping.json";
pub const JOB_RESULT_FILE: &str = "job_result.json";

/// Artifacts without which a job cannot succeed.
const CORE_ARTIFACTS: [&str; 2] = ["report", "annotated_structure"];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Standardize(#[from] StandardizeError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("{} hotspot(s) did not resolve: {}", .tokens.len(), .tokens.join(", "))]
    UnresolvedHotspots { malformed: usize, tokens: Vec<String> },
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("core artifact '{0}' was not produced")]
    MissingCoreArtifact(String),
    #[error("job was cancelled")]
    Cancelled,
    #[error("failed to prepare '{}': {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode job result: {0}")]
    ResultEncoding(#[source] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Taxonomy name surfaced in the task store.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "InvalidConfiguration",
            Self::Load(LoadError::UnreadableStructure { .. }) => "UnreadableStructure",
            Self::Load(LoadError::EmptyStructure { .. }) => "EmptyStructure",
            Self::Standardize(_) => "StandardizationError",
            Self::Mapping(_) => "MappingError",
            Self::UnresolvedHotspots { malformed, .. } if *malformed > 0 => "MalformedHotspot",
            Self::UnresolvedHotspots { .. } => "UnresolvedHotspots",
            Self::Export(_) | Self::MissingCoreArtifact(_) => "ExportError",
            Self::Cancelled => "Cancelled",
            Self::Workspace { .. } | Self::ResultEncoding(_) => "WorkspaceError",
            Self::Store(_) => "StoreError",
        }
    }
}

/// A validated job registered in the task store.
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub id: String,
    pub job: ValidatedJob,
}

pub struct Orchestrator {
    settings: Settings,
    store: Arc<dyn TaskStore>,
    supervisor: ToolSupervisor,
    numbering: Option<Arc<dyn NumberingService>>,
    context: IoContext,
}

impl Orchestrator {
    /// Creates an orchestrator reporting to `store`.
    ///
    /// A numbering service is set up from `settings.numbering_command` when it is not empty.
    pub fn new(settings: Settings, store: Arc<dyn TaskStore>) -> Self {
        let numbering = CommandNumbering::from_command(&settings.numbering_command)
            .map(|service| Arc::new(service) as Arc<dyn NumberingService>);
        Self {
            settings,
            store,
            supervisor: ToolSupervisor::default(),
            numbering,
            context: IoContext::new_default(),
        }
    }

    pub fn with_supervisor(mut self, supervisor: ToolSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_numbering(mut self, numbering: Arc<dyn NumberingService>) -> Self {
        self.numbering = Some(numbering);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Validates `request` and records it as `queued`.
    pub fn submit(&self, request: JobRequest) -> Result<SubmittedJob, PipelineError> {
        let payload = serde_json::to_value(&request).map_err(PipelineError::ResultEncoding)?;
        let job = request.validate(&self.settings)?;
        let id = Uuid::new_v4().to_string();
        self.store.create(TaskRecord::new(id.clone(), payload))?;
        info!(job = %id, tools = job.tools().len(), "job submitted");
        Ok(SubmittedJob { id, job })
    }

    /// Runs a submitted job to a terminal state and reports it to the task store.
    pub async fn run(
        &self,
        submitted: &SubmittedJob,
        cancel: CancelSignal,
    ) -> Result<JobOutcome, PipelineError> {
        let id = submitted.id.as_str();
        self.store
            .update(id, TaskUpdate::status(TaskStatus::Running))?;
        info!(job = %id, "job started");

        match self.execute(id, &submitted.job, cancel).await {
            Ok(outcome) => {
                let result_path = outcome.result.job_dir.join(JOB_RESULT_FILE);
                self.store.update(
                    id,
                    TaskUpdate::status(outcome.result.status)
                        .with_result(outcome.result.task_metadata(&result_path)),
                )?;
                info!(job = %id, status = %outcome.result.status, "job finished");
                Ok(outcome)
            }
            Err(err) => {
                let status = match err {
                    PipelineError::Cancelled => TaskStatus::Cancelled,
                    _ => TaskStatus::Failed,
                };
                error!(job = %id, kind = err.kind(), error = %err, "job failed");
                if let Err(store_err) = self.store.update(
                    id,
                    TaskUpdate::status(status).with_error(err.kind(), err.to_string()),
                ) {
                    error!(job = %id, error = %store_err, "failed to record job failure");
                }
                Err(err)
            }
        }
    }

    /// Submits and runs in one step.
    pub async fn submit_and_run(
        &self,
        request: JobRequest,
        cancel: CancelSignal,
    ) -> Result<JobOutcome, PipelineError> {
        let submitted = self.submit(request)?;
        self.run(&submitted, cancel).await
    }

    async fn execute(
        &self,
        id: &str,
        job: &ValidatedJob,
        cancel: CancelSignal,
    ) -> Result<JobOutcome, PipelineError> {
        let started_at = Utc::now();
        let request = job.request();
        let root = std::path::absolute(&self.settings.storage_root).map_err(|source| {
            PipelineError::Workspace {
                path: self.settings.storage_root.clone(),
                source,
            }
        })?;
        let job_dir = root.join(id);
        create_dir(&job_dir)?;
        ensure_active(&cancel)?;

        let target_file = load_structure(&request.target, &self.context)?;
        let mut load_warnings: Vec<String> = target_file
            .loaded
            .warnings
            .iter()
            .map(ToString::to_string)
            .collect();
        let target = standardize(&request.target, &target_file, &job_dir.join("target"), "target")?;

        let scaffold = match &request.scaffold {
            Some(path) => {
                let file = load_structure(path, &self.context)?;
                load_warnings.extend(file.loaded.warnings.iter().map(ToString::to_string));
                let scaffold_dir = job_dir.join("scaffold");
                let standardized = standardize(path, &file, &scaffold_dir, "scaffold")?;
                Some(self.prepare_scaffold(id, job, standardized, &scaffold_dir).await?)
            }
            None => None,
        };
        ensure_active(&cancel)?;

        let mapping = build_mapping(&target)?;
        let mapping_report = job_dir.join(MAPPING_FILE);
        mapping.write_report(&mapping_report)?;

        let hotspots = resolve_hotspots(&request.hotspots, &mapping, job.hotspot_scope());
        let hotspot_summary = HotspotSummary::from_results(&hotspots);
        info!(
            job = %id,
            resolved = hotspot_summary.resolved,
            unresolved = hotspot_summary.unresolved(),
            "resolved hotspots"
        );
        let rejected: Vec<String> = hotspots
            .iter()
            .filter(|h| match h.status {
                HotspotStatus::Resolved => false,
                HotspotStatus::Malformed => true,
                _ => request.strict_hotspots,
            })
            .map(|h| h.token())
            .collect();
        if !rejected.is_empty() {
            let exports_dir = job_dir.join("exports");
            match export::export_report(&mapping, &hotspots, job.hotspot_scope(), &exports_dir) {
                Ok(path) => info!(job = %id, report = %path.display(), "wrote hotspot report"),
                Err(err) => warn!(job = %id, error = %err, "failed to write hotspot report"),
            }
            return Err(PipelineError::UnresolvedHotspots {
                malformed: hotspot_summary.malformed,
                tokens: rejected,
            });
        }
        ensure_active(&cancel)?;

        let exports = export::export_all(
            &mapping,
            &hotspots,
            job.hotspot_scope(),
            &request.chain_roles,
            scaffold
                .as_ref()
                .map(|s| &s.cdrs)
                .filter(|cdrs| cdrs.succeeded()),
            &job_dir.join("exports"),
        )?;
        for artifact in CORE_ARTIFACTS {
            if exports.file(artifact).is_none() {
                return Err(PipelineError::MissingCoreArtifact(artifact.to_string()));
            }
        }
        ensure_active(&cancel)?;

        let tools = self
            .run_tools(id, job, &job_dir, &target, scaffold.as_ref(), &exports, &cancel)
            .await;

        let status = if cancel.is_cancelled() {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Succeeded
        };
        let result = JobResult {
            job_id: id.to_string(),
            status,
            started_at,
            finished_at: Utc::now(),
            job_dir: job_dir.clone(),
            target,
            scaffold,
            mapping_report,
            residue_count: mapping.len(),
            load_warnings,
            hotspot_summary,
            hotspots,
            exports,
            tools,
        };
        result.write(&job_dir.join(JOB_RESULT_FILE))?;

        Ok(JobOutcome { result, mapping })
    }

    /// Maps the standardized scaffold, annotates its CDRs, and writes its HLT file.
    ///
    /// Only the mapping is fatal; numbering and HLT problems are recorded as warnings.
    async fn prepare_scaffold(
        &self,
        id: &str,
        job: &ValidatedJob,
        standardized: StandardizedStructure,
        scaffold_dir: &Path,
    ) -> Result<ScaffoldResult, PipelineError> {
        let mapping = build_mapping(&standardized)?;
        let mapping_report = scaffold_dir.join(MAPPING_FILE);
        mapping.write_report(&mapping_report)?;

        let chain = job.request().scaffold_chain.as_deref();
        let scheme = job.numbering_scheme();
        let cdrs = match &self.numbering {
            Some(service) => annotate_cdrs(service.as_ref(), &mapping, chain, scheme).await,
            None => CdrLabelMapping::failed(scheme, chain, "no numbering service configured"),
        };
        let cdr_mapping = scaffold_dir.join(CDR_MAPPING_FILE);
        let bytes = serde_json::to_vec_pretty(&cdrs).map_err(PipelineError::ResultEncoding)?;
        fs::write(&cdr_mapping, bytes).map_err(|source| PipelineError::Workspace {
            path: cdr_mapping.clone(),
            source,
        })?;

        let mut warnings = Vec::new();
        if let Some(reason) = &cdrs.reason {
            warnings.push(format!("CDR annotation failed: {reason}"));
        }
        let placed = cdrs.succeeded().then_some(&cdrs);
        let (hlt, chain_roles) =
            match export::export_scaffold(&mapping, placed, &BTreeMap::new(), scaffold_dir) {
                Ok(outcome) => {
                    warnings.extend(outcome.warnings.iter().map(ToString::to_string));
                    (
                        outcome.file("scaffold_hlt").map(Path::to_path_buf),
                        outcome.chain_roles,
                    )
                }
                Err(err) => {
                    warn!(job = %id, error = %err, "scaffold HLT export failed");
                    warnings.push(format!("scaffold HLT export failed: {err}"));
                    (None, BTreeMap::new())
                }
            };

        info!(
            job = %id,
            residues = mapping.len(),
            cdrs = cdrs.mapped().count(),
            "prepared scaffold"
        );
        Ok(ScaffoldResult {
            standardized,
            mapping_report,
            cdr_mapping,
            cdrs,
            hlt,
            chain_roles,
            warnings,
        })
    }

    /// Runs every tool concurrently, each in its own `tools/<name>/` directory.
    async fn run_tools(
        &self,
        id: &str,
        job: &ValidatedJob,
        job_dir: &Path,
        target: &StandardizedStructure,
        scaffold: Option<&ScaffoldResult>,
        exports: &ExportOutcome,
        cancel: &CancelSignal,
    ) -> BTreeMap<String, ToolInvocationResult> {
        let mut results = BTreeMap::new();
        let mut running = Vec::new();

        for plan in job.tools() {
            let tool_dir = job_dir.join("tools").join(&plan.name);
            match stage_tool(id, plan, &tool_dir, target, scaffold, exports) {
                Ok((descriptor, vars)) => {
                    let supervisor = self.supervisor.clone();
                    let cancel = cancel.clone();
                    let handle = tokio::spawn(async move {
                        supervisor.invoke(&descriptor, &vars, cancel).await
                    });
                    running.push((plan.name.clone(), handle));
                }
                Err(failure) => {
                    warn!(tool = %plan.name, "{failure}");
                    results.insert(
                        plan.name.clone(),
                        ToolInvocationResult::rejected(plan.name.clone(), failure),
                    );
                }
            }
        }

        for (name, handle) in running {
            let result = match handle.await {
                Ok(result) => result,
                Err(err) => {
                    error!(tool = %name, error = %err, "tool task aborted");
                    ToolInvocationResult::rejected(
                        name.clone(),
                        ToolFailure::SpawnFailed {
                            reason: err.to_string(),
                        },
                    )
                }
            };
            results.insert(name, result);
        }
        results
    }
}

fn ensure_active(cancel: &CancelSignal) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

fn create_dir(path: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(path).map_err(|source| PipelineError::Workspace {
        path: path.to_path_buf(),
        source,
    })
}

/// Prepares `tool_dir` and the template variables of one tool.
///
/// Inputs are copied into `inputs/` and referenced by paths relative to the tool directory,
/// which is the working directory of both direct and container runs.
fn stage_tool(
    job_id: &str,
    plan: &ToolPlan,
    tool_dir: &Path,
    target: &StandardizedStructure,
    scaffold: Option<&ScaffoldResult>,
    exports: &ExportOutcome,
) -> Result<(ExecutionDescriptor, TemplateVars), ToolFailure> {
    let staging = |reason: String| ToolFailure::SpawnFailed { reason };
    let inputs_dir = tool_dir.join("inputs");
    for dir in [&inputs_dir, &tool_dir.join("outputs")] {
        fs::create_dir_all(dir)
            .map_err(|e| staging(format!("cannot create {}: {e}", dir.display())))?;
    }

    let copy_in = |source: &Path| -> Result<String, ToolFailure> {
        let name = source
            .file_name()
            .ok_or_else(|| staging(format!("input {} has no file name", source.display())))?;
        fs::copy(source, inputs_dir.join(name))
            .map_err(|e| staging(format!("cannot stage {}: {e}", source.display())))?;
        Ok(format!("inputs/{}", name.to_string_lossy()))
    };
    let structure = match plan.structure {
        StructureInput::Canonical => target.standardized_path.as_path(),
        StructureInput::Hlt => exported(exports, "hlt")?,
    };
    let hotspots = match plan.hotspots {
        HotspotsFormat::Rfantibody => exported(exports, "rfantibody")?,
        HotspotsFormat::Boltzgen => exported(exports, "boltzgen")?,
        HotspotsFormat::Report => exported(exports, "report")?,
    };

    let workdir = if plan.program.is_container() {
        CONTAINER_WORKDIR.to_string()
    } else {
        tool_dir.display().to_string()
    };
    let mut vars = TemplateVars::new()
        .with("workdir", workdir)
        .with("output_dir", "outputs")
        .with("structure", copy_in(structure)?)
        .with("hotspots", copy_in(hotspots)?);
    if let Some(scaffold) = scaffold {
        // HLT tools get the CDR-annotated framework when it was produced.
        let framework = match (plan.structure, &scaffold.hlt) {
            (StructureInput::Hlt, Some(hlt)) => hlt.as_path(),
            _ => scaffold.standardized.standardized_path.as_path(),
        };
        vars.set(
            format!("input.{}", config::SCAFFOLD_INPUT),
            copy_in(framework)?,
        );
    }
    for (name, path) in &plan.inputs {
        vars.set(format!("input.{name}"), copy_in(path)?);
    }

    let descriptor = ExecutionDescriptor {
        run_id: job_id.to_string(),
        tool: plan.name.clone(),
        program: plan.program.clone(),
        args: plan.args.clone(),
        workdir: tool_dir.to_path_buf(),
        timeout: plan.timeout,
        max_attempts: plan.max_attempts,
        outputs: plan.outputs.clone(),
        env: plan.env.clone(),
    };
    Ok((descriptor, vars))
}

fn exported<'a>(exports: &'a ExportOutcome, artifact: &str) -> Result<&'a Path, ToolFailure> {
    exports.file(artifact).ok_or_else(|| ToolFailure::SpawnFailed {
        reason: format!("required artifact '{artifact}' was not exported"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotspot::HotspotSpec;
    use crate::io::write_pdb_structure;
    use crate::mapping::tests::antibody_structure;
    use crate::numbering::tests::FixedNumbering;
    use crate::store::MemoryTaskStore;
    use crate::supervisor::descriptor::{CommandLine, Program};
    use crate::supervisor::{
        CancelHandle, InvocationState, ProcessOutput, ProcessRunner, RunOutcome, SpawnError,
    };
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Succeeds for `tool-a` (writing a design) and times out for everything else.
    struct SplitRunner;

    #[async_trait]
    impl ProcessRunner for SplitRunner {
        async fn run(
            &self,
            command: &CommandLine,
            _timeout: Duration,
            _cancel: &CancelSignal,
        ) -> Result<RunOutcome, SpawnError> {
            let tool = command.cwd.file_name().unwrap().to_string_lossy().into_owned();
            if tool == "tool-a" {
                std::fs::write(command.cwd.join("outputs/design_0.pdb"), b"END\n").unwrap();
                Ok(RunOutcome::Exited(ProcessOutput {
                    exit_code: Some(0),
                    ..ProcessOutput::default()
                }))
            } else {
                Ok(RunOutcome::TimedOut(ProcessOutput::default()))
            }
        }
    }

    struct Fixture {
        dir: TempDir,
        store: Arc<MemoryTaskStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let file = std::fs::File::create(dir.path().join("target.pdb")).unwrap();
            write_pdb_structure(std::io::BufWriter::new(file), &antibody_structure()).unwrap();
            Self {
                dir,
                store: Arc::new(MemoryTaskStore::new()),
            }
        }

        fn orchestrator(&self) -> Orchestrator {
            let settings = Settings {
                storage_root: self.dir.path().join("jobs"),
                ..Settings::default()
            };
            Orchestrator::new(settings, self.store.clone())
        }

        fn request(&self, hotspots: &[&str], tools: Vec<ToolConfig>) -> JobRequest {
            JobRequest {
                target: self.dir.path().join("target.pdb"),
                scaffold: None,
                scaffold_chain: None,
                numbering_scheme: None,
                hotspots: hotspots.iter().map(|h| HotspotSpec::from(*h)).collect(),
                hotspot_scope: None,
                chain_roles: BTreeMap::new(),
                strict_hotspots: false,
                tools,
            }
        }
    }

    fn custom_tool(name: &str, outputs: &[&str]) -> ToolConfig {
        ToolConfig::Custom {
            name: name.to_string(),
            program: Program::Executable {
                path: PathBuf::from("/opt/tools/design"),
            },
            args: vec!["{structure}".into(), "{hotspots}".into(), "{output_dir}".into()],
            hotspots_format: HotspotsFormat::Report,
            inputs: BTreeMap::new(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            env: BTreeMap::new(),
            timeout_secs: Some(1),
            max_attempts: Some(2),
        }
    }

    #[tokio::test]
    async fn run_reports_each_requested_hotspot_in_the_json_report() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();

        let outcome = orchestrator
            .submit_and_run(
                fixture.request(&["H:5", "L:52A", "H:999"], Vec::new()),
                CancelSignal::never(),
            )
            .await
            .unwrap();

        let result = &outcome.result;
        assert_eq!(result.status, TaskStatus::Succeeded);
        assert_eq!(result.hotspot_summary.resolved, 2);
        assert_eq!(result.hotspot_summary.not_found, 1);

        let report_path = result.exports.file("report").unwrap();
        let report: serde_json::Value =
            serde_json::from_slice(&std::fs::read(report_path).unwrap()).unwrap();
        let entries = report["hotspots"].as_array().unwrap();
        let listed: Vec<(&str, &str)> = entries
            .iter()
            .map(|e| (e["input"].as_str().unwrap(), e["status"].as_str().unwrap()))
            .collect();
        assert_eq!(
            listed,
            vec![("H:5", "resolved"), ("L:52A", "resolved"), ("H:999", "not_found")]
        );
        assert_eq!(report["not_found"], serde_json::json!(["H:999"]));

        assert!(result.job_dir.join(MAPPING_FILE).exists());
        assert!(result.job_dir.join(JOB_RESULT_FILE).exists());
        assert_eq!(outcome.mapping.len(), result.residue_count);
    }

    #[tokio::test]
    async fn run_keeps_tool_failures_scoped_to_the_tool() {
        let fixture = Fixture::new();
        let orchestrator = fixture
            .orchestrator()
            .with_supervisor(ToolSupervisor::new(Arc::new(SplitRunner)));
        let submitted = orchestrator
            .submit(fixture.request(
                &["H:5", "L:52A"],
                vec![
                    custom_tool("tool-a", &["outputs/*.pdb"]),
                    custom_tool("tool-b", &["outputs/*.pdb"]),
                ],
            ))
            .unwrap();

        let outcome = orchestrator
            .run(&submitted, CancelSignal::never())
            .await
            .unwrap();
        let result = &outcome.result;

        let tool_a = result.tool("tool-a").unwrap();
        assert_eq!(tool_a.status, InvocationState::Succeeded);
        assert_eq!(tool_a.output_artifacts.len(), 1);
        assert!(
            result
                .job_dir
                .join("tools/tool-a/inputs/standardized_target.cif")
                .exists()
        );

        let tool_b = result.tool("tool-b").unwrap();
        assert_eq!(tool_b.status, InvocationState::Failed);
        assert_eq!(tool_b.attempts_made, 2);
        assert_eq!(tool_b.failure, Some(ToolFailure::ToolTimeout { timeout_secs: 1 }));

        assert_eq!(result.status, TaskStatus::Succeeded);
        assert!(result.exports.file("report").is_some());
        assert!(result.exports.file("annotated_structure").is_some());

        let record = fixture.store.get(&submitted.id).unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Succeeded);
        assert_eq!(
            record.result.unwrap()["tools"]["tool-b"]["failure"]["kind"],
            "ToolTimeout"
        );
    }

    #[tokio::test]
    async fn run_aborts_strict_jobs_with_unresolved_hotspots() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let mut request = fixture.request(&["H:5", "H:999", "A:"], Vec::new());
        request.strict_hotspots = true;
        let submitted = orchestrator.submit(request).unwrap();

        let err = orchestrator
            .run(&submitted, CancelSignal::never())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "MalformedHotspot");
        assert!(matches!(
            &err,
            PipelineError::UnresolvedHotspots { tokens, .. } if tokens.len() == 2
        ));
        let record = fixture.store.get(&submitted.id).unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.unwrap().kind, "MalformedHotspot");
    }

    #[tokio::test]
    async fn run_fails_jobs_with_malformed_hotspots_even_when_lenient() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let submitted = orchestrator
            .submit(fixture.request(&["A:52AB", "A:", "H:5"], Vec::new()))
            .unwrap();

        let err = orchestrator
            .run(&submitted, CancelSignal::never())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "MalformedHotspot");
        assert!(matches!(
            &err,
            PipelineError::UnresolvedHotspots { malformed: 2, tokens } if tokens.len() == 2
        ));
        let record = fixture.store.get(&submitted.id).unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.unwrap().kind, "MalformedHotspot");

        let report_path = fixture
            .dir
            .path()
            .join("jobs")
            .join(&submitted.id)
            .join("exports")
            .join(export::REPORT_FILE);
        let report: serde_json::Value =
            serde_json::from_slice(&std::fs::read(report_path).unwrap()).unwrap();
        assert_eq!(report["malformed"], serde_json::json!(["A:52AB", "A:"]));
        assert_eq!(report["resolved"], serde_json::json!(["H:5"]));
    }

    #[tokio::test]
    async fn run_handles_mmcif_targets_with_insertion_codes() {
        let fixture = Fixture::new();
        std::fs::write(
            fixture.dir.path().join("target.cif"),
            "\
data_target
loop_
_atom_site.group_PDB
_atom_site.id
_atom_site.type_symbol
_atom_site.label_atom_id
_atom_site.label_comp_id
_atom_site.label_asym_id
_atom_site.label_seq_id
_atom_site.pdbx_PDB_ins_code
_atom_site.Cartn_x
_atom_site.Cartn_y
_atom_site.Cartn_z
_atom_site.auth_seq_id
_atom_site.auth_asym_id
ATOM 1 C CA SER A 1 . 1.0 0.0 0.0 52 L
ATOM 2 C CA GLY A 2 A 2.0 0.0 0.0 52 L
ATOM 3 C CA TYR A 3 . 3.0 0.0 0.0 53 L
ATOM 4 C CA GLU B 1 . 0.0 1.0 0.0 1 H
ATOM 5 C CA VAL B 2 . 0.0 2.0 0.0 2 H
",
        )
        .unwrap();
        let orchestrator = fixture
            .orchestrator()
            .with_supervisor(ToolSupervisor::new(Arc::new(SplitRunner)));
        let mut request = fixture.request(
            &["L:52A", "H:2", "L:54"],
            vec![custom_tool("tool-a", &["outputs/*.pdb"])],
        );
        request.target = fixture.dir.path().join("target.cif");

        let outcome = orchestrator
            .submit_and_run(request, CancelSignal::never())
            .await
            .unwrap();
        let result = &outcome.result;

        assert_eq!(result.status, TaskStatus::Succeeded);
        assert_eq!(result.target.input_format, crate::io::StructureFormat::Mmcif);
        assert_eq!(result.target.chain_id_map.get("L").map(String::as_str), Some("B"));
        assert_eq!(result.hotspot_summary.resolved, 2);
        assert_eq!(result.hotspot_summary.not_found, 1);

        let inserted = result.hotspots[0].matched.as_ref().unwrap();
        assert_eq!(inserted.canonical_chain_id, "B");
        assert_eq!(inserted.canonical_sequence_position, 1);
        assert_eq!(inserted.residue_name, "GLY");
        assert!(result.tool("tool-a").unwrap().succeeded());
    }

    fn write_scaffold(fixture: &Fixture) -> PathBuf {
        let path = fixture.dir.path().join("scaffold.pdb");
        let file = std::fs::File::create(&path).unwrap();
        write_pdb_structure(std::io::BufWriter::new(file), &antibody_structure()).unwrap();
        path
    }

    #[tokio::test]
    async fn run_annotates_scaffold_cdrs_for_rfantibody() {
        let fixture = Fixture::new();
        let orchestrator = fixture
            .orchestrator()
            .with_supervisor(ToolSupervisor::new(Arc::new(SplitRunner)))
            .with_numbering(Arc::new(FixedNumbering(vec![("H1", "QLV")])));
        let mut request = fixture.request(
            &["H:5"],
            vec![ToolConfig::Rfantibody {
                name: Some("tool-a".into()),
                image: "rfantibody".into(),
                num_designs: 1,
                timeout_secs: Some(5),
                max_attempts: Some(1),
            }],
        );
        request.scaffold = Some(write_scaffold(&fixture));

        let outcome = orchestrator
            .submit_and_run(request, CancelSignal::never())
            .await
            .unwrap();
        let result = &outcome.result;
        let scaffold = result.scaffold.as_ref().unwrap();

        assert!(scaffold.cdrs.succeeded());
        assert_eq!(scaffold.cdrs.chain_id.as_deref(), Some("H"));
        assert_eq!(scaffold.cdrs.mapped().count(), 1);
        assert!(scaffold.mapping_report.exists());
        let written: CdrLabelMapping =
            serde_json::from_slice(&std::fs::read(&scaffold.cdr_mapping).unwrap()).unwrap();
        assert_eq!(&written, &scaffold.cdrs);

        let hlt = std::fs::read_to_string(scaffold.hlt.as_ref().unwrap()).unwrap();
        assert!(hlt.contains("REMARK PDBinfo-LABEL:    3 H1_start"));
        assert!(hlt.contains("REMARK PDBinfo-LABEL:    5 H1_end"));
        assert_eq!(scaffold.chain_roles.get("H").map(String::as_str), Some("H"));

        let hotspot_file =
            std::fs::read_to_string(result.exports.file("rfantibody").unwrap()).unwrap();
        assert!(hotspot_file.contains("antibody.design_loops=[H1:2-4]"));

        assert!(result.tool("tool-a").unwrap().succeeded());
        assert!(
            result
                .job_dir
                .join("tools/tool-a/inputs")
                .join(export::SCAFFOLD_HLT_FILE)
                .exists()
        );
    }

    #[tokio::test]
    async fn run_without_numbering_service_keeps_the_scaffold_unannotated() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let mut request = fixture.request(&["H:5"], Vec::new());
        request.scaffold = Some(write_scaffold(&fixture));

        let outcome = orchestrator
            .submit_and_run(request, CancelSignal::never())
            .await
            .unwrap();
        let scaffold = outcome.result.scaffold.as_ref().unwrap();

        assert!(!scaffold.cdrs.succeeded());
        assert_eq!(
            scaffold.cdrs.reason.as_deref(),
            Some("no numbering service configured")
        );
        assert!(scaffold.cdr_mapping.exists());
        assert!(scaffold.hlt.is_some());
        assert_eq!(
            scaffold.warnings,
            vec!["CDR annotation failed: no numbering service configured".to_string()]
        );
        let hotspot_file =
            std::fs::read_to_string(outcome.result.exports.file("rfantibody").unwrap()).unwrap();
        assert!(!hotspot_file.contains("design_loops"));
    }

    #[tokio::test]
    async fn run_fails_targets_without_polymer_chains() {
        let fixture = Fixture::new();
        std::fs::write(fixture.dir.path().join("target.pdb"), "REMARK nothing here\n").unwrap();
        let orchestrator = fixture.orchestrator();

        let err = orchestrator
            .submit_and_run(
                fixture.request(&["H:5"], vec![custom_tool("tool-a", &[])]),
                CancelSignal::never(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "EmptyStructure");
    }

    #[tokio::test]
    async fn run_marks_jobs_cancelled_before_they_start() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let submitted = orchestrator
            .submit(fixture.request(&["H:5"], Vec::new()))
            .unwrap();
        let handle = CancelHandle::new();
        handle.cancel();

        let err = orchestrator
            .run(&submitted, handle.signal())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        let record = fixture.store.get(&submitted.id).unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
    }

    #[test]
    fn submit_rejects_invalid_jobs_without_creating_tasks() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let mut request = fixture.request(&[], Vec::new());
        request.target = fixture.dir.path().join("missing.pdb");

        let err = orchestrator.submit(request).unwrap_err();
        assert_eq!(err.kind(), "InvalidConfiguration");
    }
}
