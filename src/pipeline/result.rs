//! The single result object of a job.

use super::PipelineError;
use crate::export::ExportOutcome;
use crate::hotspot::{HotspotSummary, ResolvedHotspot};
use crate::mapping::MappingResult;
use crate::numbering::CdrLabelMapping;
use crate::standardize::StandardizedStructure;
use crate::store::TaskStatus;
use crate::supervisor::ToolInvocationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Persisted as `job_result.json` in the job directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    /// `succeeded`, or `cancelled` when a cancellation arrived while tools were running.
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub job_dir: PathBuf,
    pub target: StandardizedStructure,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaffold: Option<ScaffoldResult>,
    pub mapping_report: PathBuf,
    pub residue_count: usize,
    #[serde(default)]
    pub load_warnings: Vec<String>,
    pub hotspot_summary: HotspotSummary,
    pub hotspots: Vec<ResolvedHotspot>,
    pub exports: ExportOutcome,
    /// Per-tool outcomes keyed by tool name.
    pub tools: BTreeMap<String, ToolInvocationResult>,
}

impl JobResult {
    pub fn tool(&self, name: &str) -> Option<&ToolInvocationResult> {
        self.tools.get(name)
    }

    pub fn write(&self, path: &Path) -> Result<(), PipelineError> {
        let bytes = serde_json::to_vec_pretty(self).map_err(PipelineError::ResultEncoding)?;
        std::fs::write(path, bytes).map_err(|source| PipelineError::Workspace {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Compact summary stored with the task record.
    pub fn task_metadata(&self, result_path: &Path) -> Value {
        let tools: BTreeMap<&str, Value> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                (
                    name.as_str(),
                    json!({
                        "status": tool.status,
                        "attempts_made": tool.attempts_made,
                        "failure": tool.failure,
                    }),
                )
            })
            .collect();
        json!({
            "job_result": result_path,
            "mapping_report": self.mapping_report,
            "standardized_target": self.target.standardized_path,
            "scaffold_cdrs_mapped": self.scaffold.as_ref().map(|s| s.cdrs.mapped().count()),
            "hotspots": self.hotspot_summary,
            "export_warnings": self.exports.warnings.len(),
            "tools": tools,
        })
    }
}

/// Scaffold artifacts under `scaffold/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaffoldResult {
    pub standardized: StandardizedStructure,
    pub mapping_report: PathBuf,
    /// `cdr_label_mapping.json`.
    pub cdr_mapping: PathBuf,
    pub cdrs: CdrLabelMapping,
    /// HLT file with CDR remarks, absent when it could not be produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hlt: Option<PathBuf>,
    #[serde(default)]
    pub chain_roles: BTreeMap<String, String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// What [`super::Orchestrator::run`] hands back: the persisted result plus the in-memory
/// mapping table.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub result: JobResult,
    pub mapping: MappingResult,
}
