//! Downstream artifact exporters.
//!
//! Every exporter is a function of the mapping table and the resolved hotspots. Hotspots that
//! did not resolve are left out of each artifact and reported as
//! [`ExportWarning::PartialHotspotExport`]; exporters never re-resolve them.
//!
//! [`export_all`] writes the full artifact set into one directory. Only the JSON report is
//! required; any other artifact that cannot be produced is skipped with a warning.
//! [`export_scaffold`] writes the scaffold's HLT file with its CDR remarks.

pub mod boltzgen;
pub mod hlt;
pub mod remark;
pub mod report;
pub mod rfantibody;
pub mod roles;

pub use roles::{ChainRoles, assign_chain_roles};

use crate::hotspot::{HotspotScope, HotspotStatus, ResolvedHotspot};
use crate::io;
use crate::mapping::{MappingResidue, MappingResult};
use crate::numbering::CdrLabelMapping;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const REPORT_FILE: &str = "hotspots_report.json";
pub const RFANTIBODY_FILE: &str = "hotspots.rfantibody.txt";
pub const BOLTZGEN_FILE: &str = "boltzgen_binding.yaml";
pub const ANNOTATED_FILE: &str = "standardized_target.annotated.cif";
pub const REMARK_VALIDATION_FILE: &str = "remark_validation.json";
pub const HLT_FILE: &str = "target.HLT.pdb";
pub const HLT_CHAIN_MAP_FILE: &str = "target.HLT.chain_map.json";
pub const HLT_REMARK_VALIDATION_FILE: &str = "target.HLT.remark_validation.json";
pub const SCAFFOLD_HLT_FILE: &str = "scaffold.HLT.pdb";
pub const SCAFFOLD_HLT_CHAIN_MAP_FILE: &str = "scaffold.HLT.chain_map.json";
pub const SCAFFOLD_HLT_REMARK_VALIDATION_FILE: &str = "scaffold.HLT.remark_validation.json";

/// File names of one HLT export.
struct HltFiles {
    pdb: &'static str,
    chain_map: &'static str,
    validation: &'static str,
}

const TARGET_HLT: HltFiles = HltFiles {
    pdb: HLT_FILE,
    chain_map: HLT_CHAIN_MAP_FILE,
    validation: HLT_REMARK_VALIDATION_FILE,
};

const SCAFFOLD_HLT: HltFiles = HltFiles {
    pdb: SCAFFOLD_HLT_FILE,
    chain_map: SCAFFOLD_HLT_CHAIN_MAP_FILE,
    validation: SCAFFOLD_HLT_REMARK_VALIDATION_FILE,
};

/// Non-fatal export outcome attached to the job result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportWarning {
    /// Unresolved hotspots were left out of an artifact.
    PartialHotspotExport {
        artifact: String,
        omitted: Vec<String>,
    },
    /// An optional artifact could not be produced.
    ArtifactSkipped { artifact: String, reason: String },
}

impl fmt::Display for ExportWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PartialHotspotExport { artifact, omitted } => write!(
                f,
                "{artifact}: omitted {} unresolved hotspot(s): {}",
                omitted.len(),
                omitted.join(", ")
            ),
            Self::ArtifactSkipped { artifact, reason } => {
                write!(f, "{artifact}: skipped ({reason})")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to serialize JSON artifact: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to serialize YAML artifact: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("structure export failed: {0}")]
    Structure(#[from] io::Error),
    #[error("remark validation failed for {artifact}: {failed} of {total} remark lines do not resolve")]
    RemarkValidation {
        artifact: String,
        failed: usize,
        total: usize,
    },
    #[error("failed to access '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Bytes of one artifact plus the warnings raised while rendering it.
#[derive(Debug, Clone, Default)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub warnings: Vec<ExportWarning>,
}

/// Splits hotspots into resolved residues and, when anything was left out, a
/// `PartialHotspotExport` warning for `artifact`.
pub(crate) fn resolved_residues<'a>(
    hotspots: &'a [ResolvedHotspot],
    artifact: &str,
) -> (Vec<&'a MappingResidue>, Option<ExportWarning>) {
    let mut residues = Vec::with_capacity(hotspots.len());
    let mut omitted = Vec::new();
    for hotspot in hotspots {
        match (&hotspot.status, &hotspot.matched) {
            (HotspotStatus::Resolved, Some(residue)) => residues.push(residue),
            _ => omitted.push(hotspot.token()),
        }
    }

    let warning = (!omitted.is_empty()).then(|| {
        warn!(artifact, omitted = omitted.len(), "omitting unresolved hotspots");
        ExportWarning::PartialHotspotExport {
            artifact: artifact.to_string(),
            omitted,
        }
    });
    (residues, warning)
}

/// Artifacts written by [`export_all`], keyed by artifact name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOutcome {
    pub files: BTreeMap<String, PathBuf>,
    pub chain_roles: BTreeMap<String, String>,
    pub warnings: Vec<ExportWarning>,
}

impl ExportOutcome {
    pub fn file(&self, artifact: &str) -> Option<&Path> {
        self.files.get(artifact).map(PathBuf::as_path)
    }

    fn skip(&mut self, artifact: &str, err: ExportError) {
        warn!(artifact, error = %err, "skipping artifact");
        self.warnings.push(ExportWarning::ArtifactSkipped {
            artifact: artifact.to_string(),
            reason: err.to_string(),
        });
    }
}

/// Writes every artifact into `out_dir`.
///
/// Placed scaffold CDRs, when given, add a `design_loops` line to the RFantibody file.
///
/// # Errors
///
/// Fails only when the output directory or the JSON report cannot be written. Other
/// artifacts degrade to [`ExportWarning::ArtifactSkipped`].
pub fn export_all(
    mapping: &MappingResult,
    hotspots: &[ResolvedHotspot],
    scope: HotspotScope,
    role_hints: &BTreeMap<String, String>,
    cdrs: Option<&CdrLabelMapping>,
    out_dir: &Path,
) -> Result<ExportOutcome, ExportError> {
    fs::create_dir_all(out_dir).map_err(|source| ExportError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let roles = assign_chain_roles(&mapping.author_chains(), role_hints);
    let mut outcome = ExportOutcome {
        chain_roles: roles.to_map(),
        ..ExportOutcome::default()
    };

    let hotspot_file = rfantibody::render(mapping, hotspots, &roles, cdrs);
    match write_artifact(out_dir, RFANTIBODY_FILE, &hotspot_file.bytes) {
        Ok(path) => {
            outcome.files.insert("rfantibody".into(), path);
            outcome.warnings.extend(hotspot_file.warnings);
        }
        Err(err) => outcome.skip("rfantibody", err),
    }

    let binding = boltzgen::render(hotspots).and_then(|rendered| {
        let path = write_artifact(out_dir, BOLTZGEN_FILE, &rendered.bytes)?;
        Ok((path, rendered))
    });
    match binding {
        Ok((path, rendered)) => {
            outcome.files.insert("boltzgen".into(), path);
            outcome.warnings.extend(rendered.warnings);
        }
        Err(err) => outcome.skip("boltzgen", err),
    }

    match write_annotated(mapping, hotspots, out_dir, &mut outcome) {
        Ok(warnings) => outcome.warnings.extend(warnings),
        Err(err) => outcome.skip("annotated_structure", err),
    }

    let hlt = hlt::render(mapping, hotspots, &roles, None)
        .and_then(|export| write_hlt(export, &TARGET_HLT, "hlt", out_dir, &mut outcome));
    match hlt {
        Ok(warnings) => outcome.warnings.extend(warnings),
        Err(err) => outcome.skip("hlt", err),
    }

    let summary = report::build_report(mapping, hotspots, scope, &outcome.warnings);
    let path = write_artifact(out_dir, REPORT_FILE, &report::render(&summary)?)?;
    outcome.files.insert("report".into(), path);

    info!(
        dir = %out_dir.display(),
        artifacts = outcome.files.len(),
        warnings = outcome.warnings.len(),
        "exported hotspot artifacts"
    );
    Ok(outcome)
}

/// Writes only the JSON hotspot report into `out_dir`.
///
/// Used when hotspot resolution rejects a job, so the user still sees which hotspots failed.
pub fn export_report(
    mapping: &MappingResult,
    hotspots: &[ResolvedHotspot],
    scope: HotspotScope,
    out_dir: &Path,
) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(out_dir).map_err(|source| ExportError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;
    let summary = report::build_report(mapping, hotspots, scope, &[]);
    write_artifact(out_dir, REPORT_FILE, &report::render(&summary)?)
}

fn write_annotated(
    mapping: &MappingResult,
    hotspots: &[ResolvedHotspot],
    out_dir: &Path,
    outcome: &mut ExportOutcome,
) -> Result<Vec<ExportWarning>, ExportError> {
    let annotated = remark::annotate_canonical(mapping, hotspots)?;
    let validation_path = write_artifact(
        out_dir,
        REMARK_VALIDATION_FILE,
        &serde_json::to_vec_pretty(&annotated.validation)?,
    )?;
    outcome
        .files
        .insert("remark_validation".into(), validation_path);

    if !annotated.validation.ok {
        return Err(ExportError::RemarkValidation {
            artifact: ANNOTATED_FILE.to_string(),
            failed: annotated.validation.failures(),
            total: annotated.validation.details.len(),
        });
    }

    let path = write_artifact(out_dir, ANNOTATED_FILE, &annotated.rendered.bytes)?;
    outcome.files.insert("annotated_structure".into(), path);
    Ok(annotated.rendered.warnings)
}

/// Writes the scaffold HLT file into `out_dir`.
///
/// The numbered CDR chain is hinted as the heavy chain unless `role_hints` already places it;
/// every mapped CDR becomes a `<name>_start` / `<name>_end` remark pair.
///
/// # Errors
///
/// Fails when the file cannot be rendered or written, or when a remark does not resolve.
pub fn export_scaffold(
    mapping: &MappingResult,
    cdrs: Option<&CdrLabelMapping>,
    role_hints: &BTreeMap<String, String>,
    out_dir: &Path,
) -> Result<ExportOutcome, ExportError> {
    fs::create_dir_all(out_dir).map_err(|source| ExportError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let mut hints = role_hints.clone();
    if let Some(chain) = cdrs.and_then(|c| c.chain_id.as_deref()) {
        let hinted = hints.iter().any(|(key, value)| key == chain || value == chain);
        if !hinted {
            hints.insert(chain.to_string(), "H".to_string());
        }
    }
    let roles = assign_chain_roles(&mapping.author_chains(), &hints);
    let mut outcome = ExportOutcome {
        chain_roles: roles.to_map(),
        ..ExportOutcome::default()
    };

    let export = hlt::render(mapping, &[], &roles, cdrs)?;
    let warnings = write_hlt(export, &SCAFFOLD_HLT, "scaffold_hlt", out_dir, &mut outcome)?;
    outcome.warnings.extend(warnings);
    info!(dir = %out_dir.display(), chains = roles.len(), "exported scaffold HLT file");
    Ok(outcome)
}

fn write_hlt(
    export: hlt::HltExport,
    files: &HltFiles,
    artifact: &str,
    out_dir: &Path,
    outcome: &mut ExportOutcome,
) -> Result<Vec<ExportWarning>, ExportError> {
    let validation_path = write_artifact(
        out_dir,
        files.validation,
        &serde_json::to_vec_pretty(&export.validation)?,
    )?;
    outcome
        .files
        .insert(format!("{artifact}_remark_validation"), validation_path);

    if !export.validation.ok {
        return Err(ExportError::RemarkValidation {
            artifact: files.pdb.to_string(),
            failed: export.validation.failures(),
            total: export.validation.details.len(),
        });
    }

    let pdb_path = write_artifact(out_dir, files.pdb, &export.pdb)?;
    let map_path = write_artifact(
        out_dir,
        files.chain_map,
        &serde_json::to_vec_pretty(&export.chain_map)?,
    )?;
    outcome.files.insert(artifact.to_string(), pdb_path);
    outcome.files.insert(format!("{artifact}_chain_map"), map_path);
    Ok(export.warnings)
}

fn write_artifact(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, ExportError> {
    let path = dir.join(name);
    fs::write(&path, bytes).map_err(|source| ExportError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotspot::{HotspotSpec, resolve_hotspots};
    use crate::mapping::tests::{antibody_structure, mapping_for};
    use crate::numbering::{CdrScheme, CdrSegment, SequenceNumbering, map_cdrs};
    use tempfile::TempDir;

    #[test]
    fn resolved_residues_flags_everything_not_resolved() {
        let dir = TempDir::new().unwrap();
        let mapping = mapping_for(antibody_structure(), dir.path());
        let hotspots = resolve_hotspots(
            &[HotspotSpec::from("H:5"), HotspotSpec::from("bad"), HotspotSpec::from("Z:1")],
            &mapping,
            HotspotScope::Protein,
        );

        let (residues, warning) = resolved_residues(&hotspots, "unit");

        assert_eq!(residues.len(), 1);
        assert_eq!(
            warning,
            Some(ExportWarning::PartialHotspotExport {
                artifact: "unit".into(),
                omitted: vec!["bad".into(), "Z:1".into()],
            })
        );
    }

    #[test]
    fn export_all_writes_every_artifact() {
        let dir = TempDir::new().unwrap();
        let mapping = mapping_for(antibody_structure(), &dir.path().join("target"));
        let hotspots = resolve_hotspots(
            &[HotspotSpec::from("H:5"), HotspotSpec::from("L:52A"), HotspotSpec::from("H:999")],
            &mapping,
            HotspotScope::Protein,
        );
        let out = dir.path().join("exports");

        let outcome =
            export_all(&mapping, &hotspots, HotspotScope::Protein, &BTreeMap::new(), None, &out)
                .unwrap();

        for artifact in [
            "report",
            "rfantibody",
            "boltzgen",
            "annotated_structure",
            "remark_validation",
            "hlt",
            "hlt_chain_map",
            "hlt_remark_validation",
        ] {
            let path = outcome.file(artifact).unwrap();
            assert!(path.exists(), "{artifact} missing");
        }
        assert_eq!(outcome.chain_roles.get("H").map(String::as_str), Some("H"));
        assert!(outcome.warnings.iter().all(|w| matches!(
            w,
            ExportWarning::PartialHotspotExport { omitted, .. } if omitted == &vec!["H:999".to_string()]
        )));
        assert_eq!(outcome.warnings.len(), 4);

        let report: serde_json::Value =
            serde_json::from_slice(&fs::read(outcome.file("report").unwrap()).unwrap()).unwrap();
        assert_eq!(report["warnings"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn export_warning_display_names_omitted_hotspots() {
        let warning = ExportWarning::PartialHotspotExport {
            artifact: "boltzgen".into(),
            omitted: vec!["H:999".into()],
        };
        assert_eq!(
            warning.to_string(),
            "boltzgen: omitted 1 unresolved hotspot(s): H:999"
        );
    }

    #[test]
    fn export_scaffold_writes_cdr_remarks_on_the_heavy_chain() {
        let dir = TempDir::new().unwrap();
        let mapping = mapping_for(antibody_structure(), &dir.path().join("scaffold"));
        let numbering = SequenceNumbering {
            numbering: Vec::new(),
            cdrs: vec![CdrSegment { name: "H1".into(), sequence: "NLE".into() }],
        };
        let cdrs = map_cdrs(&numbering, &mapping, "L", CdrScheme::Chothia);
        let out = dir.path().join("scaffold");

        let outcome = export_scaffold(&mapping, Some(&cdrs), &BTreeMap::new(), &out).unwrap();

        assert_eq!(outcome.chain_roles.get("L").map(String::as_str), Some("H"));
        assert_eq!(outcome.chain_roles.get("H").map(String::as_str), Some("L"));
        let pdb = fs::read_to_string(outcome.file("scaffold_hlt").unwrap()).unwrap();
        assert!(pdb.contains("REMARK PDBinfo-LABEL:    4 H1_start"));
        assert!(pdb.contains("REMARK PDBinfo-LABEL:    6 H1_end"));
        assert!(outcome.file("scaffold_hlt_chain_map").unwrap().exists());
        assert!(outcome.file("scaffold_hlt_remark_validation").unwrap().exists());
        assert!(outcome.warnings.is_empty());
    }
}
