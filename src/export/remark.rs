//! `REMARK PDBinfo-LABEL` hotspot annotations.
//!
//! Remark lines point at residues by their 1-based absolute index in file order. They are
//! injected after the first line of a PDB file or, as `#` comments, after the `data_` header of
//! an mmCIF file, and are validated against the structure they annotate.

use super::{ExportError, ExportWarning, Rendered, resolved_residues};
use crate::hotspot::ResolvedHotspot;
use crate::io::StructureFormat;
use crate::mapping::MappingResult;
use crate::model::structure::Structure;
use serde::{Deserialize, Serialize};
use std::fs;

pub const REMARK_PREFIX: &str = "REMARK PDBinfo-LABEL:";

const HOTSPOT_LABEL: &str = "HOTSPOT";

pub fn remark_line(index: usize, label: &str) -> String {
    format!("{REMARK_PREFIX} {index:4} {label}")
}

/// Hotspot remark lines for the given absolute indices, in order and without repeats.
pub fn hotspot_remarks(indices: impl IntoIterator<Item = usize>) -> Vec<String> {
    let mut seen = Vec::new();
    indices
        .into_iter()
        .filter(|idx| {
            if seen.contains(idx) {
                false
            } else {
                seen.push(*idx);
                true
            }
        })
        .map(|idx| remark_line(idx, HOTSPOT_LABEL))
        .collect()
}

/// Inserts remark lines into a serialized structure.
pub fn inject_remarks(content: &str, remarks: &[String], format: StructureFormat) -> String {
    let mut lines: Vec<&str> = content.lines().collect();
    let injected: Vec<String> = match format {
        StructureFormat::Pdb => remarks.to_vec(),
        StructureFormat::Mmcif => remarks.iter().map(|line| format!("# {line}")).collect(),
    };

    let anchor = match format {
        StructureFormat::Pdb => usize::from(!lines.is_empty()),
        StructureFormat::Mmcif => lines
            .iter()
            .position(|line| line.trim_start().starts_with("data_"))
            .map_or(0, |idx| idx + 1),
    };

    let tail = lines.split_off(anchor);
    let mut out = String::with_capacity(content.len() + injected.len() * 40);
    for line in lines
        .into_iter()
        .chain(injected.iter().map(String::as_str))
        .chain(tail)
    {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Residue found at a remark's index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemarkResidue {
    pub chain: String,
    pub auth_res: i32,
    pub ins: String,
    pub resname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemarkCheck {
    pub line: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub residue: Option<RemarkResidue>,
}

/// Contents of `remark_validation.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemarkValidation {
    pub ok: bool,
    pub details: Vec<RemarkCheck>,
}

impl RemarkValidation {
    pub fn failures(&self) -> usize {
        self.details.iter().filter(|check| !check.ok).count()
    }
}

/// Checks that every remark index names a residue of `structure`, counting residues in file
/// order across all chains.
pub fn validate_remarks(structure: &Structure, remarks: &[String]) -> RemarkValidation {
    let residues: Vec<RemarkResidue> = structure
        .iter_residues_with_chain()
        .map(|(chain, residue)| {
            let author = residue.author_ref(&chain.id);
            RemarkResidue {
                chain: chain.id.clone(),
                auth_res: author.seq_num,
                ins: author.insertion_code_str(),
                resname: residue.name.clone(),
            }
        })
        .collect();

    let details: Vec<RemarkCheck> = remarks
        .iter()
        .map(|line| {
            let index = line
                .split_whitespace()
                .rev()
                .find_map(|token| token.parse::<usize>().ok());
            let Some(index) = index else {
                return RemarkCheck {
                    line: line.clone(),
                    ok: false,
                    index: None,
                    reason: Some("could_not_parse".to_string()),
                    residue: None,
                };
            };
            match index.checked_sub(1).and_then(|i| residues.get(i)) {
                Some(residue) => RemarkCheck {
                    line: line.clone(),
                    ok: true,
                    index: Some(index),
                    reason: None,
                    residue: Some(residue.clone()),
                },
                None => RemarkCheck {
                    line: line.clone(),
                    ok: false,
                    index: Some(index),
                    reason: Some("index_out_of_range".to_string()),
                    residue: None,
                },
            }
        })
        .collect();

    RemarkValidation {
        ok: details.iter().all(|check| check.ok),
        details,
    }
}

/// Canonical file annotated with hotspot remarks.
#[derive(Debug, Clone)]
pub struct AnnotatedStructure {
    pub rendered: Rendered,
    pub validation: RemarkValidation,
}

/// Annotates the canonical mmCIF file with one remark per resolved hotspot.
///
/// The validation is returned alongside the content; callers decide whether a failed
/// validation drops the artifact.
pub fn annotate_canonical(
    mapping: &MappingResult,
    hotspots: &[ResolvedHotspot],
) -> Result<AnnotatedStructure, ExportError> {
    let standardized = mapping.standardized();
    let (residues, warning) = resolved_residues(hotspots, "annotated_structure");

    let remarks = hotspot_remarks(residues.iter().filter_map(|r| {
        mapping.absolute_index(&r.canonical_chain_id, r.canonical_sequence_position)
    }));

    let content = fs::read_to_string(&standardized.standardized_path).map_err(|source| {
        ExportError::Io {
            path: standardized.standardized_path.clone(),
            source,
        }
    })?;
    let structure = standardized.read_canonical()?;
    let validation = validate_remarks(&structure, &remarks);

    Ok(AnnotatedStructure {
        rendered: Rendered {
            bytes: inject_remarks(&content, &remarks, StructureFormat::Mmcif).into_bytes(),
            warnings: warning.into_iter().collect::<Vec<ExportWarning>>(),
        },
        validation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotspot::{HotspotScope, HotspotSpec, resolve_hotspots};
    use crate::mapping::tests::{antibody_structure, mapping_for};
    use tempfile::TempDir;

    #[test]
    fn remark_line_pads_index_to_four_columns() {
        assert_eq!(remark_line(7, "HOTSPOT"), "REMARK PDBinfo-LABEL:    7 HOTSPOT");
        assert_eq!(remark_line(12345, "H1_start"), "REMARK PDBinfo-LABEL: 12345 H1_start");
    }

    #[test]
    fn hotspot_remarks_drop_repeated_indices() {
        let lines = hotspot_remarks([3, 1, 3]);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("   3 HOTSPOT"));
    }

    #[test]
    fn inject_remarks_places_lines_after_pdb_header() {
        let remarks = vec![remark_line(1, "HOTSPOT")];
        let out = inject_remarks("HEADER x\nATOM 1\nEND\n", &remarks, StructureFormat::Pdb);
        assert_eq!(
            out,
            "HEADER x\nREMARK PDBinfo-LABEL:    1 HOTSPOT\nATOM 1\nEND\n"
        );
    }

    #[test]
    fn inject_remarks_comments_lines_in_mmcif() {
        let remarks = vec![remark_line(2, "HOTSPOT")];
        let out = inject_remarks("data_x\n#\nloop_\n", &remarks, StructureFormat::Mmcif);
        assert_eq!(out, "data_x\n# REMARK PDBinfo-LABEL:    2 HOTSPOT\n#\nloop_\n");
    }

    #[test]
    fn inject_remarks_handles_empty_content() {
        let remarks = vec![remark_line(2, "HOTSPOT")];
        let out = inject_remarks("", &remarks, StructureFormat::Pdb);
        assert_eq!(out, "REMARK PDBinfo-LABEL:    2 HOTSPOT\n");
    }

    #[test]
    fn validate_remarks_flags_out_of_range_indices() {
        let structure = antibody_structure();
        let remarks = vec![remark_line(1, "HOTSPOT"), remark_line(99, "HOTSPOT")];

        let validation = validate_remarks(&structure, &remarks);
        assert!(!validation.ok);
        assert_eq!(validation.failures(), 1);
        assert_eq!(validation.details[0].residue.as_ref().unwrap().chain, "L");
        assert_eq!(
            validation.details[1].reason.as_deref(),
            Some("index_out_of_range")
        );
    }

    #[test]
    fn annotate_canonical_marks_resolved_hotspots_only() {
        let dir = TempDir::new().unwrap();
        let mapping = mapping_for(antibody_structure(), dir.path());
        let hotspots = resolve_hotspots(
            &[HotspotSpec::from("H:5"), HotspotSpec::from("L:52A"), HotspotSpec::from("H:999")],
            &mapping,
            HotspotScope::Protein,
        );

        let annotated = annotate_canonical(&mapping, &hotspots).unwrap();
        let text = String::from_utf8(annotated.rendered.bytes).unwrap();

        assert!(text.starts_with(
            "data_epiforge_standardized\n# REMARK PDBinfo-LABEL:    5 HOTSPOT\n# REMARK PDBinfo-LABEL:   14 HOTSPOT\n"
        ));
        assert!(annotated.validation.ok);
        let residue = annotated.validation.details[1].residue.as_ref().unwrap();
        assert_eq!((residue.auth_res, residue.ins.as_str()), (52, "A"));
        assert!(matches!(
            annotated.rendered.warnings.as_slice(),
            [ExportWarning::PartialHotspotExport { omitted, .. }] if omitted == &vec!["H:999".to_string()]
        ));
    }
}
