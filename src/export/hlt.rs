//! Heavy/light/target PDB export.
//!
//! The canonical structure is re-chained by role (`H`, `L`, `T` first), written as PDB in
//! author numbering, and annotated with hotspot and CDR remarks whose indices count residues in
//! the re-chained file.

use super::remark::{
    RemarkValidation, hotspot_remarks, inject_remarks, remark_line, validate_remarks,
};
use super::roles::ChainRoles;
use super::{ExportError, ExportWarning, resolved_residues};
use crate::hotspot::ResolvedHotspot;
use crate::io::{self, IoContext, StructureFormat};
use crate::mapping::MappingResult;
use crate::model::reference::AuthorRef;
use crate::model::structure::Structure;
use crate::numbering::CdrLabelMapping;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct HltExport {
    pub pdb: Vec<u8>,
    /// Author chain to HLT chain.
    pub chain_map: BTreeMap<String, String>,
    pub remarks: Vec<String>,
    pub validation: RemarkValidation,
    pub warnings: Vec<ExportWarning>,
}

/// Re-chains a canonical structure by role. Chains without a role are left out.
pub fn rechain(canonical: &Structure, mapping: &MappingResult, roles: &ChainRoles) -> Structure {
    let author_of: HashMap<&str, &str> = mapping
        .standardized()
        .chain_id_map
        .iter()
        .map(|(author, canonical)| (canonical.as_str(), author.as_str()))
        .collect();

    let mut out = Structure::new();
    out.cell = canonical.cell;
    for (author_chain, role) in roles.ordered() {
        let source = canonical.iter_chains().find(|chain| {
            author_of.get(chain.id.as_str()).copied() == Some(author_chain)
        });
        match source {
            Some(chain) => {
                let mut chain = chain.clone();
                chain.id = role.to_string();
                out.add_chain(chain);
            }
            None => warn!(chain = %author_chain, "chain has a role but no canonical counterpart"),
        }
    }
    out
}

/// `<name>_start` and `<name>_end` remarks for every mapped CDR.
///
/// CDRs whose ends are not in `absolute` (their chain was left out of the file) are skipped.
pub fn cdr_remarks(cdrs: &CdrLabelMapping, absolute: &HashMap<AuthorRef, usize>) -> Vec<String> {
    let mut lines = Vec::new();
    for cdr in cdrs.mapped() {
        let (Some(start), Some(end)) = (&cdr.start, &cdr.end) else {
            continue;
        };
        match (absolute.get(&start.author), absolute.get(&end.author)) {
            (Some(&first), Some(&last)) => {
                lines.push(remark_line(first, &format!("{}_start", cdr.cdr_name)));
                lines.push(remark_line(last, &format!("{}_end", cdr.cdr_name)));
            }
            _ => warn!(cdr = %cdr.cdr_name, "CDR chain is not part of the HLT file"),
        }
    }
    lines
}

pub fn render(
    mapping: &MappingResult,
    hotspots: &[ResolvedHotspot],
    roles: &ChainRoles,
    cdrs: Option<&CdrLabelMapping>,
) -> Result<HltExport, ExportError> {
    let canonical = mapping.standardized().read_canonical()?;
    let hlt = rechain(&canonical, mapping, roles);

    let absolute: HashMap<AuthorRef, usize> = hlt
        .iter_residues_with_chain()
        .enumerate()
        .map(|(i, (chain, residue))| (residue.author_ref(&chain.id), i + 1))
        .collect();

    let (residues, warning) = resolved_residues(hotspots, "hlt");
    let mut remarks = hotspot_remarks(
        residues
            .iter()
            .filter_map(|r| absolute.get(&r.author_ref).copied()),
    );
    if let Some(cdrs) = cdrs {
        remarks.extend(cdr_remarks(cdrs, &absolute));
    }

    let mut buffer = Vec::new();
    io::write_pdb_structure(&mut buffer, &hlt)?;
    let content = String::from_utf8_lossy(&buffer);
    let annotated = inject_remarks(&content, &remarks, StructureFormat::Pdb);

    let written = io::read_pdb_structure(Cursor::new(annotated.as_bytes()), &IoContext::new_default())?;
    let validation = validate_remarks(&written.structure, &remarks);

    Ok(HltExport {
        pdb: annotated.into_bytes(),
        chain_map: roles.to_map(),
        remarks,
        validation,
        warnings: warning.into_iter().collect(),
    })
}
