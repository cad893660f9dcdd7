//! BoltzGen binding-site specification (`boltzgen_binding.yaml`).

use super::{ExportError, ExportWarning, Rendered, resolved_residues};
use crate::hotspot::ResolvedHotspot;
use crate::standardize::chain_sort_key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingDocument {
    pub binding_types: Vec<BindingType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingType {
    pub chain: BindingChain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingChain {
    /// Canonical chain identifier.
    pub id: String,
    /// Comma-separated 1-based canonical positions, ascending.
    pub binding: String,
}

/// Groups resolved hotspots by canonical chain, in canonical chain order.
pub fn binding_document(hotspots: &[ResolvedHotspot]) -> (BindingDocument, Vec<ExportWarning>) {
    let (residues, warning) = resolved_residues(hotspots, "boltzgen");

    let mut per_chain: BTreeMap<(usize, Vec<u32>), (String, Vec<usize>)> = BTreeMap::new();
    for residue in residues {
        let chain = &residue.canonical_chain_id;
        per_chain
            .entry(chain_sort_key(chain))
            .or_insert_with(|| (chain.clone(), Vec::new()))
            .1
            .push(residue.canonical_sequence_position + 1);
    }

    let binding_types = per_chain
        .into_values()
        .map(|(id, mut positions)| {
            positions.sort_unstable();
            positions.dedup();
            let binding = positions
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(",");
            BindingType {
                chain: BindingChain { id, binding },
            }
        })
        .collect();

    (BindingDocument { binding_types }, warning.into_iter().collect())
}

pub fn render(hotspots: &[ResolvedHotspot]) -> Result<Rendered, ExportError> {
    let (document, warnings) = binding_document(hotspots);
    let yaml = serde_yaml::to_string(&document)?;
    Ok(Rendered {
        bytes: yaml.into_bytes(),
        warnings,
    })
}
