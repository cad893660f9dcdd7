//! RFantibody hotspot file (`hotspots.rfantibody.txt`).
//!
//! ```text
//! chain_roles=H:H,L:L,A:T
//! sequence.H=EVQLVESGGG
//! sequence.L=DASNLESG
//! ppi.hotspot_res=[T54,T56A]
//! antibody.design_loops=[H1:25-31,H3:97-108]
//! ```
//!
//! The `design_loops` line is written only when scaffold CDRs were placed; its ranges are
//! inclusive canonical positions on the numbered scaffold chain.

use super::roles::ChainRoles;
use super::{Rendered, resolved_residues};
use crate::hotspot::ResolvedHotspot;
use crate::mapping::MappingResult;
use crate::model::reference::AuthorRef;
use crate::numbering::CdrLabelMapping;

/// `ppi.hotspot_res=[...]` with one `<role><number><insertion code>` token per hotspot.
///
/// Chains without a role keep their author identifier. Repeated tokens are dropped.
pub fn format_hotspot_res<'a>(
    hotspots: impl IntoIterator<Item = &'a AuthorRef>,
    roles: &ChainRoles,
) -> String {
    let mut tokens: Vec<String> = Vec::new();
    for author in hotspots {
        let chain = roles
            .role(&author.chain)
            .map(String::from)
            .unwrap_or_else(|| author.chain.clone());
        let token = format!("{chain}{}", author.residue_token());
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    format!("ppi.hotspot_res=[{}]", tokens.join(","))
}

/// `antibody.design_loops=[...]` with one `<name>:<start>-<end>` token per mapped CDR.
pub fn format_design_loops(cdrs: &CdrLabelMapping) -> Option<String> {
    let loops: Vec<String> = cdrs
        .mapped()
        .filter_map(|cdr| {
            cdr.canonical_range()
                .map(|(start, end)| format!("{}:{start}-{end}", cdr.cdr_name))
        })
        .collect();
    (!loops.is_empty()).then(|| format!("antibody.design_loops=[{}]", loops.join(",")))
}

pub fn render(
    mapping: &MappingResult,
    hotspots: &[ResolvedHotspot],
    roles: &ChainRoles,
    cdrs: Option<&CdrLabelMapping>,
) -> Rendered {
    let (residues, warning) = resolved_residues(hotspots, "rfantibody");
    let chains = mapping.chains();

    let mut lines = vec![format!("chain_roles={roles}")];
    for (author_chain, role) in roles.ordered() {
        let sequence = chains
            .iter()
            .find(|c| c.author_chain_id == author_chain)
            .map(|c| c.sequence.as_str())
            .unwrap_or_default();
        if !sequence.is_empty() {
            lines.push(format!("sequence.{role}={sequence}"));
        }
    }
    lines.push(format_hotspot_res(
        residues.iter().map(|r| &r.author_ref),
        roles,
    ));
    if let Some(design_loops) = cdrs.and_then(format_design_loops) {
        lines.push(design_loops);
    }

    let mut text = lines.join("\n");
    text.push('\n');
    Rendered {
        bytes: text.into_bytes(),
        warnings: warning.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportWarning;
    use crate::export::roles::assign_chain_roles;
    use crate::hotspot::{HotspotScope, HotspotSpec, resolve_hotspots};
    use crate::mapping::tests::{antibody_structure, mapping_for};
    use crate::numbering::{CdrScheme, CdrSegment, SequenceNumbering, map_cdrs};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn format_hotspot_res_uses_role_letters_and_insertion_codes() {
        let hints = BTreeMap::from([("A".to_string(), "T".to_string())]);
        let roles = assign_chain_roles(&["A", "B"], &hints);
        let refs = [
            AuthorRef::new("A", 54, None),
            AuthorRef::new("B", 10, Some('A')),
            AuthorRef::new("A", 54, None),
        ];

        assert_eq!(format_hotspot_res(&refs, &roles), "ppi.hotspot_res=[T54,H10A]");
    }

    #[test]
    fn format_hotspot_res_keeps_author_chain_without_role() {
        let roles = ChainRoles::default();
        let refs = [AuthorRef::new("B", 10, Some('A'))];

        assert_eq!(format_hotspot_res(&refs, &roles), "ppi.hotspot_res=[B10A]");
    }

    #[test]
    fn render_writes_roles_sequences_and_resolved_hotspots() {
        let dir = TempDir::new().unwrap();
        let mapping = mapping_for(antibody_structure(), dir.path());
        let roles = assign_chain_roles(&mapping.author_chains(), &BTreeMap::new());
        let hotspots = resolve_hotspots(
            &[HotspotSpec::from("H:5"), HotspotSpec::from("L:52A"), HotspotSpec::from("H:999")],
            &mapping,
            HotspotScope::Protein,
        );

        let rendered = render(&mapping, &hotspots, &roles, None);
        let text = String::from_utf8(rendered.bytes).unwrap();

        assert_eq!(
            text,
            "chain_roles=H:H,L:L\nsequence.H=EVQLVESGGG\nsequence.L=DASNLESG\nppi.hotspot_res=[H5,L52A]\n"
        );
        assert!(matches!(
            rendered.warnings.as_slice(),
            [ExportWarning::PartialHotspotExport { artifact, .. }] if artifact == "rfantibody"
        ));
    }

    #[test]
    fn render_appends_design_loops_for_mapped_cdrs() {
        let dir = TempDir::new().unwrap();
        let mapping = mapping_for(antibody_structure(), dir.path());
        let roles = assign_chain_roles(&mapping.author_chains(), &BTreeMap::new());
        let hotspots = resolve_hotspots(&[HotspotSpec::from("H:5")], &mapping, HotspotScope::Protein);
        let numbering = SequenceNumbering {
            numbering: Vec::new(),
            cdrs: vec![
                CdrSegment { name: "H1".into(), sequence: "QLV".into() },
                CdrSegment { name: "H2".into(), sequence: "WWW".into() },
                CdrSegment { name: "H3".into(), sequence: "SGG".into() },
            ],
        };
        let cdrs = map_cdrs(&numbering, &mapping, "H", CdrScheme::Chothia);

        let rendered = render(&mapping, &hotspots, &roles, Some(&cdrs));
        let text = String::from_utf8(rendered.bytes).unwrap();

        assert_eq!(
            text.lines().last(),
            Some("antibody.design_loops=[H1:2-4,H3:6-8]")
        );
        assert!(rendered.warnings.is_empty());
    }

    #[test]
    fn format_design_loops_is_empty_without_mapped_cdrs() {
        let cdrs = CdrLabelMapping::failed(CdrScheme::Chothia, Some("H"), "numbering unavailable");
        assert_eq!(format_design_loops(&cdrs), None);
    }
}
