//! User-facing hotspot report (`hotspots_report.json`).

use super::{ExportError, ExportWarning};
use crate::hotspot::{HotspotScope, HotspotStatus, HotspotSummary, NotFoundReason, ResolvedHotspot};
use crate::mapping::MappingResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of the report, mirroring a requested hotspot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub input: String,
    pub status: HotspotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_chain_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_sequence_position: Option<usize>,
    /// 1-based index over the canonical file, as used by remark annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub residue_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<NotFoundReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotspotReport {
    pub generated_at: DateTime<Utc>,
    pub scope: HotspotScope,
    pub summary: HotspotSummary,
    pub hotspots: Vec<ReportEntry>,
    pub resolved: Vec<String>,
    pub not_found: Vec<String>,
    pub malformed: Vec<String>,
    pub ambiguous: Vec<String>,
    pub warnings: Vec<ExportWarning>,
}

pub fn build_report(
    mapping: &MappingResult,
    hotspots: &[ResolvedHotspot],
    scope: HotspotScope,
    warnings: &[ExportWarning],
) -> HotspotReport {
    let mut report = HotspotReport {
        generated_at: Utc::now(),
        scope,
        summary: HotspotSummary::from_results(hotspots),
        hotspots: Vec::with_capacity(hotspots.len()),
        resolved: Vec::new(),
        not_found: Vec::new(),
        malformed: Vec::new(),
        ambiguous: Vec::new(),
        warnings: warnings.to_vec(),
    };

    for hotspot in hotspots {
        let token = hotspot.token();
        match hotspot.status {
            HotspotStatus::Resolved => report.resolved.push(token),
            HotspotStatus::NotFound => report.not_found.push(token),
            HotspotStatus::Malformed => report.malformed.push(token),
            HotspotStatus::Ambiguous => report.ambiguous.push(token),
        }

        let matched = hotspot.matched.as_ref();
        report.hotspots.push(ReportEntry {
            input: hotspot.requested.to_string(),
            status: hotspot.status,
            author_ref: hotspot.author_ref.as_ref().map(|a| a.token()),
            canonical_chain_id: matched.map(|m| m.canonical_chain_id.clone()),
            canonical_sequence_position: matched.map(|m| m.canonical_sequence_position),
            absolute_index: matched.and_then(|m| {
                mapping.absolute_index(&m.canonical_chain_id, m.canonical_sequence_position)
            }),
            residue_name: matched.map(|m| m.residue_name.clone()),
            reason: hotspot.reason,
            message: hotspot.message.clone(),
        });
    }

    report
}

pub fn render(report: &HotspotReport) -> Result<Vec<u8>, ExportError> {
    Ok(serde_json::to_vec_pretty(report)?)
}
