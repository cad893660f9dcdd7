//! Antibody numbering and CDR placement on the canonical scaffold.
//!
//! Numbering itself is delegated to a [`NumberingService`]. This module only places the CDR
//! segments it reports onto the scaffold's mapping table, so every CDR is expressed in the same
//! canonical positions and author references as hotspots are.

use crate::mapping::{MappingResidue, MappingResult};
use crate::model::reference::AuthorRef;
use crate::model::types::ResidueCategory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Written next to the standardized scaffold.
pub const CDR_MAPPING_FILE: &str = "cdr_label_mapping.json";

/// Upper bound on one numbering call.
pub const NUMBERING_TIMEOUT: Duration = Duration::from_secs(120);

/// Antibody numbering scheme requested from the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdrScheme {
    #[default]
    Chothia,
    Kabat,
    Imgt,
    Aho,
}

impl fmt::Display for CdrScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Chothia => "chothia",
            Self::Kabat => "kabat",
            Self::Imgt => "imgt",
            Self::Aho => "aho",
        })
    }
}

/// One CDR as reported by the numbering service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdrSegment {
    /// Loop name such as `H1` or `L3`.
    pub name: String,
    pub sequence: String,
}

/// Output of [`NumberingService::number_sequence`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceNumbering {
    /// Scheme label of every numbered residue, e.g. `52A`, in sequence order.
    #[serde(default)]
    pub numbering: Vec<String>,
    #[serde(default)]
    pub cdrs: Vec<CdrSegment>,
}

#[derive(Debug, Error)]
pub enum NumberingError {
    #[error("sequence is empty")]
    EmptySequence,
    #[error("failed to run numbering command '{}': {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("numbering command timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("numbering command exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("numbering command produced invalid output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("{0}")]
    Rejected(String),
}

/// Numbers one antibody chain sequence.
#[async_trait]
pub trait NumberingService: Send + Sync {
    async fn number_sequence(
        &self,
        sequence: &str,
        scheme: CdrScheme,
    ) -> Result<SequenceNumbering, NumberingError>;
}

/// Runs an external numbering program.
///
/// The program receives `--scheme <scheme>` after its configured arguments, reads the one-letter
/// sequence on stdin, and prints a [`SequenceNumbering`] as JSON on stdout.
#[derive(Debug, Clone)]
pub struct CommandNumbering {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandNumbering {
    /// Builds a service from a command line such as `["anarci-json", "--chain", "H"]`.
    ///
    /// # Arguments
    ///
    /// * `command` - Program followed by its fixed arguments.
    ///
    /// # Returns
    ///
    /// `None` when `command` is empty.
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: PathBuf::from(program),
            args: args.to_vec(),
            timeout: NUMBERING_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl NumberingService for CommandNumbering {
    async fn number_sequence(
        &self,
        sequence: &str,
        scheme: CdrScheme,
    ) -> Result<SequenceNumbering, NumberingError> {
        if sequence.is_empty() {
            return Err(NumberingError::EmptySequence);
        }
        let spawn_error = |source| NumberingError::Spawn {
            program: self.program.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--scheme")
            .arg(scheme.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(format!("{sequence}\n").as_bytes()).await {
                Ok(()) => {}
                // Programs may exit without reading their input.
                Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(err) => return Err(spawn_error(err)),
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| NumberingError::Timeout(self.timeout))?
            .map_err(spawn_error)?;
        if !output.status.success() {
            return Err(NumberingError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// Where a CDR sequence occurs in a chain sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Located {
    Unique(usize),
    Ambiguous,
    Missing,
}

/// Finds `query` in `sequence`, counting overlapping occurrences.
pub fn locate_subsequence(sequence: &str, query: &str) -> Located {
    if query.is_empty() || query.len() > sequence.len() {
        return Located::Missing;
    }
    let haystack = sequence.as_bytes();
    let needle = query.as_bytes();
    let mut hits = haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(start, _)| start);
    match (hits.next(), hits.next()) {
        (Some(start), None) => Located::Unique(start),
        (Some(_), Some(_)) => Located::Ambiguous,
        (None, _) => Located::Missing,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CdrStatus {
    Mapped,
    Failed,
}

/// One end of a mapped CDR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdrBound {
    pub canonical_sequence_position: usize,
    pub author: AuthorRef,
    /// 1-based chain-major index in the scaffold mapping table.
    pub absolute_index: usize,
}

/// Placement of one CDR segment on the scaffold chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdrMapping {
    pub cdr_name: String,
    pub cdr_sequence: String,
    pub status: CdrStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<CdrBound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<CdrBound>,
}

impl CdrMapping {
    fn failed(segment: &CdrSegment, reason: &str) -> Self {
        Self {
            cdr_name: segment.name.clone(),
            cdr_sequence: segment.sequence.clone(),
            status: CdrStatus::Failed,
            reason: Some(reason.to_string()),
            start: None,
            end: None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.status == CdrStatus::Mapped
    }

    /// Inclusive canonical range of a mapped CDR.
    pub fn canonical_range(&self) -> Option<(usize, usize)> {
        match (&self.start, &self.end) {
            (Some(start), Some(end)) if self.is_mapped() => Some((
                start.canonical_sequence_position,
                end.canonical_sequence_position,
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationStatus {
    Succeeded,
    Failed,
}

/// Contents of `cdr_label_mapping.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdrLabelMapping {
    pub status: AnnotationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub scheme: CdrScheme,
    /// Author chain that was numbered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_chain_id: Option<String>,
    #[serde(default)]
    pub sequence: String,
    #[serde(default)]
    pub numbering: Vec<String>,
    #[serde(default)]
    pub cdr_mappings: Vec<CdrMapping>,
}

impl CdrLabelMapping {
    pub fn failed(scheme: CdrScheme, chain_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            status: AnnotationStatus::Failed,
            reason: Some(reason.into()),
            scheme,
            chain_id: chain_id.map(String::from),
            canonical_chain_id: None,
            sequence: String::new(),
            numbering: Vec::new(),
            cdr_mappings: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == AnnotationStatus::Succeeded
    }

    pub fn mapped(&self) -> impl Iterator<Item = &CdrMapping> {
        self.cdr_mappings.iter().filter(|cdr| cdr.is_mapped())
    }
}

/// Author chain numbered when none is requested: the first chain holding amino acids.
pub fn default_cdr_chain(mapping: &MappingResult) -> Option<String> {
    mapping
        .chains()
        .into_iter()
        .find(|chain| {
            chain
                .residues
                .iter()
                .any(|r| r.category == ResidueCategory::Protein)
        })
        .map(|chain| chain.author_chain_id)
}

/// Places every CDR of `numbering` onto author chain `chain` of `mapping`.
///
/// A CDR maps when its sequence occurs exactly once in the chain's polymer sequence. Missing,
/// repeated, and empty segments are kept as failed entries so the file lists every CDR the
/// service reported.
pub fn map_cdrs(
    numbering: &SequenceNumbering,
    mapping: &MappingResult,
    chain: &str,
    scheme: CdrScheme,
) -> CdrLabelMapping {
    let Some(block) = mapping
        .chains()
        .into_iter()
        .find(|c| c.author_chain_id == chain)
    else {
        let available = mapping.author_chains().join(", ");
        return CdrLabelMapping::failed(
            scheme,
            Some(chain),
            format!("chain {chain} not found in standardized structure (available: {available})"),
        );
    };

    let polymer: Vec<&MappingResidue> = block
        .residues
        .iter()
        .filter(|r| r.category.is_polymer())
        .collect();

    let bound = |residue: &MappingResidue| CdrBound {
        canonical_sequence_position: residue.canonical_sequence_position,
        author: residue.author_ref.clone(),
        absolute_index: mapping
            .absolute_index(&residue.canonical_chain_id, residue.canonical_sequence_position)
            .unwrap_or_default(),
    };

    let cdr_mappings = numbering
        .cdrs
        .iter()
        .map(|segment| {
            if segment.sequence.is_empty() {
                return CdrMapping::failed(segment, "empty CDR sequence");
            }
            let start = match locate_subsequence(&block.sequence, &segment.sequence) {
                Located::Unique(start) => start,
                Located::Ambiguous => {
                    return CdrMapping::failed(
                        segment,
                        "ambiguous alignment of CDR sequence to scaffold chain",
                    );
                }
                Located::Missing => {
                    return CdrMapping::failed(
                        segment,
                        "cdr sequence could not be aligned to scaffold chain",
                    );
                }
            };
            let end = start + segment.sequence.len() - 1;
            match (polymer.get(start), polymer.get(end)) {
                (Some(first), Some(last)) => CdrMapping {
                    cdr_name: segment.name.clone(),
                    cdr_sequence: segment.sequence.clone(),
                    status: CdrStatus::Mapped,
                    reason: None,
                    start: Some(bound(first)),
                    end: Some(bound(last)),
                },
                _ => CdrMapping::failed(segment, "aligned indices exceed residue list"),
            }
        })
        .collect::<Vec<_>>();

    let failed = cdr_mappings.iter().filter(|c| !c.is_mapped()).count();
    if failed > 0 {
        warn!(chain, failed, "some CDRs could not be placed on the scaffold");
    }
    CdrLabelMapping {
        status: AnnotationStatus::Succeeded,
        reason: None,
        scheme,
        chain_id: Some(chain.to_string()),
        canonical_chain_id: Some(block.canonical_chain_id),
        sequence: block.sequence,
        numbering: numbering.numbering.clone(),
        cdr_mappings,
    }
}

/// Numbers `chain` (or the first amino-acid chain) of the scaffold and places its CDRs.
///
/// Never fails: service errors are recorded as a failed annotation.
pub async fn annotate_cdrs(
    service: &dyn NumberingService,
    mapping: &MappingResult,
    chain: Option<&str>,
    scheme: CdrScheme,
) -> CdrLabelMapping {
    let chain = match chain.map(String::from).or_else(|| default_cdr_chain(mapping)) {
        Some(chain) => chain,
        None => {
            return CdrLabelMapping::failed(scheme, None, "no amino-acid chain to number");
        }
    };
    let Some(sequence) = mapping
        .chains()
        .into_iter()
        .find(|c| c.author_chain_id == chain)
        .map(|c| c.sequence)
    else {
        return map_cdrs(&SequenceNumbering::default(), mapping, &chain, scheme);
    };

    debug!(chain = %chain, length = sequence.len(), %scheme, "numbering scaffold chain");
    match service.number_sequence(&sequence, scheme).await {
        Ok(numbering) => {
            let annotated = map_cdrs(&numbering, mapping, &chain, scheme);
            info!(
                chain = %chain,
                cdrs = annotated.cdr_mappings.len(),
                mapped = annotated.mapped().count(),
                "annotated scaffold CDRs"
            );
            annotated
        }
        Err(err) => {
            warn!(chain = %chain, error = %err, "CDR numbering failed");
            CdrLabelMapping::failed(scheme, Some(&chain), err.to_string())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mapping::tests::{antibody_structure, mapping_for};
    use tempfile::TempDir;

    /// Reports fixed CDR segments for any sequence.
    pub(crate) struct FixedNumbering(pub Vec<(&'static str, &'static str)>);

    #[async_trait]
    impl NumberingService for FixedNumbering {
        async fn number_sequence(
            &self,
            sequence: &str,
            _scheme: CdrScheme,
        ) -> Result<SequenceNumbering, NumberingError> {
            Ok(SequenceNumbering {
                numbering: (1..=sequence.len()).map(|n| n.to_string()).collect(),
                cdrs: self
                    .0
                    .iter()
                    .map(|(name, seq)| CdrSegment {
                        name: name.to_string(),
                        sequence: seq.to_string(),
                    })
                    .collect(),
            })
        }
    }

    struct Unavailable;

    #[async_trait]
    impl NumberingService for Unavailable {
        async fn number_sequence(
            &self,
            _sequence: &str,
            _scheme: CdrScheme,
        ) -> Result<SequenceNumbering, NumberingError> {
            Err(NumberingError::Rejected("not an antibody chain".into()))
        }
    }

    #[test]
    fn locate_subsequence_distinguishes_unique_repeated_and_missing() {
        assert_eq!(locate_subsequence("EVQLVESGGG", "VES"), Located::Unique(4));
        assert_eq!(locate_subsequence("EVQLVESGGG", "GG"), Located::Ambiguous);
        assert_eq!(locate_subsequence("EVQLVESGGG", "WWW"), Located::Missing);
        assert_eq!(locate_subsequence("EVQ", ""), Located::Missing);
    }

    #[test]
    fn map_cdrs_places_segments_on_canonical_positions() {
        let dir = TempDir::new().unwrap();
        let mapping = mapping_for(antibody_structure(), dir.path());
        let numbering = SequenceNumbering {
            numbering: Vec::new(),
            cdrs: vec![
                CdrSegment { name: "L1".into(), sequence: "SNLE".into() },
                CdrSegment { name: "L2".into(), sequence: "S".into() },
                CdrSegment { name: "L3".into(), sequence: "WW".into() },
            ],
        };

        let mapped = map_cdrs(&numbering, &mapping, "L", CdrScheme::Chothia);

        assert!(mapped.succeeded());
        assert_eq!(mapped.canonical_chain_id.as_deref(), Some("B"));
        assert_eq!(mapped.sequence, "DASNLESG");
        let l1 = &mapped.cdr_mappings[0];
        assert_eq!(l1.canonical_range(), Some((2, 5)));
        assert_eq!(l1.start.as_ref().unwrap().author.token(), "L:52");
        assert_eq!(l1.end.as_ref().unwrap().author.token(), "L:54");
        assert_eq!(l1.start.as_ref().unwrap().absolute_index, 10 + 3);
        assert_eq!(mapped.cdr_mappings[1].status, CdrStatus::Failed);
        assert!(mapped.cdr_mappings[1].reason.as_deref().unwrap().contains("ambiguous"));
        assert_eq!(mapped.cdr_mappings[2].status, CdrStatus::Failed);
        assert_eq!(mapped.mapped().count(), 1);
    }

    #[test]
    fn map_cdrs_reports_unknown_chains() {
        let dir = TempDir::new().unwrap();
        let mapping = mapping_for(antibody_structure(), dir.path());

        let mapped = map_cdrs(&SequenceNumbering::default(), &mapping, "Q", CdrScheme::Kabat);

        assert_eq!(mapped.status, AnnotationStatus::Failed);
        assert!(mapped.reason.unwrap().contains("available: H, L"));
    }

    #[tokio::test]
    async fn annotate_cdrs_defaults_to_the_first_amino_acid_chain() {
        let dir = TempDir::new().unwrap();
        let mapping = mapping_for(antibody_structure(), dir.path());
        let service = FixedNumbering(vec![("H1", "QLV")]);

        let annotated = annotate_cdrs(&service, &mapping, None, CdrScheme::Chothia).await;

        assert_eq!(annotated.chain_id.as_deref(), Some("H"));
        assert_eq!(annotated.numbering.len(), 10);
        assert_eq!(annotated.cdr_mappings[0].canonical_range(), Some((2, 4)));
    }

    #[tokio::test]
    async fn annotate_cdrs_records_service_failures() {
        let dir = TempDir::new().unwrap();
        let mapping = mapping_for(antibody_structure(), dir.path());

        let annotated = annotate_cdrs(&Unavailable, &mapping, Some("H"), CdrScheme::Imgt).await;

        assert_eq!(annotated.status, AnnotationStatus::Failed);
        assert_eq!(annotated.reason.as_deref(), Some("not an antibody chain"));
        assert_eq!(annotated.chain_id.as_deref(), Some("H"));
        let json = serde_json::to_value(&annotated).unwrap();
        assert_eq!(json["scheme"], "imgt");
        assert_eq!(json["status"], "failed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_numbering_reads_json_from_stdout() {
        let command: Vec<String> = [
            "/bin/sh",
            "-c",
            r#"read seq; echo "{\"numbering\":[\"1\"],\"cdrs\":[{\"name\":\"H1\",\"sequence\":\"$seq\"}],\"scheme\":\"$2\"}""#,
            "numbering",
        ]
        .map(String::from)
        .to_vec();
        let service = CommandNumbering::from_command(&command).unwrap();

        let numbering = service.number_sequence("EVQ", CdrScheme::Kabat).await.unwrap();

        assert_eq!(numbering.cdrs[0].sequence, "EVQ");
        assert_eq!(numbering.numbering, vec!["1".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_numbering_reports_failed_commands() {
        let command: Vec<String> = ["/bin/sh", "-c", "echo nope >&2; exit 3"]
            .map(String::from)
            .to_vec();
        let service = CommandNumbering::from_command(&command).unwrap();

        let err = service.number_sequence("EVQ", CdrScheme::Chothia).await.unwrap_err();

        assert!(matches!(
            err,
            NumberingError::Failed { code: Some(3), ref stderr } if stderr == "nope"
        ));
        assert!(CommandNumbering::from_command(&[]).is_none());
    }
}
