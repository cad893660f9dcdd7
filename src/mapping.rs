//! Residue mapping between the author and canonical numbering schemes.
//!
//! [`build_mapping`] walks the canonical file chain by chain and records, for every residue
//! present, its author reference and its canonical position. The resulting [`MappingResult`]
//! is the only place later stages translate identifiers.

use crate::io;
use crate::model::{reference::AuthorRef, structure::Structure, types::ResidueCategory};
use crate::standardize::{StandardizedStructure, chain_sort_key};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Version tag written into `mapping.json`.
pub const MAPPING_SCHEMA_VERSION: u32 = 2;

/// One physical residue of the standardized structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingResidue {
    pub author_ref: AuthorRef,
    /// 0-based index among the residues present in the chain.
    pub present_sequence_position: usize,
    pub canonical_chain_id: String,
    pub canonical_sequence_position: usize,
    pub residue_name: String,
    pub one_letter: Option<char>,
    pub category: ResidueCategory,
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to read canonical structure: {0}")]
    CanonicalUnreadable(#[from] io::Error),
    #[error("canonical chain '{chain}' position {position} carries no author reference")]
    MissingAuthorReference { chain: String, position: usize },
    #[error(
        "canonical chain '{chain}' is not numbered densely: expected position {expected}, found {found}"
    )]
    NonMonotonicPosition {
        chain: String,
        expected: usize,
        found: i32,
    },
    #[error("author reference {author_ref} appears more than once")]
    DuplicateAuthorReference { author_ref: String },
    #[error("failed to access mapping report '{}': {source}", path.display())]
    ReportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid mapping report: {0}")]
    Report(#[from] serde_json::Error),
}

/// Complete author-to-canonical table for one standardized structure.
///
/// Residues are ordered chain-major in canonical chain order, then by position.
#[derive(Debug, Clone)]
pub struct MappingResult {
    residues: Vec<MappingResidue>,
    standardized: StandardizedStructure,
    generated_at: DateTime<Utc>,
    by_author: HashMap<AuthorRef, Vec<usize>>,
    by_canonical: HashMap<(String, usize), usize>,
}

impl MappingResult {
    /// Creates a mapping table, rejecting duplicate author references.
    pub fn new(
        residues: Vec<MappingResidue>,
        standardized: StandardizedStructure,
        generated_at: DateTime<Utc>,
    ) -> Result<Self, MappingError> {
        let result = Self::from_parts(residues, standardized, generated_at);
        if let Some(duplicate) = result
            .by_author
            .iter()
            .find(|(_, candidates)| candidates.len() > 1)
            .map(|(author, _)| author)
        {
            return Err(MappingError::DuplicateAuthorReference {
                author_ref: duplicate.token(),
            });
        }
        Ok(result)
    }

    fn from_parts(
        residues: Vec<MappingResidue>,
        standardized: StandardizedStructure,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let mut by_author: HashMap<AuthorRef, Vec<usize>> = HashMap::with_capacity(residues.len());
        let mut by_canonical = HashMap::with_capacity(residues.len());
        for (idx, residue) in residues.iter().enumerate() {
            by_author
                .entry(residue.author_ref.clone())
                .or_default()
                .push(idx);
            by_canonical.insert(
                (
                    residue.canonical_chain_id.clone(),
                    residue.canonical_sequence_position,
                ),
                idx,
            );
        }
        Self {
            residues,
            standardized,
            generated_at,
            by_author,
            by_canonical,
        }
    }

    pub fn residues(&self) -> &[MappingResidue] {
        &self.residues
    }

    pub fn standardized(&self) -> &StandardizedStructure {
        &self.standardized
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    /// Every residue recorded under `author`, in table order.
    ///
    /// Tables built by [`build_mapping`] return at most one candidate; tables loaded from a
    /// report return all candidates so corruption stays visible.
    pub fn lookup(&self, author: &AuthorRef) -> Vec<&MappingResidue> {
        self.by_author
            .get(author)
            .map(|indices| indices.iter().map(|&i| &self.residues[i]).collect())
            .unwrap_or_default()
    }

    /// Residue at a canonical chain and position.
    pub fn by_canonical(&self, chain: &str, position: usize) -> Option<&MappingResidue> {
        self.by_canonical
            .get(&(chain.to_string(), position))
            .map(|&i| &self.residues[i])
    }

    /// 1-based index of a canonical position over the whole table, chain-major.
    pub fn absolute_index(&self, chain: &str, position: usize) -> Option<usize> {
        self.by_canonical
            .get(&(chain.to_string(), position))
            .map(|&i| i + 1)
    }

    /// Residue at a 1-based chain-major index.
    pub fn by_absolute_index(&self, index: usize) -> Option<&MappingResidue> {
        index.checked_sub(1).and_then(|i| self.residues.get(i))
    }

    /// Author chain identifiers in canonical order.
    pub fn author_chains(&self) -> Vec<&str> {
        let mut chains: Vec<&str> = Vec::new();
        for residue in &self.residues {
            let chain = residue.author_ref.chain.as_str();
            if !chains.contains(&chain) {
                chains.push(chain);
            }
        }
        chains
    }

    pub fn has_author_chain(&self, chain: &str) -> bool {
        self.residues.iter().any(|r| r.author_ref.chain == chain)
    }

    pub fn residues_in_author_chain<'a>(
        &'a self,
        chain: &'a str,
    ) -> impl Iterator<Item = &'a MappingResidue> + 'a {
        self.residues
            .iter()
            .filter(move |r| r.author_ref.chain == chain)
    }

    /// Per-chain blocks in canonical chain order.
    pub fn chains(&self) -> Vec<MappingChain> {
        let mut chains: Vec<MappingChain> = Vec::new();
        for residue in &self.residues {
            match chains.last_mut() {
                Some(chain) if chain.canonical_chain_id == residue.canonical_chain_id => {
                    chain.push(residue.clone());
                }
                _ => {
                    let mut chain = MappingChain {
                        canonical_chain_id: residue.canonical_chain_id.clone(),
                        author_chain_id: residue.author_ref.chain.clone(),
                        sequence: String::new(),
                        residues: Vec::new(),
                    };
                    chain.push(residue.clone());
                    chains.push(chain);
                }
            }
        }
        chains
    }

    pub fn to_report(&self) -> MappingReport {
        MappingReport {
            mapping_schema_version: MAPPING_SCHEMA_VERSION,
            generated_at: self.generated_at,
            standardized_structure: self.standardized.clone(),
            chains: self.chains(),
        }
    }

    /// Rebuilds a table from a report without enforcing author-reference uniqueness.
    pub fn from_report(report: MappingReport) -> Self {
        let residues = report
            .chains
            .into_iter()
            .flat_map(|chain| chain.residues)
            .collect();
        Self::from_parts(residues, report.standardized_structure, report.generated_at)
    }

    pub fn write_report(&self, path: &Path) -> Result<(), MappingError> {
        let bytes = serde_json::to_vec_pretty(&self.to_report())?;
        fs::write(path, bytes).map_err(|source| MappingError::ReportIo {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read_report(path: &Path) -> Result<Self, MappingError> {
        let bytes = fs::read(path).map_err(|source| MappingError::ReportIo {
            path: path.to_path_buf(),
            source,
        })?;
        let report: MappingReport = serde_json::from_slice(&bytes)?;
        Ok(Self::from_report(report))
    }
}

/// One chain block of the mapping report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingChain {
    pub canonical_chain_id: String,
    pub author_chain_id: String,
    /// One-letter sequence of the chain's polymer residues.
    pub sequence: String,
    pub residues: Vec<MappingResidue>,
}

impl MappingChain {
    fn push(&mut self, residue: MappingResidue) {
        if residue.category.is_polymer() {
            self.sequence.push(residue.one_letter.unwrap_or('X'));
        }
        self.residues.push(residue);
    }
}

/// Serialized form of a [`MappingResult`] (`mapping.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingReport {
    pub mapping_schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub standardized_structure: StandardizedStructure,
    pub chains: Vec<MappingChain>,
}

/// Builds the mapping table of a standardized structure.
///
/// # Errors
///
/// Fails when the canonical file cannot be read, when a residue lacks its author reference,
/// when canonical positions are not `0, 1, 2, ...` within a chain, or when two residues
/// share an author reference.
pub fn build_mapping(standardized: &StandardizedStructure) -> Result<MappingResult, MappingError> {
    let structure = standardized.read_canonical()?;
    let residues = map_structure(&structure)?;
    debug!(residues = residues.len(), "mapped canonical residues");

    let result = MappingResult::new(residues, standardized.clone(), Utc::now())?;
    info!(
        path = %standardized.standardized_path.display(),
        residues = result.len(),
        chains = result.author_chains().len(),
        "built residue mapping"
    );
    Ok(result)
}

/// Maps a structure read in the label scheme.
fn map_structure(structure: &Structure) -> Result<Vec<MappingResidue>, MappingError> {
    let mut chains: Vec<_> = structure.iter_chains().collect();
    chains.sort_by_key(|chain| chain_sort_key(&chain.id));

    let mut residues = Vec::with_capacity(structure.residue_count());
    for chain in chains {
        for (present, residue) in chain.iter_residues().enumerate() {
            if residue.id != present as i32 {
                return Err(MappingError::NonMonotonicPosition {
                    chain: chain.id.clone(),
                    expected: present,
                    found: residue.id,
                });
            }
            let author_ref = residue.origin.clone().ok_or_else(|| {
                MappingError::MissingAuthorReference {
                    chain: chain.id.clone(),
                    position: present,
                }
            })?;

            residues.push(MappingResidue {
                author_ref,
                present_sequence_position: present,
                canonical_chain_id: chain.id.clone(),
                canonical_sequence_position: present,
                residue_name: residue.name.clone(),
                one_letter: residue.one_letter(),
                category: residue.category,
            });
        }
    }
    Ok(residues)
}
