//! Hotspot parsing and resolution against a [`MappingResult`].
//!
//! A hotspot arrives either as text (`"L:52A"`) or as a structured record
//! (`{chain, residue_number, insertion_code}`). Each one resolves independently: a malformed or
//! missing hotspot is reported in its own [`ResolvedHotspot`] and never aborts the batch.

use crate::mapping::{MappingResidue, MappingResult};
use crate::model::reference::AuthorRef;
use crate::model::types::ResidueCategory;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

/// Residues listed in a `not_found` diagnostic before it is cut short.
const AVAILABLE_RESIDUE_PREVIEW: usize = 25;

/// User-supplied hotspot before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HotspotSpec {
    Text(String),
    Structured {
        chain: String,
        #[serde(alias = "resi")]
        residue_number: i32,
        #[serde(default, alias = "ins", skip_serializing_if = "Option::is_none")]
        insertion_code: Option<String>,
    },
}

impl fmt::Display for HotspotSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{text}"),
            Self::Structured {
                chain,
                residue_number,
                insertion_code,
            } => write!(
                f,
                "{chain}:{residue_number}{}",
                insertion_code.as_deref().unwrap_or("")
            ),
        }
    }
}

impl From<&str> for HotspotSpec {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HotspotError {
    #[error("malformed hotspot '{input}': {reason}")]
    Malformed { input: String, reason: String },
}

impl HotspotSpec {
    /// Parses the spec into an author reference.
    ///
    /// Text specs must read `<chain>:<number>[<insertion code>]` with exactly one `:`, a
    /// non-empty chain, an optionally negative decimal number, and at most one trailing letter.
    pub fn parse(&self) -> Result<AuthorRef, HotspotError> {
        let malformed = |reason: &str| HotspotError::Malformed {
            input: self.to_string(),
            reason: reason.to_string(),
        };

        match self {
            Self::Text(text) => {
                let mut parts = text.trim().split(':');
                let (Some(chain), Some(residue), None) = (parts.next(), parts.next(), parts.next())
                else {
                    return Err(malformed("expected exactly one ':' separator"));
                };
                let chain = chain.trim();
                if chain.is_empty() {
                    return Err(malformed("chain identifier is empty"));
                }
                if chain.contains(char::is_whitespace) {
                    return Err(malformed("chain identifier contains whitespace"));
                }
                let (seq_num, insertion_code) =
                    parse_residue_token(residue.trim()).map_err(|reason| malformed(reason))?;
                Ok(AuthorRef::new(chain, seq_num, insertion_code))
            }
            Self::Structured {
                chain,
                residue_number,
                insertion_code,
            } => {
                let chain = chain.trim();
                if chain.is_empty() {
                    return Err(malformed("chain identifier is empty"));
                }
                let code = match insertion_code.as_deref().map(str::trim) {
                    None | Some("") => None,
                    Some(code) => {
                        let mut chars = code.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) if c.is_ascii_alphabetic() => Some(c),
                            _ => {
                                return Err(malformed(
                                    "insertion code must be a single letter",
                                ));
                            }
                        }
                    }
                };
                Ok(AuthorRef::new(chain, *residue_number, code))
            }
        }
    }
}

fn parse_residue_token(token: &str) -> Result<(i32, Option<char>), &'static str> {
    if token.is_empty() {
        return Err("residue number is empty");
    }

    let (number, suffix) = match token.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&token[..idx], Some(c)),
        _ => (token, None),
    };

    let digits = number.strip_prefix('-').unwrap_or(number);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err("residue must be a decimal number with at most one insertion-code letter");
    }

    let seq_num = number
        .parse::<i32>()
        .map_err(|_| "residue number is out of range")?;
    Ok((seq_num, suffix))
}

/// Which residue categories a hotspot may point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HotspotScope {
    /// Only amino-acid residues.
    #[default]
    Protein,
    /// Any residue in the mapping table.
    All,
}

impl HotspotScope {
    fn admits(self, category: ResidueCategory) -> bool {
        match self {
            Self::Protein => category == ResidueCategory::Protein,
            Self::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotspotStatus {
    Resolved,
    NotFound,
    Malformed,
    /// More than one residue carries the author reference. Only reachable through a corrupted
    /// mapping report.
    Ambiguous,
}

impl HotspotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::NotFound => "not_found",
            Self::Malformed => "malformed",
            Self::Ambiguous => "ambiguous",
        }
    }
}

impl fmt::Display for HotspotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundReason {
    MissingChain,
    MissingResidue,
    FilteredByScope,
}

/// Outcome of resolving one hotspot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedHotspot {
    pub requested: HotspotSpec,
    pub status: HotspotStatus,
    /// Parsed author reference; absent for malformed specs.
    pub author_ref: Option<AuthorRef>,
    pub matched: Option<MappingResidue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<NotFoundReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResolvedHotspot {
    pub fn is_resolved(&self) -> bool {
        self.status == HotspotStatus::Resolved
    }

    /// Author token of the request, falling back to the raw input for malformed specs.
    pub fn token(&self) -> String {
        self.author_ref
            .as_ref()
            .map(AuthorRef::token)
            .unwrap_or_else(|| self.requested.to_string())
    }

    fn unresolved(
        requested: &HotspotSpec,
        author_ref: Option<AuthorRef>,
        status: HotspotStatus,
        reason: Option<NotFoundReason>,
        message: String,
    ) -> Self {
        Self {
            requested: requested.clone(),
            status,
            author_ref,
            matched: None,
            reason,
            message: Some(message),
        }
    }
}

/// Resolves every spec against `mapping`, one result per input in input order.
///
/// Duplicated specs are resolved independently and reported twice.
pub fn resolve_hotspots(
    specs: &[HotspotSpec],
    mapping: &MappingResult,
    scope: HotspotScope,
) -> Vec<ResolvedHotspot> {
    specs
        .iter()
        .map(|spec| resolve_one(spec, mapping, scope))
        .collect()
}

fn resolve_one(spec: &HotspotSpec, mapping: &MappingResult, scope: HotspotScope) -> ResolvedHotspot {
    let author_ref = match spec.parse() {
        Ok(author_ref) => author_ref,
        Err(err) => {
            warn!(hotspot = %spec, "{err}");
            let HotspotError::Malformed { reason, .. } = err;
            return ResolvedHotspot::unresolved(spec, None, HotspotStatus::Malformed, None, reason);
        }
    };

    let candidates = mapping.lookup(&author_ref);
    match candidates.as_slice() {
        [] => {
            let (reason, message) = describe_missing(&author_ref, mapping);
            warn!(hotspot = %author_ref, "{message}");
            ResolvedHotspot::unresolved(
                spec,
                Some(author_ref),
                HotspotStatus::NotFound,
                Some(reason),
                message,
            )
        }
        [single] if !scope.admits(single.category) => {
            let message = format!(
                "residue {author_ref} is {} and outside the {} hotspot scope",
                single.category,
                match scope {
                    HotspotScope::Protein => "protein",
                    HotspotScope::All => "all",
                }
            );
            warn!(hotspot = %author_ref, "{message}");
            ResolvedHotspot::unresolved(
                spec,
                Some(author_ref),
                HotspotStatus::NotFound,
                Some(NotFoundReason::FilteredByScope),
                message,
            )
        }
        [single] => ResolvedHotspot {
            requested: spec.clone(),
            status: HotspotStatus::Resolved,
            author_ref: Some(author_ref),
            matched: Some((*single).clone()),
            reason: None,
            message: None,
        },
        many => {
            let message = format!(
                "author reference {author_ref} matches {} residues; the mapping table is inconsistent",
                many.len()
            );
            error!(hotspot = %author_ref, candidates = many.len(), "{message}");
            ResolvedHotspot::unresolved(
                spec,
                Some(author_ref),
                HotspotStatus::Ambiguous,
                None,
                message,
            )
        }
    }
}

fn describe_missing(author_ref: &AuthorRef, mapping: &MappingResult) -> (NotFoundReason, String) {
    if mapping.has_author_chain(&author_ref.chain) {
        let residues: Vec<String> = mapping
            .residues_in_author_chain(&author_ref.chain)
            .map(|r| r.author_ref.residue_token())
            .collect();
        let mut preview = residues
            .iter()
            .take(AVAILABLE_RESIDUE_PREVIEW)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if residues.len() > AVAILABLE_RESIDUE_PREVIEW {
            preview.push_str(", ...");
        }
        (
            NotFoundReason::MissingResidue,
            format!(
                "residue {} not found in chain {}; available residues: {preview}",
                author_ref.residue_token(),
                author_ref.chain
            ),
        )
    } else {
        (
            NotFoundReason::MissingChain,
            format!(
                "chain {} not found; available chains: {}",
                author_ref.chain,
                mapping.author_chains().join(", ")
            ),
        )
    }
}

/// Counts of hotspots per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotspotSummary {
    pub resolved: usize,
    pub not_found: usize,
    pub malformed: usize,
    pub ambiguous: usize,
}

impl HotspotSummary {
    pub fn from_results(results: &[ResolvedHotspot]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.status {
                HotspotStatus::Resolved => summary.resolved += 1,
                HotspotStatus::NotFound => summary.not_found += 1,
                HotspotStatus::Malformed => summary.malformed += 1,
                HotspotStatus::Ambiguous => summary.ambiguous += 1,
            }
        }
        summary
    }

    pub fn unresolved(&self) -> usize {
        self.not_found + self.malformed + self.ambiguous
    }
}
