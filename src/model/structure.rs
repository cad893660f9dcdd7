//! Multi-chain structure container.
//!
//! A `Structure` is what the readers produce and the standardizer consumes. Chain order is
//! significant: readers keep first-appearance order and the standardizer re-orders chains
//! into canonical order.

use super::chain::Chain;
use super::residue::Residue;
use std::fmt;

/// Crystallographic unit cell parameters (lengths in ångströms, angles in degrees).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitCell {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

/// Biomolecular assembly composed of zero or more chains.
#[derive(Debug, Clone, Default)]
pub struct Structure {
    /// Chains in the order they were added.
    chains: Vec<Chain>,
    /// Unit cell carried through from `CRYST1` or `_cell.*`.
    pub cell: Option<UnitCell>,
}

impl Structure {
    /// Creates an empty structure with no chains and no unit cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chain, asserting unique chain IDs in debug builds.
    ///
    /// # Arguments
    ///
    /// * `chain` - Chain whose `id` must not already be present.
    pub fn add_chain(&mut self, chain: Chain) {
        debug_assert!(
            self.chain(&chain.id).is_none(),
            "Attempted to add a duplicate chain ID '{}'",
            chain.id
        );
        self.chains.push(chain);
    }

    /// Retrieves a chain by identifier.
    ///
    /// # Returns
    ///
    /// `Some(&Chain)` if found, otherwise `None`.
    pub fn chain(&self, id: &str) -> Option<&Chain> {
        self.chains.iter().find(|c| c.id == id)
    }

    /// Finds a residue using chain ID, residue number, and optional insertion code.
    ///
    /// # Arguments
    ///
    /// * `chain_id` - Chain identifier in the structure's scheme.
    /// * `residue_id` - Residue number within that chain.
    /// * `insertion_code` - Insertion code, `None` for plain numbers.
    ///
    /// # Returns
    ///
    /// `Some(&Residue)` if the chain exists and holds that residue, otherwise `None`.
    pub fn find_residue(
        &self,
        chain_id: &str,
        residue_id: i32,
        insertion_code: Option<char>,
    ) -> Option<&Residue> {
        self.chain(chain_id)
            .and_then(|c| c.residue(residue_id, insertion_code))
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Number of chains holding at least one protein or nucleic residue.
    pub fn polymer_chain_count(&self) -> usize {
        self.chains.iter().filter(|c| c.is_polymer()).count()
    }

    pub fn residue_count(&self) -> usize {
        self.chains.iter().map(|c| c.residue_count()).sum()
    }

    pub fn atom_count(&self) -> usize {
        self.chains.iter().map(|c| c.iter_atoms().count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Iterates over chains in stored order.
    pub fn iter_chains(&self) -> std::slice::Iter<'_, Chain> {
        self.chains.iter()
    }

    /// Iterates over every residue paired with its parent chain, chain-major.
    pub fn iter_residues_with_chain(&self) -> impl Iterator<Item = (&Chain, &Residue)> {
        self.chains
            .iter()
            .flat_map(|chain| chain.iter_residues().map(move |residue| (chain, residue)))
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Structure {{ chains: {}, residues: {}, atoms: {} }}",
            self.chain_count(),
            self.residue_count(),
            self.atom_count()
        )
    }
}
