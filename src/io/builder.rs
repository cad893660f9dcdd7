//! Incremental structure assembly shared by the PDB and mmCIF readers.
//!
//! Readers feed one [`AtomRecord`] per coordinate line. The builder keeps chains in
//! first-appearance order and residues in file order, collapses alternate locations, and drops
//! repeated residue blocks at an already-seen author position.

use crate::io::context::IoContext;
use crate::model::{
    atom::Atom, chain::Chain, reference::AuthorRef, residue::Residue, structure::Structure,
    structure::UnitCell,
};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Non-fatal observations made while loading a structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    /// A residue block repeated an author position already seen in the same chain and was
    /// dropped in favour of the first occurrence.
    DuplicateResidue {
        chain: String,
        seq_num: i32,
        insertion_code: Option<char>,
        line: usize,
    },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateResidue {
                chain,
                seq_num,
                insertion_code,
                line,
            } => write!(
                f,
                "duplicate residue {} at line {line}; keeping the first occurrence",
                AuthorRef::new(chain.as_str(), *seq_num, *insertion_code)
            ),
        }
    }
}

/// Parsed structure plus the warnings raised while reading it.
#[derive(Debug, Clone)]
pub struct LoadedStructure {
    pub structure: Structure,
    pub warnings: Vec<LoadWarning>,
}

/// One coordinate line, already split into fields.
#[derive(Debug, Clone)]
pub(crate) struct AtomRecord {
    pub chain: String,
    pub seq_num: i32,
    pub insertion_code: Option<char>,
    pub res_name: String,
    pub is_hetatm: bool,
    /// Author reference carried by the line when the file is read in the label scheme.
    pub origin: Option<AuthorRef>,
    pub atom: Atom,
}

type ResKey = (i32, Option<char>);

struct TempResidue {
    key: ResKey,
    raw_name: String,
    is_hetatm: bool,
    origin: Option<AuthorRef>,
    atoms: Vec<Atom>,
}

struct TempChain {
    id: String,
    residues: Vec<TempResidue>,
    index: HashMap<ResKey, usize>,
}

#[derive(Default)]
pub(crate) struct StructureBuilder {
    chains: Vec<TempChain>,
    chain_index: HashMap<String, usize>,
    last_key: Option<(String, ResKey)>,
    skipping: bool,
    warnings: Vec<LoadWarning>,
    cell: Option<UnitCell>,
}

impl StructureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cell(&mut self, cell: UnitCell) {
        self.cell = Some(cell);
    }

    pub fn push(&mut self, record: AtomRecord, line: usize) {
        let key: ResKey = (record.seq_num, record.insertion_code);
        let continues_block = matches!(
            &self.last_key,
            Some((chain, last)) if *chain == record.chain && *last == key
        );

        let chain_idx = match self.chain_index.get(&record.chain) {
            Some(&idx) => idx,
            None => {
                self.chains.push(TempChain {
                    id: record.chain.clone(),
                    residues: Vec::new(),
                    index: HashMap::new(),
                });
                let idx = self.chains.len() - 1;
                self.chain_index.insert(record.chain.clone(), idx);
                idx
            }
        };
        let chain = &mut self.chains[chain_idx];

        if !continues_block {
            self.last_key = Some((record.chain.clone(), key));
            self.skipping = chain.index.contains_key(&key);

            if self.skipping {
                warn!(
                    chain = %record.chain,
                    seq_num = record.seq_num,
                    line,
                    "duplicate residue position, keeping first occurrence"
                );
                self.warnings.push(LoadWarning::DuplicateResidue {
                    chain: record.chain,
                    seq_num: record.seq_num,
                    insertion_code: record.insertion_code,
                    line,
                });
                return;
            }

            chain.index.insert(key, chain.residues.len());
            chain.residues.push(TempResidue {
                key,
                raw_name: record.res_name,
                is_hetatm: record.is_hetatm,
                origin: record.origin,
                atoms: vec![record.atom],
            });
            return;
        }

        if self.skipping {
            return;
        }

        let Some(residue) = chain.residues.last_mut() else {
            return;
        };
        let atom = record.atom;
        match residue.atoms.iter_mut().find(|a| a.name == atom.name) {
            Some(existing) if atom.occupancy > existing.occupancy => *existing = atom,
            Some(_) => {}
            None => residue.atoms.push(atom),
        }
    }

    pub fn finish(self, context: &IoContext) -> LoadedStructure {
        let mut structure = Structure::new();
        structure.cell = self.cell;

        for temp_chain in self.chains {
            let mut chain = Chain::new(&temp_chain.id);
            for temp in temp_chain.residues {
                let name = temp.raw_name.trim().to_ascii_uppercase();
                let standard = context.classify_residue(&name);
                let mut residue = Residue::new(temp.key.0, temp.key.1, &name, standard);
                residue.is_hetatm = temp.is_hetatm;
                residue.origin = temp.origin;
                for atom in temp.atoms {
                    residue.add_atom(atom);
                }
                chain.add_residue(residue);
            }
            structure.add_chain(chain);
        }

        LoadedStructure {
            structure,
            warnings: self.warnings,
        }
    }
}

/// Parses an insertion-code field where blanks, `.` and `?` mean "none".
pub(crate) fn parse_insertion_code(raw: &str) -> Option<char> {
    let trimmed = raw.trim();
    if matches!(trimmed, "" | "." | "?") {
        return None;
    }
    crate::model::reference::normalize_insertion_code(trimmed.chars().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::{Element, Point};

    fn record(chain: &str, seq: i32, icode: Option<char>, name: &str, atom: &str) -> AtomRecord {
        AtomRecord {
            chain: chain.to_string(),
            seq_num: seq,
            insertion_code: icode,
            res_name: name.to_string(),
            is_hetatm: false,
            origin: None,
            atom: Atom::new(atom, Element::C, Point::origin()),
        }
    }

    #[test]
    fn builder_keeps_file_order_for_chains_and_residues() {
        let mut builder = StructureBuilder::new();
        builder.push(record("B", 10, None, "ALA", "CA"), 1);
        builder.push(record("A", 5, None, "GLY", "CA"), 2);
        builder.push(record("B", 2, None, "SER", "CA"), 3);

        let loaded = builder.finish(&IoContext::new_default());
        let chains: Vec<_> = loaded.structure.iter_chains().map(|c| c.id.clone()).collect();
        assert_eq!(chains, vec!["B", "A"]);
        let ids: Vec<_> = loaded
            .structure
            .chain("B")
            .unwrap()
            .iter_residues()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![10, 2]);
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn builder_drops_repeated_blocks_with_one_warning() {
        let mut builder = StructureBuilder::new();
        builder.push(record("A", 1, None, "ALA", "N"), 1);
        builder.push(record("A", 2, None, "GLY", "N"), 2);
        builder.push(record("A", 1, None, "SER", "N"), 3);
        builder.push(record("A", 1, None, "SER", "CA"), 4);

        let loaded = builder.finish(&IoContext::new_default());
        let chain = loaded.structure.chain("A").unwrap();
        assert_eq!(chain.residue_count(), 2);
        assert_eq!(chain.residue(1, None).unwrap().name, "ALA");
        assert_eq!(chain.residue(1, None).unwrap().atom_count(), 1);
        assert_eq!(
            loaded.warnings,
            vec![LoadWarning::DuplicateResidue {
                chain: "A".into(),
                seq_num: 1,
                insertion_code: None,
                line: 3,
            }]
        );
    }

    #[test]
    fn builder_keeps_highest_occupancy_alternate_location() {
        let mut builder = StructureBuilder::new();
        let mut low = record("A", 1, None, "SER", "OG");
        low.atom =
            Atom::new("OG", Element::O, Point::new(1.0, 0.0, 0.0)).with_crystallographic(0.3, 0.0);
        let mut high = record("A", 1, None, "SER", "OG");
        high.atom =
            Atom::new("OG", Element::O, Point::new(2.0, 0.0, 0.0)).with_crystallographic(0.7, 0.0);
        builder.push(low, 1);
        builder.push(high, 2);

        let loaded = builder.finish(&IoContext::new_default());
        let residue = loaded.structure.find_residue("A", 1, None).unwrap();
        assert_eq!(residue.atom_count(), 1);
        assert_eq!(residue.atom("OG").unwrap().pos.x, 2.0);
    }

    #[test]
    fn parse_insertion_code_treats_placeholders_as_none() {
        assert_eq!(parse_insertion_code(" "), None);
        assert_eq!(parse_insertion_code("?"), None);
        assert_eq!(parse_insertion_code("."), None);
        assert_eq!(parse_insertion_code("a"), Some('A'));
    }

    #[test]
    fn load_warning_display_names_position() {
        let warning = LoadWarning::DuplicateResidue {
            chain: "L".into(),
            seq_num: 52,
            insertion_code: Some('A'),
            line: 40,
        };
        assert_eq!(
            warning.to_string(),
            "duplicate residue L:52A at line 40; keeping the first occurrence"
        );
    }
}
