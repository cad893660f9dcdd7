use super::atom::Atom;
use super::residue::Residue;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub id: String,
    residues: Vec<Residue>,
}

impl Chain {
    /// Creates an empty chain.
    ///
    /// # Arguments
    ///
    /// * `id` - Chain identifier in the numbering scheme of the owning structure.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            residues: Vec::new(),
        }
    }

    /// Appends a residue in file order.
    ///
    /// # Arguments
    ///
    /// * `residue` - Residue whose number and insertion code are not yet used in this chain.
    pub fn add_residue(&mut self, residue: Residue) {
        debug_assert!(
            self.residue(residue.id, residue.insertion_code).is_none(),
            "Attempted to add a duplicate residue '{}{}' to chain '{}'",
            residue.id,
            residue.insertion_code.map(String::from).unwrap_or_default(),
            self.id
        );
        self.residues.push(residue);
    }

    /// Looks up a residue by number and insertion code.
    ///
    /// # Arguments
    ///
    /// * `id` - Residue number in the chain's scheme.
    /// * `insertion_code` - Insertion code, `None` for plain numbers.
    ///
    /// # Returns
    ///
    /// `Some(&Residue)` when both parts match, so `52` and `52A` are distinct residues.
    pub fn residue(&self, id: i32, insertion_code: Option<char>) -> Option<&Residue> {
        self.residues
            .iter()
            .find(|r| r.id == id && r.insertion_code == insertion_code)
    }

    pub fn residues(&self) -> &[Residue] {
        &self.residues
    }

    pub fn residue_count(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    /// True when at least one residue belongs to the protein or nucleic vocabulary.
    pub fn is_polymer(&self) -> bool {
        self.residues.iter().any(|r| r.is_polymer())
    }

    /// One-letter sequence of the polymer residues in file order.
    pub fn sequence(&self) -> String {
        self.residues
            .iter()
            .filter(|r| r.is_polymer())
            .map(|r| r.one_letter().unwrap_or('X'))
            .collect()
    }

    pub fn iter_residues(&self) -> std::slice::Iter<'_, Residue> {
        self.residues.iter()
    }

    pub fn iter_atoms(&self) -> impl Iterator<Item = &Atom> {
        self.residues.iter().flat_map(|r| r.iter_atoms())
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Chain {{ id: \"{}\", residues: {} }}",
            self.id,
            self.residue_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::{Element, Point, StandardResidue};

    fn residue(id: i32, icode: Option<char>, name: &str) -> Residue {
        Residue::new(id, icode, name, name.parse::<StandardResidue>().ok())
    }

    #[test]
    fn chain_residue_distinguishes_insertion_codes() {
        let mut chain = Chain::new("L");
        chain.add_residue(residue(52, None, "SER"));
        chain.add_residue(residue(52, Some('A'), "GLY"));

        assert_eq!(chain.residue(52, None).unwrap().name, "SER");
        assert_eq!(chain.residue(52, Some('A')).unwrap().name, "GLY");
        assert!(chain.residue(52, Some('B')).is_none());
    }

    #[test]
    fn chain_keeps_insertion_order() {
        let mut chain = Chain::new("A");
        chain.add_residue(residue(10, None, "ALA"));
        chain.add_residue(residue(2, None, "GLY"));

        let ids: Vec<_> = chain.iter_residues().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 2]);
        assert_eq!(chain.residue_count(), 2);
    }

    #[test]
    fn chain_is_polymer_requires_a_vocabulary_residue() {
        let mut waters = Chain::new("W");
        waters.add_residue(residue(1, None, "HOH"));
        waters.add_residue(residue(2, None, "HOH"));
        let mut protein = Chain::new("A");
        protein.add_residue(residue(1, None, "MET"));

        assert!(!waters.is_polymer());
        assert!(protein.is_polymer());
        assert!(!Chain::new("E").is_polymer());
    }

    #[test]
    fn chain_sequence_skips_hetero_residues() {
        let mut chain = Chain::new("A");
        for (id, name) in [(1, "MET"), (2, "LYS"), (3, "NAG"), (4, "SEC"), (5, "HOH")] {
            chain.add_residue(residue(id, None, name));
        }

        assert_eq!(chain.sequence(), "MKU");
    }

    #[test]
    fn chain_iter_atoms_spans_residues() {
        let mut chain = Chain::new("A");
        let mut first = residue(1, None, "GLY");
        first.add_atom(Atom::new("N", Element::N, Point::origin()));
        first.add_atom(Atom::new("CA", Element::C, Point::origin()));
        let mut second = residue(2, None, "GLY");
        second.add_atom(Atom::new("N", Element::N, Point::origin()));
        chain.add_residue(first);
        chain.add_residue(second);

        assert_eq!(chain.iter_atoms().count(), 3);
        assert_eq!(chain.to_string(), "Chain { id: \"A\", residues: 2 }");
    }
}
