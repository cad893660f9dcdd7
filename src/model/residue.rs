use super::atom::Atom;
use super::reference::AuthorRef;
use super::types::{ResidueCategory, StandardResidue};
use std::fmt;

/// A residue numbered in its chain's scheme.
///
/// For structures read in the author scheme `id`/`insertion_code` are the author numbers and
/// `origin` is `None`. For canonical structures `id` is the 0-based canonical position and
/// `origin` holds the author reference the position was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct Residue {
    pub id: i32,
    pub insertion_code: Option<char>,
    pub name: String,
    pub standard_name: Option<StandardResidue>,
    pub category: ResidueCategory,
    pub is_hetatm: bool,
    pub origin: Option<AuthorRef>,
    atoms: Vec<Atom>,
}

impl Residue {
    /// Creates a residue without atoms.
    ///
    /// # Arguments
    ///
    /// * `id` - Residue number in the chain's scheme.
    /// * `insertion_code` - Author insertion code, if any.
    /// * `name` - Residue name as read from the file.
    /// * `standard_name` - Vocabulary entry the name maps to, `None` for hetero groups.
    ///
    /// # Returns
    ///
    /// A residue whose category follows `standard_name`, with no recorded origin.
    pub fn new(
        id: i32,
        insertion_code: Option<char>,
        name: &str,
        standard_name: Option<StandardResidue>,
    ) -> Self {
        Self {
            id,
            insertion_code,
            name: name.to_string(),
            standard_name,
            category: standard_name
                .map(|s| s.category())
                .unwrap_or(ResidueCategory::Hetero),
            is_hetatm: false,
            origin: None,
            atoms: Vec::new(),
        }
    }

    pub fn is_polymer(&self) -> bool {
        self.category.is_polymer()
    }

    pub fn one_letter(&self) -> Option<char> {
        self.standard_name.and_then(|s| s.one_letter())
    }

    /// Author reference of this residue inside chain `chain_id`.
    ///
    /// Canonical residues answer with their recorded origin; author-scheme residues build the
    /// reference from their own numbering.
    ///
    /// # Arguments
    ///
    /// * `chain_id` - Identifier of the chain holding this residue; ignored when an origin
    ///   is recorded.
    ///
    /// # Returns
    ///
    /// The [`AuthorRef`] used as the mapping key for this residue.
    pub fn author_ref(&self, chain_id: &str) -> AuthorRef {
        self.origin
            .clone()
            .unwrap_or_else(|| AuthorRef::new(chain_id, self.id, self.insertion_code))
    }

    pub fn add_atom(&mut self, atom: Atom) {
        debug_assert!(
            self.atom(&atom.name).is_none(),
            "Attempted to add a duplicate atom name '{}' to residue '{}'",
            atom.name,
            self.name
        );
        self.atoms.push(atom);
    }

    pub fn atom(&self, name: &str) -> Option<&Atom> {
        self.atoms.iter().find(|a| a.name == name)
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn iter_atoms(&self) -> std::slice::Iter<'_, Atom> {
        self.atoms.iter()
    }
}

impl fmt::Display for Residue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let icode = self.insertion_code.map(String::from).unwrap_or_default();
        write!(
            f,
            "Residue {{ id: {}{}, name: \"{}\", category: {}, atoms: {} }}",
            self.id,
            icode,
            self.name,
            self.category,
            self.atom_count()
        )
    }
}
