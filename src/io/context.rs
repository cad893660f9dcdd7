//! Shared reader configuration: residue vocabulary and numbering scheme.
//!
//! The vocabulary is closed on purpose. Protonation-state and solvent aliases emitted by
//! simulation packages collapse onto their standard residue, while modified residues
//! (`MSE`, `SEP`, ...) stay hetero so their author identity is never rewritten.

use crate::model::types::StandardResidue;
use std::collections::HashMap;

/// Which `_atom_site` columns an mmCIF reader numbers residues by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumberingScheme {
    /// `auth_asym_id` / `auth_seq_id` / `pdbx_PDB_ins_code`, as written by the file's author.
    #[default]
    Author,
    /// `label_asym_id` / `label_seq_id`; the author columns are kept as each residue's origin.
    Label,
}

#[derive(Debug, Clone)]
pub struct IoContext {
    alias_map: HashMap<&'static str, StandardResidue>,
    scheme: NumberingScheme,
}

impl IoContext {
    /// Builds the context used for every structure the crate reads.
    ///
    /// The vocabulary covers the standard amino acids (with SEC and PYL), RNA and DNA
    /// nucleotides, water, and the common force-field aliases of each.
    ///
    /// # Returns
    ///
    /// A context with the full alias table and [`NumberingScheme::Author`] numbering.
    pub fn new_default() -> Self {
        let mut alias_map = HashMap::new();

        macro_rules! register_standard {
            ($($code:literal => $std:ident),+ $(,)?) => {
                $(alias_map.insert($code, StandardResidue::$std);)+
            };
        }

        register_standard!(
            "ALA" => ALA, "ARG" => ARG, "ASN" => ASN, "ASP" => ASP, "CYS" => CYS,
            "GLN" => GLN, "GLU" => GLU, "GLY" => GLY, "HIS" => HIS, "ILE" => ILE,
            "LEU" => LEU, "LYS" => LYS, "MET" => MET, "PHE" => PHE, "PRO" => PRO,
            "SER" => SER, "THR" => THR, "TRP" => TRP, "TYR" => TYR, "VAL" => VAL,
            "SEC" => SEC, "PYL" => PYL,
            "A" => A, "C" => C, "G" => G, "U" => U, "I" => I,
            "DA" => DA, "DC" => DC, "DG" => DG, "DT" => DT, "DI" => DI,
            "HOH" => HOH,
        );

        // Protonation and force-field variants.
        register_standard!(
            "ARN" => ARG, "ASH" => ASP, "CYM" => CYS, "CYX" => CYS, "GLH" => GLU,
            "HID" => HIS, "HIE" => HIS, "HIP" => HIS, "HSD" => HIS, "HSE" => HIS,
            "HSP" => HIS, "LYN" => LYS, "TYM" => TYR,
        );

        register_standard!(
            "RA" => A, "RC" => C, "RG" => G, "RU" => U,
            "DA5" => DA, "DA3" => DA, "DC5" => DC, "DC3" => DC,
            "DG5" => DG, "DG3" => DG, "DT5" => DT, "DT3" => DT,
        );

        register_standard!("WAT" => HOH, "H2O" => HOH, "SOL" => HOH, "TIP3" => HOH, "DOD" => HOH);

        Self {
            alias_map,
            scheme: NumberingScheme::default(),
        }
    }

    /// Returns a copy of the context that reads mmCIF files in `scheme`.
    ///
    /// # Arguments
    ///
    /// * `scheme` - Columns the mmCIF reader numbers chains and residues by.
    pub fn with_scheme(mut self, scheme: NumberingScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn scheme(&self) -> NumberingScheme {
        self.scheme
    }

    /// Maps a raw residue name onto the closed vocabulary.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace. Names outside the
    /// vocabulary return `None`, which the readers record as hetero residues.
    ///
    /// # Arguments
    ///
    /// * `raw_name` - Residue name as written in the file, e.g. `"HIE"` or `" hoh"`.
    ///
    /// # Returns
    ///
    /// The standard residue the name stands for, if any.
    pub fn classify_residue(&self, raw_name: &str) -> Option<StandardResidue> {
        let name = raw_name.trim().to_ascii_uppercase();
        self.alias_map.get(name.as_str()).copied()
    }
}

impl Default for IoContext {
    fn default() -> Self {
        Self::new_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_residue_recognizes_standard_codes() {
        let ctx = IoContext::new_default();

        assert_eq!(ctx.classify_residue("ALA"), Some(StandardResidue::ALA));
        assert_eq!(ctx.classify_residue("DT"), Some(StandardResidue::DT));
        assert_eq!(ctx.classify_residue(" gly "), Some(StandardResidue::GLY));
    }

    #[test]
    fn classify_residue_collapses_protonation_and_water_aliases() {
        let ctx = IoContext::new_default();

        assert_eq!(ctx.classify_residue("HIP"), Some(StandardResidue::HIS));
        assert_eq!(ctx.classify_residue("CYX"), Some(StandardResidue::CYS));
        assert_eq!(ctx.classify_residue("WAT"), Some(StandardResidue::HOH));
    }

    #[test]
    fn classify_residue_keeps_modified_residues_hetero() {
        let ctx = IoContext::new_default();

        assert_eq!(ctx.classify_residue("MSE"), None);
        assert_eq!(ctx.classify_residue("NAG"), None);
        assert_eq!(ctx.classify_residue("ZN"), None);
    }

    #[test]
    fn with_scheme_switches_numbering() {
        let ctx = IoContext::new_default();
        assert_eq!(ctx.scheme(), NumberingScheme::Author);

        let label = ctx.with_scheme(NumberingScheme::Label);
        assert_eq!(label.scheme(), NumberingScheme::Label);
    }
}
