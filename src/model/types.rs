//! Chemical and residue vocabularies shared by the readers, writers, and the mapper.
//!
//! The element table drives the standardizer's representability checks, while the closed
//! residue vocabulary decides which residues count as protein, nucleic, or hetero.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cartesian coordinate in ångströms.
pub type Point = Point3<f64>;

macro_rules! periodic_table {
    ($($variant:ident = $number:literal),+ $(,)?) => {
        /// Chemical element identified by its atomic number.
        ///
        /// `Unknown` marks atoms whose element column and atom name both failed to resolve;
        /// such atoms cannot be written to the canonical file.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Element {
            Unknown = 0,
            $($variant = $number,)+
        }

        impl Element {
            const TABLE: &'static [Element] = &[$(Element::$variant),+];

            /// Returns the IUPAC symbol (e.g. `"Fe"`), or `"Unknown"`.
            pub fn symbol(&self) -> &'static str {
                match self {
                    Element::Unknown => "Unknown",
                    $(Element::$variant => stringify!($variant),)+
                }
            }
        }
    };
}

periodic_table! {
    H = 1, He = 2, Li = 3, Be = 4, B = 5, C = 6, N = 7, O = 8, F = 9, Ne = 10,
    Na = 11, Mg = 12, Al = 13, Si = 14, P = 15, S = 16, Cl = 17, Ar = 18, K = 19, Ca = 20,
    Sc = 21, Ti = 22, V = 23, Cr = 24, Mn = 25, Fe = 26, Co = 27, Ni = 28, Cu = 29, Zn = 30,
    Ga = 31, Ge = 32, As = 33, Se = 34, Br = 35, Kr = 36, Rb = 37, Sr = 38, Y = 39, Zr = 40,
    Nb = 41, Mo = 42, Tc = 43, Ru = 44, Rh = 45, Pd = 46, Ag = 47, Cd = 48, In = 49, Sn = 50,
    Sb = 51, Te = 52, I = 53, Xe = 54, Cs = 55, Ba = 56, La = 57, Ce = 58, Pr = 59, Nd = 60,
    Pm = 61, Sm = 62, Eu = 63, Gd = 64, Tb = 65, Dy = 66, Ho = 67, Er = 68, Tm = 69, Yb = 70,
    Lu = 71, Hf = 72, Ta = 73, W = 74, Re = 75, Os = 76, Ir = 77, Pt = 78, Au = 79, Hg = 80,
    Tl = 81, Pb = 82, Bi = 83, Po = 84, At = 85, Rn = 86, Fr = 87, Ra = 88, Ac = 89, Th = 90,
    Pa = 91, U = 92, Np = 93, Pu = 94, Am = 95, Cm = 96, Bk = 97, Cf = 98, Es = 99, Fm = 100,
    Md = 101, No = 102, Lr = 103, Rf = 104, Db = 105, Sg = 106, Bh = 107, Hs = 108, Mt = 109,
    Ds = 110, Rg = 111, Cn = 112, Nh = 113, Fl = 114, Mc = 115, Lv = 116, Ts = 117, Og = 118,
}

impl Element {
    pub fn atomic_number(&self) -> u8 {
        *self as u8
    }

    pub fn is_known(&self) -> bool {
        *self != Element::Unknown
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for Element {
    type Err = String;

    /// Parses an element symbol case-insensitively (`"FE"`, `"Fe"`) or an atomic number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(number) = s.parse::<u8>() {
            return Element::TABLE
                .iter()
                .copied()
                .find(|e| e.atomic_number() == number)
                .ok_or_else(|| format!("Invalid atomic number: {}", s));
        }

        Element::TABLE
            .iter()
            .copied()
            .find(|e| e.symbol().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid element symbol: {}", s))
    }
}

/// Residue category used by the mapping table.
///
/// Only residues in the closed amino-acid and nucleotide vocabularies are polymer
/// categories; waters, ions, ligands, and modified residues are all `Hetero`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResidueCategory {
    Protein,
    Nucleic,
    Hetero,
}

impl ResidueCategory {
    pub fn name(&self) -> &'static str {
        match self {
            ResidueCategory::Protein => "protein",
            ResidueCategory::Nucleic => "nucleic",
            ResidueCategory::Hetero => "hetero",
        }
    }

    pub fn is_polymer(&self) -> bool {
        !matches!(self, ResidueCategory::Hetero)
    }
}

impl fmt::Display for ResidueCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ResidueCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "protein" => Ok(ResidueCategory::Protein),
            "nucleic" => Ok(ResidueCategory::Nucleic),
            "hetero" => Ok(ResidueCategory::Hetero),
            _ => Err(format!("Invalid residue category: {}", s)),
        }
    }
}

macro_rules! standard_residues {
    ($($variant:ident => $code:literal, $category:ident, $letter:expr;)+) => {
        /// Closed vocabulary of residues the mapper recognizes by name.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StandardResidue {
            $($variant,)+
        }

        impl StandardResidue {
            /// Canonical PDB component code.
            pub fn code(&self) -> &'static str {
                match self {
                    $(StandardResidue::$variant => $code,)+
                }
            }

            pub fn category(&self) -> ResidueCategory {
                match self {
                    $(StandardResidue::$variant => ResidueCategory::$category,)+
                }
            }

            /// One-letter code used in chain sequences; water has none.
            pub fn one_letter(&self) -> Option<char> {
                match self {
                    $(StandardResidue::$variant => $letter,)+
                }
            }
        }

        impl FromStr for StandardResidue {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($code => Ok(StandardResidue::$variant),)+
                    _ => Err(format!("Invalid standard residue: {}", s)),
                }
            }
        }
    };
}

standard_residues! {
    ALA => "ALA", Protein, Some('A');
    ARG => "ARG", Protein, Some('R');
    ASN => "ASN", Protein, Some('N');
    ASP => "ASP", Protein, Some('D');
    CYS => "CYS", Protein, Some('C');
    GLN => "GLN", Protein, Some('Q');
    GLU => "GLU", Protein, Some('E');
    GLY => "GLY", Protein, Some('G');
    HIS => "HIS", Protein, Some('H');
    ILE => "ILE", Protein, Some('I');
    LEU => "LEU", Protein, Some('L');
    LYS => "LYS", Protein, Some('K');
    MET => "MET", Protein, Some('M');
    PHE => "PHE", Protein, Some('F');
    PRO => "PRO", Protein, Some('P');
    SER => "SER", Protein, Some('S');
    THR => "THR", Protein, Some('T');
    TRP => "TRP", Protein, Some('W');
    TYR => "TYR", Protein, Some('Y');
    VAL => "VAL", Protein, Some('V');
    SEC => "SEC", Protein, Some('U');
    PYL => "PYL", Protein, Some('O');
    A => "A", Nucleic, Some('A');
    C => "C", Nucleic, Some('C');
    G => "G", Nucleic, Some('G');
    U => "U", Nucleic, Some('U');
    I => "I", Nucleic, Some('I');
    DA => "DA", Nucleic, Some('A');
    DC => "DC", Nucleic, Some('C');
    DG => "DG", Nucleic, Some('G');
    DT => "DT", Nucleic, Some('T');
    DI => "DI", Nucleic, Some('I');
    HOH => "HOH", Hetero, None;
}

impl StandardResidue {
    pub fn is_protein(&self) -> bool {
        self.category() == ResidueCategory::Protein
    }

    pub fn is_nucleic(&self) -> bool {
        self.category() == ResidueCategory::Nucleic
    }
}

impl fmt::Display for StandardResidue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_symbol_returns_correct_value() {
        assert_eq!(Element::H.symbol(), "H");
        assert_eq!(Element::Fe.symbol(), "Fe");
        assert_eq!(Element::Og.symbol(), "Og");
        assert_eq!(Element::Unknown.symbol(), "Unknown");
    }

    #[test]
    fn element_from_str_is_case_insensitive() {
        assert_eq!(Element::from_str("FE"), Ok(Element::Fe));
        assert_eq!(Element::from_str("fe"), Ok(Element::Fe));
        assert_eq!(Element::from_str(" C "), Ok(Element::C));
        assert_eq!(Element::from_str("NA"), Ok(Element::Na));
    }

    #[test]
    fn element_from_str_parses_atomic_numbers() {
        assert_eq!(Element::from_str("6"), Ok(Element::C));
        assert_eq!(Element::from_str("118"), Ok(Element::Og));
        assert!(Element::from_str("0").is_err());
        assert!(Element::from_str("200").is_err());
    }

    #[test]
    fn element_from_str_rejects_unknown_symbols() {
        assert!(Element::from_str("Xx").is_err());
        assert!(Element::from_str("").is_err());
        assert!(!Element::Unknown.is_known());
    }

    #[test]
    fn residue_category_round_trips_through_names() {
        for category in [
            ResidueCategory::Protein,
            ResidueCategory::Nucleic,
            ResidueCategory::Hetero,
        ] {
            assert_eq!(category.name().parse::<ResidueCategory>(), Ok(category));
        }
        assert!("ion".parse::<ResidueCategory>().is_err());
    }

    #[test]
    fn residue_category_serializes_lowercase() {
        let json = serde_json::to_string(&ResidueCategory::Nucleic).unwrap();
        assert_eq!(json, "\"nucleic\"");
    }

    #[test]
    fn standard_residue_categories_and_letters() {
        assert_eq!(StandardResidue::SEC.one_letter(), Some('U'));
        assert_eq!(StandardResidue::PYL.one_letter(), Some('O'));
        assert_eq!(StandardResidue::DT.one_letter(), Some('T'));
        assert_eq!(StandardResidue::HOH.one_letter(), None);
        assert!(StandardResidue::GLY.is_protein());
        assert!(StandardResidue::DA.is_nucleic());
        assert_eq!(StandardResidue::HOH.category(), ResidueCategory::Hetero);
    }

    #[test]
    fn standard_residue_from_str_matches_codes() {
        assert_eq!("TRP".parse::<StandardResidue>(), Ok(StandardResidue::TRP));
        assert_eq!("DG".parse::<StandardResidue>(), Ok(StandardResidue::DG));
        assert!("MSE".parse::<StandardResidue>().is_err());
        assert_eq!(StandardResidue::VAL.to_string(), "VAL");
    }
}
