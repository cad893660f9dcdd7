//! Canonical renumbering of loaded structures.
//!
//! Every chain receives a canonical identifier from the stable-sorted list of author chain
//! identifiers, and every residue a 0-based, gap-free position in file order. The canonical
//! copy is written as mmCIF whose `label_*` columns hold the canonical numbering and whose
//! `auth_*` columns keep each residue's author reference.

use crate::io::{self, IoContext, LoadedFile, NumberingScheme, StructureFormat};
use crate::model::{chain::Chain, residue::Residue, structure::Structure};
use crate::utils::parallel::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub use crate::io::CANONICAL_BLOCK_NAME;

/// File name of the author-to-canonical chain map written next to canonical files.
pub const CHAIN_MAP_FILE: &str = "chain_map.json";

const CHAIN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// A canonical structure on disk together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardizedStructure {
    pub input_path: PathBuf,
    pub input_format: StructureFormat,
    pub standardized_path: PathBuf,
    /// Author chain identifier to canonical chain identifier.
    pub chain_id_map: BTreeMap<String, String>,
}

impl StandardizedStructure {
    /// Reads the canonical file back, numbered by canonical chain and position.
    pub fn read_canonical(&self) -> Result<Structure, io::Error> {
        let file = File::open(&self.standardized_path)
            .map_err(|e| io::Error::from_io(e, Some(self.standardized_path.clone())))?;
        let context = IoContext::new_default().with_scheme(NumberingScheme::Label);
        io::read_mmcif_structure(std::io::BufReader::new(file), &context)
            .map(|loaded| loaded.structure)
            .map_err(|e| e.with_path(self.standardized_path.clone()))
    }

    /// True when every author chain kept its identifier.
    pub fn is_identity(&self) -> bool {
        self.chain_id_map.iter().all(|(author, canonical)| author == canonical)
    }
}

#[derive(Debug, Error)]
pub enum StandardizeError {
    #[error("cannot standardize chain '{chain}' residue {residue}: {details}")]
    StandardizationError {
        chain: String,
        residue: String,
        details: String,
    },
    #[error("failed to write canonical structure: {0}")]
    Write(#[from] io::Error),
    #[error("failed to write chain map '{}': {source}", path.display())]
    ChainMap {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Canonical identifier for the chain at `rank` in sorted order.
///
/// Ranks run through `A..Z`, `a..z`, `0..9`, then every two-character identifier `AA`, `AB`,
/// ... `99`, then three characters, and so on. Distinct ranks always yield distinct ids.
pub fn canonical_chain_id(rank: usize) -> String {
    let base = CHAIN_ALPHABET.len();
    let mut rest = rank;
    let mut width = 1u32;
    let mut block = base;
    while rest >= block {
        rest -= block;
        width += 1;
        block = match block.checked_mul(base) {
            Some(next) => next,
            None => break,
        };
    }

    let mut id = vec![CHAIN_ALPHABET[0]; width as usize];
    for slot in id.iter_mut().rev() {
        *slot = CHAIN_ALPHABET[rest % base];
        rest /= base;
    }
    id.into_iter().map(char::from).collect()
}

/// Ordering key under which canonical identifiers sort in the order they are generated.
pub(crate) fn chain_sort_key(id: &str) -> (usize, Vec<u32>) {
    let ranks = id
        .chars()
        .map(|c| match CHAIN_ALPHABET.iter().position(|&b| b as char == c) {
            Some(pos) => pos as u32,
            None => CHAIN_ALPHABET.len() as u32 + c as u32,
        })
        .collect();
    (id.chars().count(), ranks)
}

/// Builds the canonical in-memory copy of `structure` and its chain map.
///
/// # Errors
///
/// Returns [`StandardizeError::StandardizationError`] for the first chain (in file order) that
/// holds an atom or residue the canonical serializer cannot represent.
pub fn canonicalize(
    structure: &Structure,
) -> Result<(Structure, BTreeMap<String, String>), StandardizeError> {
    let chains: Vec<&Chain> = structure.iter_chains().collect();
    let checks: Vec<Result<(), StandardizeError>> =
        chains.par_iter().map(|chain| check_chain(chain)).collect();
    checks.into_iter().collect::<Result<Vec<()>, _>>()?;

    let mut order = chains;
    order.sort_by_key(|chain| chain_sort_key(&chain.id));

    let mut canonical = Structure::new();
    canonical.cell = structure.cell;
    let mut chain_id_map = BTreeMap::new();

    for (rank, chain) in order.into_iter().enumerate() {
        let canonical_id = canonical_chain_id(rank);
        let mut renumbered = Chain::new(&canonical_id);

        for (position, residue) in chain.iter_residues().enumerate() {
            let mut copy = Residue::new(
                position as i32,
                None,
                &residue.name,
                residue.standard_name,
            );
            copy.is_hetatm = residue.is_hetatm;
            copy.origin = Some(residue.author_ref(&chain.id));
            for atom in residue.iter_atoms() {
                copy.add_atom(atom.clone());
            }
            renumbered.add_residue(copy);
        }

        debug!(author = %chain.id, canonical = %canonical_id, "assigned canonical chain");
        chain_id_map.insert(chain.id.clone(), canonical_id);
        canonical.add_chain(renumbered);
    }

    Ok((canonical, chain_id_map))
}

fn check_chain(chain: &Chain) -> Result<(), StandardizeError> {
    let fail = |residue: &Residue, details: String| StandardizeError::StandardizationError {
        chain: chain.id.clone(),
        residue: residue.author_ref(&chain.id).residue_token(),
        details,
    };

    for residue in chain.iter_residues() {
        let author = residue.author_ref(&chain.id);
        if author.chain.is_empty() || author.chain.contains(char::is_whitespace) {
            return Err(fail(
                residue,
                "blank chain identifier cannot be written to the auth_asym_id column".into(),
            ));
        }
        if residue.name.is_empty() || residue.name.contains(char::is_whitespace) {
            return Err(fail(
                residue,
                format!("residue name '{}' cannot be serialized", residue.name),
            ));
        }
        for atom in residue.iter_atoms() {
            if !atom.element.is_known() {
                return Err(fail(
                    residue,
                    format!("atom '{}' has an unsupported element", atom.name),
                ));
            }
            if !atom.has_finite_position() {
                return Err(fail(
                    residue,
                    format!("atom '{}' has non-finite coordinates", atom.name),
                ));
            }
        }
    }
    Ok(())
}

/// Writes the canonical copy of a loaded file into `output_dir`.
///
/// The structure goes to `standardized_<label>.cif` and the chain map to
/// [`CHAIN_MAP_FILE`] in the same directory.
pub fn standardize(
    input_path: &Path,
    file: &LoadedFile,
    output_dir: &Path,
    label: &str,
) -> Result<StandardizedStructure, StandardizeError> {
    let (canonical, chain_id_map) = canonicalize(&file.loaded.structure)?;

    fs::create_dir_all(output_dir)
        .map_err(|e| io::Error::from_io(e, Some(output_dir.to_path_buf())))?;
    let standardized_path = output_dir.join(format!("standardized_{label}.cif"));

    let out = File::create(&standardized_path)
        .map_err(|e| io::Error::from_io(e, Some(standardized_path.clone())))?;
    let mut writer = BufWriter::new(out);
    io::write_mmcif_structure(&mut writer, &canonical, CANONICAL_BLOCK_NAME)
        .map_err(|e| e.with_path(standardized_path.clone()))?;
    writer
        .flush()
        .map_err(|e| io::Error::from_io(e, Some(standardized_path.clone())))?;

    let map_path = output_dir.join(CHAIN_MAP_FILE);
    write_json(&map_path, &chain_id_map)?;

    info!(
        input = %input_path.display(),
        output = %standardized_path.display(),
        chains = chain_id_map.len(),
        "standardized structure"
    );

    Ok(StandardizedStructure {
        input_path: input_path.to_path_buf(),
        input_format: file.format,
        standardized_path,
        chain_id_map,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StandardizeError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StandardizeError::ChainMap {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, bytes).map_err(|e| io::Error::from_io(e, Some(path.to_path_buf())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{LoadedStructure, load_structure};
    use crate::model::atom::Atom;
    use crate::model::types::{Element, Point};
    use tempfile::TempDir;

    fn residue(id: i32, icode: Option<char>, name: &str) -> Residue {
        let mut residue = Residue::new(id, icode, name, name.parse().ok());
        residue.add_atom(Atom::new("CA", Element::C, Point::new(id as f64, 0.0, 0.0)));
        residue
    }

    fn author_structure() -> Structure {
        let mut structure = Structure::new();
        let mut light = Chain::new("L");
        light.add_residue(residue(52, None, "SER"));
        light.add_residue(residue(52, Some('A'), "GLY"));
        light.add_residue(residue(60, None, "TYR"));
        let mut heavy = Chain::new("H");
        heavy.add_residue(residue(1, None, "GLU"));
        heavy.add_residue(residue(2, None, "VAL"));
        heavy.add_residue(residue(301, None, "NAG"));
        structure.add_chain(light);
        structure.add_chain(heavy);
        structure
    }

    fn loaded_file(structure: Structure) -> LoadedFile {
        LoadedFile {
            format: StructureFormat::Pdb,
            loaded: LoadedStructure {
                structure,
                warnings: Vec::new(),
            },
        }
    }

    #[test]
    fn canonical_chain_id_follows_rank_alphabet() {
        assert_eq!(canonical_chain_id(0), "A");
        assert_eq!(canonical_chain_id(25), "Z");
        assert_eq!(canonical_chain_id(26), "a");
        assert_eq!(canonical_chain_id(52), "0");
        assert_eq!(canonical_chain_id(61), "9");
        assert_eq!(canonical_chain_id(62), "AA");
        assert_eq!(canonical_chain_id(63), "AB");
        assert_eq!(canonical_chain_id(62 + 62 * 62 - 1), "99");
        assert_eq!(canonical_chain_id(62 + 62 * 62), "AAA");
    }

    #[test]
    fn canonical_chain_ids_never_repeat() {
        let ids: std::collections::HashSet<String> =
            (0..5000).map(canonical_chain_id).collect();
        assert_eq!(ids.len(), 5000);
    }

    #[test]
    fn canonical_chain_ids_sort_in_generation_order() {
        let ids: Vec<String> = (0..4100).map(canonical_chain_id).collect();
        let mut sorted = ids.clone();
        sorted.sort_by_key(|id| chain_sort_key(id));
        assert_eq!(sorted, ids);
    }

    #[test]
    fn canonicalize_sorts_chains_and_renumbers_from_zero() {
        let (canonical, map) = canonicalize(&author_structure()).unwrap();

        assert_eq!(map.get("H").map(String::as_str), Some("A"));
        assert_eq!(map.get("L").map(String::as_str), Some("B"));

        let light = canonical.chain("B").unwrap();
        let ids: Vec<_> = light.iter_residues().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(light.residue(1, None).unwrap().origin.as_ref().unwrap().token(), "L:52A");
        assert!(light.iter_residues().all(|r| r.insertion_code.is_none()));
    }

    #[test]
    fn canonicalize_keeps_hetero_residues_in_place() {
        let (canonical, _) = canonicalize(&author_structure()).unwrap();

        let heavy = canonical.chain("A").unwrap();
        let sugar = heavy.residue(2, None).unwrap();
        assert_eq!(sugar.name, "NAG");
        assert_eq!(sugar.origin.as_ref().unwrap().token(), "H:301");
    }

    #[test]
    fn canonicalize_rejects_unknown_elements() {
        let mut structure = author_structure();
        let mut odd = Chain::new("X");
        let mut res = Residue::new(7, None, "UNK", None);
        res.add_atom(Atom::new("Q1", Element::Unknown, Point::origin()));
        odd.add_residue(res);
        structure.add_chain(odd);

        let err = canonicalize(&structure).unwrap_err();
        match err {
            StandardizeError::StandardizationError { chain, residue, .. } => {
                assert_eq!(chain, "X");
                assert_eq!(residue, "7");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn canonicalize_rejects_non_finite_coordinates() {
        let mut structure = Structure::new();
        let mut chain = Chain::new("A");
        let mut res = Residue::new(1, None, "ALA", "ALA".parse().ok());
        res.add_atom(Atom::new("CA", Element::C, Point::new(f64::NAN, 0.0, 0.0)));
        chain.add_residue(res);
        structure.add_chain(chain);

        assert!(matches!(
            canonicalize(&structure),
            Err(StandardizeError::StandardizationError { .. })
        ));
    }

    #[test]
    fn standardize_writes_canonical_file_and_chain_map() {
        let dir = TempDir::new().unwrap();
        let file = loaded_file(author_structure());

        let result = standardize(Path::new("in.pdb"), &file, dir.path(), "target").unwrap();
        assert_eq!(
            result.standardized_path,
            dir.path().join("standardized_target.cif")
        );

        let text = fs::read_to_string(&result.standardized_path).unwrap();
        assert!(text.starts_with("data_epiforge_standardized\n"));

        let map: BTreeMap<String, String> =
            serde_json::from_slice(&fs::read(dir.path().join(CHAIN_MAP_FILE)).unwrap()).unwrap();
        assert_eq!(map, result.chain_id_map);

        let canonical = result.read_canonical().unwrap();
        assert_eq!(canonical.chain("B").unwrap().residue_count(), 3);
    }

    #[test]
    fn standardize_is_idempotent_on_canonical_files() {
        let dir = TempDir::new().unwrap();
        let first = standardize(
            Path::new("in.pdb"),
            &loaded_file(author_structure()),
            &dir.path().join("first"),
            "target",
        )
        .unwrap();
        assert!(!first.is_identity());

        let reloaded =
            load_structure(&first.standardized_path, &IoContext::new_default()).unwrap();
        let second = standardize(
            &first.standardized_path,
            &reloaded,
            &dir.path().join("second"),
            "target",
        )
        .unwrap();

        assert!(second.is_identity());
        let a = fs::read_to_string(&first.standardized_path).unwrap();
        let b = fs::read_to_string(&second.standardized_path).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn standardize_output_recovers_author_numbering() {
        let dir = TempDir::new().unwrap();
        let result = standardize(
            Path::new("in.pdb"),
            &loaded_file(author_structure()),
            dir.path(),
            "target",
        )
        .unwrap();

        let reloaded =
            load_structure(&result.standardized_path, &IoContext::new_default()).unwrap();
        let light = reloaded.loaded.structure.chain("B").unwrap();
        let tokens: Vec<_> = light
            .iter_residues()
            .map(|r| r.author_ref("B").token())
            .collect();
        assert_eq!(tokens, vec!["L:52", "L:52A", "L:60"]);
    }
}
