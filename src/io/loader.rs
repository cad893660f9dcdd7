//! Format detection and the file-level loading entry point.

use crate::io::builder::LoadedStructure;
use crate::io::context::{IoContext, NumberingScheme};
use crate::io::error::Error;
use crate::io::{mmcif, pdb};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, Cursor};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// mmCIF data block name of canonical files written by the standardizer.
pub const CANONICAL_BLOCK_NAME: &str = "epiforge_standardized";

/// Serialization formats the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureFormat {
    Pdb,
    Mmcif,
}

impl StructureFormat {
    /// Attempts to infer a format from a file path extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdb" | "ent" => Some(Self::Pdb),
            "cif" | "mmcif" => Some(Self::Mmcif),
            _ => None,
        }
    }

    /// Guesses the format from the leading records of a file.
    pub fn sniff(content: &str) -> Option<Self> {
        for line in content.lines().take(200) {
            let trimmed = line.trim_start();
            if trimmed.starts_with("data_") || trimmed.starts_with("_atom_site.") {
                return Some(Self::Mmcif);
            }
            if ["ATOM  ", "HETATM", "HEADER", "CRYST1"]
                .iter()
                .any(|tag| line.starts_with(tag))
            {
                return Some(Self::Pdb);
            }
        }
        None
    }

    fn other(self) -> Self {
        match self {
            Self::Pdb => Self::Mmcif,
            Self::Mmcif => Self::Pdb,
        }
    }
}

impl fmt::Display for StructureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureFormat::Pdb => write!(f, "PDB"),
            StructureFormat::Mmcif => write!(f, "mmCIF"),
        }
    }
}

/// Failures of the structure-loading stage.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unreadable structure '{}': {source}", path.display())]
    UnreadableStructure {
        path: PathBuf,
        #[source]
        source: Error,
    },
    #[error("structure '{}' contains no polymer chains", path.display())]
    EmptyStructure { path: PathBuf },
}

/// Structure read from disk together with the format it was parsed as.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub format: StructureFormat,
    pub loaded: LoadedStructure,
}

/// Returns `true` when `content` opens with the canonical data block.
///
/// Canonical files carry their canonical numbering in the `label_*` columns, so the loader
/// reads them in [`NumberingScheme::Label`] whatever scheme the caller asked for.
pub fn is_canonical(content: &str) -> bool {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .and_then(|line| line.strip_prefix("data_"))
        .is_some_and(|block| block == CANONICAL_BLOCK_NAME)
}

/// Parses a reader in an explicit format.
pub fn read_structure<R: BufRead>(
    reader: R,
    format: StructureFormat,
    context: &IoContext,
) -> Result<LoadedStructure, Error> {
    match format {
        StructureFormat::Pdb => pdb::reader::read(reader, context),
        StructureFormat::Mmcif => mmcif::reader::read(reader, context),
    }
}

/// Loads a structure file, detecting its format by extension and then by content.
///
/// When the preferred format fails to parse, the other format is tried before giving up.
///
/// # Errors
///
/// Returns [`LoadError::UnreadableStructure`] when neither format yields atoms and
/// [`LoadError::EmptyStructure`] when the parsed model has no polymer chain.
pub fn load_structure(path: &Path, context: &IoContext) -> Result<LoadedFile, LoadError> {
    let unreadable = |source: Error| LoadError::UnreadableStructure {
        path: path.to_path_buf(),
        source: source.with_path(path.to_path_buf()),
    };

    let content = std::fs::read_to_string(path).map_err(|e| unreadable(Error::from_io(e, None)))?;

    let preferred = StructureFormat::from_path(path)
        .or_else(|| StructureFormat::sniff(&content))
        .ok_or_else(|| unreadable(Error::UnsupportedFormat { path: None }))?;
    debug!(path = %path.display(), format = %preferred, "parsing structure");

    let label_context;
    let context = if is_canonical(&content) && context.scheme() == NumberingScheme::Author {
        debug!(path = %path.display(), "canonical file, reading label numbering");
        label_context = context.clone().with_scheme(NumberingScheme::Label);
        &label_context
    } else {
        context
    };

    let (format, loaded) = match read_structure(Cursor::new(&content), preferred, context) {
        Ok(loaded) if loaded.structure.atom_count() > 0 => (preferred, loaded),
        first => {
            let fallback = preferred.other();
            match read_structure(Cursor::new(&content), fallback, context) {
                Ok(loaded) if loaded.structure.atom_count() > 0 => {
                    warn!(
                        path = %path.display(),
                        expected = %preferred,
                        actual = %fallback,
                        "structure parsed with the fallback format"
                    );
                    (fallback, loaded)
                }
                _ => match first {
                    Ok(loaded) => (preferred, loaded),
                    Err(err) => return Err(unreadable(err)),
                },
            }
        }
    };

    if loaded.structure.polymer_chain_count() == 0 {
        return Err(LoadError::EmptyStructure {
            path: path.to_path_buf(),
        });
    }

    for warning in &loaded.warnings {
        warn!(path = %path.display(), "{warning}");
    }

    Ok(LoadedFile { format, loaded })
}
