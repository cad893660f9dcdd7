mod builder;
mod context;
mod error;
mod loader;
mod mmcif;
mod pdb;

pub use pdb::reader::read as read_pdb_structure;
pub use pdb::writer::write_structure as write_pdb_structure;

pub use mmcif::reader::read as read_mmcif_structure;
pub use mmcif::writer::write_structure as write_mmcif_structure;

pub use builder::{LoadWarning, LoadedStructure};
pub use context::{IoContext, NumberingScheme};
pub use loader::{
    CANONICAL_BLOCK_NAME, LoadError, LoadedFile, StructureFormat, is_canonical, load_structure,
    read_structure,
};

pub use error::Error;
