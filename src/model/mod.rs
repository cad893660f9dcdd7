pub mod atom;
pub mod chain;
pub mod reference;
pub mod residue;
pub mod structure;
pub mod types;
