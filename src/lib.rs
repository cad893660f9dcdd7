//! # EpiForge
//!
//! **EpiForge** turns antibody and antigen structure files into a deterministic, bidirectional
//! map between author residue numbering (chain, sequence number, insertion code) and a dense
//! zero-based canonical numbering, then uses that map to resolve user hotspots and drive
//! external design tools.
//!
//! ## Stages
//!
//! - **Loading** – [`io::load_structure`] reads PDB or mmCIF, detecting the format by extension
//!   and content, and reports duplicate author positions as warnings.
//! - **Standardization** – [`standardize::standardize`] renames chains canonically and writes an
//!   mmCIF copy numbered `0, 1, 2, ...` per chain that keeps every author reference.
//! - **Mapping** – [`mapping::build_mapping`] produces the [`mapping::MappingResult`] table every
//!   later identifier translation goes through.
//! - **Hotspots** – [`hotspot::resolve_hotspots`] parses `"L:52A"`-style references and resolves
//!   each one independently.
//! - **Numbering** – [`numbering::annotate_cdrs`] asks a [`numbering::NumberingService`] for the
//!   scaffold's CDRs and places them on canonical positions.
//! - **Export** – [`export::export_all`] renders the JSON report, remark annotations, the
//!   RFantibody hotspot file, the BoltzGen binding YAML, and an HLT-ordered PDB.
//! - **Supervision** – [`supervisor::ToolSupervisor`] runs external tools with a wall-clock
//!   timeout, bounded retries, and cancellation.
//! - **Orchestration** – [`pipeline::Orchestrator`] sequences all of the above for one job and
//!   reports to a [`store::TaskStore`].

mod model;
mod utils;

pub mod config;
pub mod export;
pub mod hotspot;
pub mod io;
pub mod mapping;
pub mod numbering;
pub mod pipeline;
pub mod standardize;
pub mod store;
pub mod supervisor;

pub use model::atom::Atom;
pub use model::chain::Chain;
pub use model::reference::AuthorRef;
pub use model::residue::Residue;
pub use model::structure::{Structure, UnitCell};
pub use model::types::{Element, Point, ResidueCategory, StandardResidue};
