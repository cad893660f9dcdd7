//! mmCIF serializer used for canonical structure files.
//!
//! `label_*` columns carry the structure's own chain and residue numbering while `auth_*`
//! columns carry each residue's author reference. Written from a canonical structure, this
//! makes the file readable in either numbering scheme. Polymer chains also get an
//! `_entity_poly_seq` loop.

use crate::io::error::Error;
use crate::model::{atom::Atom, chain::Chain, residue::Residue, structure::Structure};
use std::io::Write;

/// Serializes a [`Structure`] into an mmCIF data block named `block_name`.
///
/// # Arguments
///
/// * `writer` - Destination that implements [`Write`].
/// * `structure` - Source structure providing atoms and unit-cell information.
/// * `block_name` - Name written after `data_`.
///
/// # Returns
///
/// [`Ok`] on success or [`Error`] if any IO operation fails.
pub fn write_structure<W: Write>(
    writer: W,
    structure: &Structure,
    block_name: &str,
) -> Result<(), Error> {
    let mut ctx = WriterContext::new(writer);

    ctx.write_header(block_name)?;
    ctx.write_cell(structure, block_name)?;
    ctx.write_entity_poly_seq(structure)?;
    ctx.write_atoms(structure)?;

    Ok(())
}

struct WriterContext<W> {
    writer: W,
    current_atom_id: usize,
}

impl<W: Write> WriterContext<W> {
    fn new(writer: W) -> Self {
        Self {
            writer,
            current_atom_id: 1,
        }
    }

    fn line(&mut self, text: &str) -> Result<(), Error> {
        writeln!(self.writer, "{text}").map_err(|e| Error::from_io(e, None))
    }

    fn write_header(&mut self, block_name: &str) -> Result<(), Error> {
        self.line(&format!("data_{block_name}"))?;
        self.line("#")
    }

    fn write_cell(&mut self, structure: &Structure, block_name: &str) -> Result<(), Error> {
        let Some(cell) = structure.cell else {
            return Ok(());
        };

        self.line(&format!("_cell.entry_id           {block_name}"))?;
        self.line(&format!("_cell.length_a           {:.3}", cell.a))?;
        self.line(&format!("_cell.length_b           {:.3}", cell.b))?;
        self.line(&format!("_cell.length_c           {:.3}", cell.c))?;
        self.line(&format!("_cell.angle_alpha        {:.2}", cell.alpha))?;
        self.line(&format!("_cell.angle_beta         {:.2}", cell.beta))?;
        self.line(&format!("_cell.angle_gamma        {:.2}", cell.gamma))?;
        self.line("#")
    }

    /// Lists the polymer residues of each polymer chain, one entity per chain.
    fn write_entity_poly_seq(&mut self, structure: &Structure) -> Result<(), Error> {
        if structure.polymer_chain_count() == 0 {
            return Ok(());
        }

        self.line("loop_")?;
        self.line("_entity_poly_seq.entity_id")?;
        self.line("_entity_poly_seq.num")?;
        self.line("_entity_poly_seq.mon_id")?;
        self.line("_entity_poly_seq.hetero")?;

        for (entity_id, chain) in entity_chains(structure) {
            if !chain.is_polymer() {
                continue;
            }
            for residue in chain.iter_residues().filter(|r| r.is_polymer()) {
                let mon_id = quote_string(&residue.name);
                self.line(&format!("{entity_id} {} {mon_id} n", residue.id))?;
            }
        }
        self.line("#")
    }

    fn write_atoms(&mut self, structure: &Structure) -> Result<(), Error> {
        for header in [
            "loop_",
            "_atom_site.group_PDB",
            "_atom_site.id",
            "_atom_site.type_symbol",
            "_atom_site.label_atom_id",
            "_atom_site.label_alt_id",
            "_atom_site.label_comp_id",
            "_atom_site.label_asym_id",
            "_atom_site.label_entity_id",
            "_atom_site.label_seq_id",
            "_atom_site.pdbx_PDB_ins_code",
            "_atom_site.Cartn_x",
            "_atom_site.Cartn_y",
            "_atom_site.Cartn_z",
            "_atom_site.occupancy",
            "_atom_site.B_iso_or_equiv",
            "_atom_site.auth_seq_id",
            "_atom_site.auth_comp_id",
            "_atom_site.auth_asym_id",
            "_atom_site.auth_atom_id",
            "_atom_site.pdbx_PDB_model_num",
        ] {
            self.line(header)?;
        }

        for (entity_id, chain) in entity_chains(structure) {
            for residue in chain.iter_residues() {
                for atom in residue.iter_atoms() {
                    self.write_atom_record(atom, residue, chain, entity_id)?;
                    self.current_atom_id += 1;
                }
            }
        }
        self.line("#")
    }

    fn write_atom_record(
        &mut self,
        atom: &Atom,
        residue: &Residue,
        chain: &Chain,
        entity_id: usize,
    ) -> Result<(), Error> {
        let group_pdb = if residue.is_polymer() && !residue.is_hetatm {
            "ATOM"
        } else {
            "HETATM"
        };
        let author = residue.author_ref(&chain.id);

        let type_symbol = atom.element.symbol();
        let atom_id = quote_string(&atom.name);
        let comp_id = quote_string(&residue.name);
        let label_asym_id = quote_string(&chain.id);
        let auth_asym_id = quote_string(&author.chain);
        let ins_code = author
            .insertion_code
            .map(String::from)
            .unwrap_or_else(|| "?".to_string());

        writeln!(
            self.writer,
            "{group_pdb} {id} {type_symbol} {atom_id} . {comp_id} {label_asym_id} {entity_id} {label_seq_id} {ins_code} {x:.3} {y:.3} {z:.3} {occ:.2} {b:.2} {auth_seq_id} {comp_id} {auth_asym_id} {atom_id} 1",
            id = self.current_atom_id,
            label_seq_id = residue.id,
            x = atom.pos.x,
            y = atom.pos.y,
            z = atom.pos.z,
            occ = atom.occupancy,
            b = atom.b_factor,
            auth_seq_id = author.seq_num,
        )
        .map_err(|e| Error::from_io(e, None))
    }
}

fn entity_chains(structure: &Structure) -> impl Iterator<Item = (usize, &Chain)> {
    structure
        .iter_chains()
        .enumerate()
        .map(|(idx, chain)| (idx + 1, chain))
}

fn quote_string(s: &str) -> String {
    if s.is_empty() {
        return "?".to_string();
    }
    if !s.contains(char::is_whitespace) && !s.contains('\'') && !s.contains('"') {
        return s.to_string();
    }
    if s.contains('\'') && !s.contains('"') {
        return format!("\"{}\"", s);
    }
    format!("'{}'", s)
}
