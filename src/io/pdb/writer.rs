use crate::io::error::Error;
use crate::model::{atom::Atom, reference::AuthorRef, residue::Residue, structure::Structure};
use std::io::Write;

/// Writes a structure as PDB `ATOM`/`HETATM` records in author numbering.
///
/// Residues that carry an origin are written under their author number and insertion code,
/// so a canonical structure comes back out with the numbering its author used. Chain
/// identifiers must be a single character.
pub fn write_structure<W: Write>(writer: W, structure: &Structure) -> Result<(), Error> {
    let mut ctx = WriterContext::new(writer);

    ctx.write_cryst1(structure)?;
    ctx.write_atoms(structure)?;
    ctx.write_end()?;

    Ok(())
}

struct WriterContext<W> {
    writer: W,
    current_serial: usize,
}

impl<W: Write> WriterContext<W> {
    fn new(writer: W) -> Self {
        Self {
            writer,
            current_serial: 1,
        }
    }

    fn write_cryst1(&mut self, structure: &Structure) -> Result<(), Error> {
        if let Some(cell) = structure.cell {
            writeln!(
                self.writer,
                "CRYST1{:9.3}{:9.3}{:9.3}{:7.2}{:7.2}{:7.2} P 1           1",
                cell.a, cell.b, cell.c, cell.alpha, cell.beta, cell.gamma
            )
            .map_err(|e| Error::from_io(e, None))?;
        }
        Ok(())
    }

    fn write_atoms(&mut self, structure: &Structure) -> Result<(), Error> {
        for chain in structure.iter_chains() {
            let chain_char = single_char_chain(&chain.id)?;

            for residue in chain.iter_residues() {
                let author = residue.author_ref(&chain.id);
                for atom in residue.iter_atoms() {
                    let record_type = if residue.is_polymer() && !residue.is_hetatm {
                        "ATOM  "
                    } else {
                        "HETATM"
                    };
                    self.write_atom_record(record_type, atom, residue, chain_char, &author)?;
                    self.current_serial += 1;
                }
            }

            if let Some(last_polymer) = chain.iter_residues().rev().find(|r| r.is_polymer()) {
                let author = last_polymer.author_ref(&chain.id);
                self.write_ter_record(last_polymer, chain_char, &author)?;
                self.current_serial += 1;
            }
        }
        Ok(())
    }

    fn write_atom_record(
        &mut self,
        record_type: &str,
        atom: &Atom,
        residue: &Residue,
        chain_id: char,
        author: &AuthorRef,
    ) -> Result<(), Error> {
        let atom_name = if atom.name.len() >= 4 || atom.element.symbol().len() == 2 {
            format!("{:<4}", truncate(&atom.name, 4))
        } else {
            format!(" {:<3}", atom.name)
        };

        writeln!(
            self.writer,
            "{:6}{:5} {:4}{:1}{:>3} {:1}{:4}{:1}   {:8.3}{:8.3}{:8.3}{:6.2}{:6.2}          {:>2}",
            record_type,
            self.current_serial % 100000,
            atom_name,
            ' ',
            truncate(&residue.name, 3),
            chain_id,
            author.seq_num % 10000,
            author.insertion_code.unwrap_or(' '),
            atom.pos.x,
            atom.pos.y,
            atom.pos.z,
            atom.occupancy,
            atom.b_factor,
            atom.element.symbol().to_uppercase()
        )
        .map_err(|e| Error::from_io(e, None))
    }

    fn write_ter_record(
        &mut self,
        residue: &Residue,
        chain_id: char,
        author: &AuthorRef,
    ) -> Result<(), Error> {
        writeln!(
            self.writer,
            "TER   {:5}      {:>3} {:1}{:4}{:1}",
            self.current_serial % 100000,
            truncate(&residue.name, 3),
            chain_id,
            author.seq_num % 10000,
            author.insertion_code.unwrap_or(' ')
        )
        .map_err(|e| Error::from_io(e, None))
    }

    fn write_end(&mut self) -> Result<(), Error> {
        writeln!(self.writer, "END").map_err(|e| Error::from_io(e, None))
    }
}

fn single_char_chain(id: &str) -> Result<char, Error> {
    let mut chars = id.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(Error::inconsistent_data(
            "PDB",
            None,
            format!("chain identifier '{id}' does not fit the PDB chain column"),
        )),
    }
}

fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
