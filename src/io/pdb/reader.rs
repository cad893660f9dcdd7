use crate::io::builder::{AtomRecord, LoadedStructure, StructureBuilder, parse_insertion_code};
use crate::io::context::IoContext;
use crate::io::error::Error;
use crate::model::{
    atom::Atom,
    structure::UnitCell,
    types::{Element, Point},
};
use std::io::BufRead;
use std::str::FromStr;

/// Reads the first model of a PDB file.
///
/// Residues keep file order and chains keep first-appearance order. Records after the first
/// `ENDMDL` are ignored.
pub fn read<R: BufRead>(reader: R, context: &IoContext) -> Result<LoadedStructure, Error> {
    let mut builder = StructureBuilder::new();
    let mut line_num = 0;

    for line in reader.lines() {
        line_num += 1;
        let line = line.map_err(|e| Error::from_io(e, None))?;

        if line.starts_with("ENDMDL") {
            break;
        }

        if line.starts_with("CRYST1") {
            builder.set_cell(parse_cryst1(&line, line_num)?);
            continue;
        }

        let is_atom = line.starts_with("ATOM  ");
        let is_hetatm = line.starts_with("HETATM");

        if is_atom || is_hetatm {
            let record = parse_atom_record(&line, line_num, is_hetatm)?;
            builder.push(record, line_num);
        }
    }

    Ok(builder.finish(context))
}

fn column(line: &str, start: usize, end: usize) -> &str {
    let end = end.min(line.len());
    line.get(start..end).unwrap_or("")
}

fn parse_atom_record(line: &str, line_num: usize, is_hetatm: bool) -> Result<AtomRecord, Error> {
    if line.len() < 54 || !line.is_ascii() {
        return Err(Error::parse("PDB", None, line_num, "Atom record too short"));
    }

    let atom_field = column(line, 12, 16);
    let atom_name = atom_field.trim();
    let res_name = column(line, 17, 20).trim();
    let chain_id = column(line, 21, 22).trim();
    let res_seq_str = column(line, 22, 26);
    let i_code_str = column(line, 26, 27);

    if res_name.is_empty() {
        return Err(Error::parse("PDB", None, line_num, "Missing residue name"));
    }

    let res_seq = res_seq_str
        .trim()
        .parse::<i32>()
        .map_err(|_| Error::parse("PDB", None, line_num, "Invalid residue sequence number"))?;

    let x = parse_coordinate(column(line, 30, 38), "X", line_num)?;
    let y = parse_coordinate(column(line, 38, 46), "Y", line_num)?;
    let z = parse_coordinate(column(line, 46, 54), "Z", line_num)?;

    let occupancy = column(line, 54, 60).trim().parse::<f64>().unwrap_or(1.0);
    let b_factor = column(line, 60, 66).trim().parse::<f64>().unwrap_or(0.0);

    let element_str = column(line, 76, 78).trim();
    let element = if element_str.is_empty() {
        parse_element_from_name(atom_field)
    } else {
        Element::from_str(element_str).unwrap_or(Element::Unknown)
    };

    Ok(AtomRecord {
        chain: chain_id.to_string(),
        seq_num: res_seq,
        insertion_code: parse_insertion_code(i_code_str),
        res_name: res_name.to_string(),
        is_hetatm,
        origin: None,
        atom: Atom::new(atom_name, element, Point::new(x, y, z))
            .with_crystallographic(occupancy, b_factor),
    })
}

fn parse_coordinate(value: &str, axis: &str, line_num: usize) -> Result<f64, Error> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| Error::parse("PDB", None, line_num, format!("Invalid {axis} coordinate")))
}

fn parse_cryst1(line: &str, line_num: usize) -> Result<UnitCell, Error> {
    if line.len() < 54 {
        return Err(Error::parse("PDB", None, line_num, "CRYST1 record too short"));
    }

    let length = |start, end| column(line, start, end).trim().parse::<f64>().unwrap_or(0.0);
    let angle = |start, end| {
        column(line, start, end)
            .trim()
            .parse::<f64>()
            .unwrap_or(90.0)
    };

    let cell = UnitCell {
        a: length(6, 15),
        b: length(15, 24),
        c: length(24, 33),
        alpha: angle(33, 40),
        beta: angle(40, 47),
        gamma: angle(47, 54),
    };

    if cell.a <= 0.0 || cell.b <= 0.0 || cell.c <= 0.0 {
        return Err(Error::inconsistent_data(
            "PDB",
            None,
            "Invalid unit cell dimensions",
        ));
    }

    Ok(cell)
}

/// Infers the element from the raw four-character atom-name field.
///
/// Single-letter elements are right-aligned in column 13; a leading letter in column 12 marks
/// a two-letter symbol such as `FE` or `CL`.
fn parse_element_from_name(field: &str) -> Element {
    let letters: String = field
        .chars()
        .take(2)
        .filter(|c| c.is_ascii_alphabetic())
        .collect();
    let leading_blank = field.starts_with(|c: char| c == ' ' || c.is_ascii_digit());

    if !leading_blank && letters.len() == 2 {
        if let Ok(el) = Element::from_str(&letters) {
            return el;
        }
    }
    letters
        .get(letters.len().saturating_sub(1)..)
        .filter(|_| leading_blank)
        .or_else(|| letters.get(0..1))
        .and_then(|symbol| Element::from_str(symbol).ok())
        .unwrap_or(Element::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::builder::LoadWarning;
    use crate::model::types::{ResidueCategory, StandardResidue};
    use std::io::Cursor;

    fn atom_line(
        record: &str,
        serial: usize,
        name: &str,
        res_name: &str,
        chain: char,
        seq: i32,
        icode: char,
        occupancy: f64,
        element: &str,
    ) -> String {
        format!(
            "{record:<6}{serial:>5} {name:<4} {res_name:>3} {chain}{seq:>4}{icode}   {x:>8.3}{y:>8.3}{z:>8.3}{occupancy:>6.2}{b:>6.2}          {element:>2}",
            x = 1.0,
            y = 2.0,
            z = 3.0,
            b = 10.0,
        )
    }

    fn read_str(text: &str) -> LoadedStructure {
        read(Cursor::new(text), &IoContext::new_default()).unwrap()
    }

    #[test]
    fn read_supports_residues_with_insertion_codes() {
        let text = [
            atom_line("ATOM", 1, "CA", "SER", 'L', 52, ' ', 1.0, "C"),
            atom_line("ATOM", 2, "CA", "GLY", 'L', 52, 'A', 1.0, "C"),
            atom_line("ATOM", 3, "CA", "TYR", 'L', 53, ' ', 1.0, "C"),
        ]
        .join("\n");

        let loaded = read_str(&text);
        let chain = loaded.structure.chain("L").unwrap();
        let tokens: Vec<_> = chain
            .iter_residues()
            .map(|r| r.author_ref("L").token())
            .collect();
        assert_eq!(tokens, vec!["L:52", "L:52A", "L:53"]);
        assert_eq!(chain.sequence(), "SGY");
    }

    #[test]
    fn read_parses_coordinates_occupancy_and_b_factor() {
        let text = atom_line("ATOM", 1, "N", "ALA", 'A', 1, ' ', 0.5, "N");

        let loaded = read_str(&text);
        let residue = loaded.structure.find_residue("A", 1, None).unwrap();
        let atom = residue.atom("N").unwrap();
        assert_eq!(atom.element, Element::N);
        assert_eq!(atom.pos, Point::new(1.0, 2.0, 3.0));
        assert_eq!(atom.occupancy, 0.5);
        assert_eq!(atom.b_factor, 10.0);
    }

    #[test]
    fn read_classifies_hetero_residues() {
        let text = [
            atom_line("ATOM", 1, "CA", "ALA", 'A', 1, ' ', 1.0, "C"),
            atom_line("HETATM", 2, "ZN", "ZN", 'A', 101, ' ', 1.0, "ZN"),
            atom_line("HETATM", 3, "O", "HOH", 'A', 201, ' ', 1.0, "O"),
        ]
        .join("\n");

        let loaded = read_str(&text);
        let chain = loaded.structure.chain("A").unwrap();
        let categories: Vec<_> = chain.iter_residues().map(|r| r.category).collect();
        assert_eq!(
            categories,
            vec![
                ResidueCategory::Protein,
                ResidueCategory::Hetero,
                ResidueCategory::Hetero
            ]
        );
        assert!(chain.residue(101, None).unwrap().is_hetatm);
        assert_eq!(
            chain.residue(201, None).unwrap().standard_name,
            Some(StandardResidue::HOH)
        );
    }

    #[test]
    fn read_falls_back_to_atom_name_for_element() {
        let text = [
            atom_line("ATOM", 1, " OG1", "THR", 'A', 1, ' ', 1.0, ""),
            atom_line("HETATM", 2, "FE  ", "HEM", 'A', 2, ' ', 1.0, ""),
        ]
        .join("\n");

        let loaded = read_str(&text);
        let residue = loaded.structure.find_residue("A", 1, None).unwrap();
        assert_eq!(residue.atom("OG1").unwrap().element, Element::O);
        let heme = loaded.structure.find_residue("A", 2, None).unwrap();
        assert_eq!(heme.atom("FE").unwrap().element, Element::Fe);
    }

    #[test]
    fn read_stops_after_first_model() {
        let text = [
            "MODEL        1".to_string(),
            atom_line("ATOM", 1, "CA", "ALA", 'A', 1, ' ', 1.0, "C"),
            "ENDMDL".to_string(),
            "MODEL        2".to_string(),
            atom_line("ATOM", 1, "CA", "ALA", 'A', 1, ' ', 1.0, "C"),
            atom_line("ATOM", 2, "CA", "GLY", 'A', 2, ' ', 1.0, "C"),
            "ENDMDL".to_string(),
        ]
        .join("\n");

        let loaded = read_str(&text);
        assert_eq!(loaded.structure.residue_count(), 1);
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn read_reports_duplicate_positions() {
        let text = [
            atom_line("ATOM", 1, "CA", "ALA", 'A', 1, ' ', 1.0, "C"),
            atom_line("ATOM", 2, "CA", "GLY", 'A', 2, ' ', 1.0, "C"),
            atom_line("ATOM", 3, "CA", "SER", 'A', 1, ' ', 1.0, "C"),
        ]
        .join("\n");

        let loaded = read_str(&text);
        assert_eq!(loaded.structure.residue_count(), 2);
        assert!(matches!(
            loaded.warnings.as_slice(),
            [LoadWarning::DuplicateResidue { seq_num: 1, line: 3, .. }]
        ));
    }

    #[test]
    fn read_parses_cryst1_cell() {
        let text = format!(
            "CRYST1   50.000   60.000   70.000  90.00 100.00  90.00 P 1           1\n{}",
            atom_line("ATOM", 1, "CA", "ALA", 'A', 1, ' ', 1.0, "C")
        );

        let loaded = read_str(&text);
        let cell = loaded.structure.cell.unwrap();
        assert_eq!((cell.a, cell.b, cell.c), (50.0, 60.0, 70.0));
        assert_eq!(cell.beta, 100.0);
    }

    #[test]
    fn read_rejects_bad_coordinates() {
        let mut text = atom_line("ATOM", 1, "CA", "ALA", 'A', 1, ' ', 1.0, "C");
        text.replace_range(30..38, "   abc  ");

        let err = read(Cursor::new(text), &IoContext::new_default()).unwrap_err();
        assert!(matches!(err, Error::Parse { line_number: 1, .. }));
    }
}
