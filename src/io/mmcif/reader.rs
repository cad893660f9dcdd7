use crate::io::builder::{AtomRecord, LoadedStructure, StructureBuilder, parse_insertion_code};
use crate::io::context::{IoContext, NumberingScheme};
use crate::io::error::Error;
use crate::model::{
    atom::Atom,
    reference::AuthorRef,
    structure::UnitCell,
    types::{Element, Point},
};
use std::collections::HashMap;
use std::io::BufRead;
use std::str::FromStr;

#[derive(Default)]
struct AtomSiteIndices {
    group_pdb: Option<usize>,
    auth_atom_id: Option<usize>,
    label_atom_id: Option<usize>,
    auth_comp_id: Option<usize>,
    label_comp_id: Option<usize>,
    auth_asym_id: Option<usize>,
    label_asym_id: Option<usize>,
    auth_seq_id: Option<usize>,
    label_seq_id: Option<usize>,
    pdbx_pdb_ins_code: Option<usize>,
    cartn_x: Option<usize>,
    cartn_y: Option<usize>,
    cartn_z: Option<usize>,
    occupancy: Option<usize>,
    b_iso: Option<usize>,
    type_symbol: Option<usize>,
    model_num: Option<usize>,
}

enum ParserState {
    Base,
    InLoopHeader,
    InAtomSiteLoop,
    InOtherLoop,
}

/// Reads the first model of an mmCIF file, numbering residues by the context's scheme.
pub fn read<R: BufRead>(reader: R, context: &IoContext) -> Result<LoadedStructure, Error> {
    let mut builder = StructureBuilder::new();

    let mut state = ParserState::Base;
    let mut atom_indices = AtomSiteIndices::default();
    let mut current_loop_headers = Vec::new();
    let mut first_model: Option<String> = None;
    let mut in_text_field = false;
    let mut line_num = 0;

    let mut cell_params = HashMap::new();

    for line in reader.lines() {
        line_num += 1;
        let line = line.map_err(|e| Error::from_io(e, None))?;

        if line.starts_with(';') {
            in_text_field = !in_text_field;
            continue;
        }
        if in_text_field {
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let tokens = tokenize_mmcif_line(trimmed);
        if tokens.is_empty() {
            continue;
        }

        if tokens[0] == "loop_" {
            state = ParserState::InLoopHeader;
            current_loop_headers.clear();
            continue;
        }

        if tokens[0].starts_with("_cell.") {
            if tokens.len() >= 2 {
                cell_params.insert(tokens[0].clone(), tokens[1].clone());
            }
            continue;
        }

        match state {
            ParserState::Base => {}
            ParserState::InLoopHeader => {
                if tokens[0].starts_with('_') {
                    current_loop_headers.push(tokens[0].clone());
                } else if current_loop_headers
                    .iter()
                    .any(|h| h.starts_with("_atom_site."))
                {
                    state = ParserState::InAtomSiteLoop;
                    atom_indices = map_atom_site_indices(&current_loop_headers);
                    process_atom_line(
                        &tokens,
                        &atom_indices,
                        line_num,
                        context.scheme(),
                        &mut first_model,
                        &mut builder,
                    )?;
                } else {
                    state = ParserState::InOtherLoop;
                }
            }
            ParserState::InAtomSiteLoop => {
                if tokens[0].starts_with('_') || tokens[0].starts_with("data_") {
                    state = ParserState::Base;
                } else {
                    process_atom_line(
                        &tokens,
                        &atom_indices,
                        line_num,
                        context.scheme(),
                        &mut first_model,
                        &mut builder,
                    )?;
                }
            }
            ParserState::InOtherLoop => {
                if tokens[0].starts_with('_') {
                    state = ParserState::Base;
                }
            }
        }
    }

    if let Some(cell) = process_cell_parameters(&cell_params) {
        builder.set_cell(cell);
    }

    Ok(builder.finish(context))
}

fn tokenize_mmcif_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quote = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match in_quote {
            Some(q) => {
                // A quote only closes a token when followed by whitespace or end of line.
                if c == q && chars.peek().is_none_or(|next| next.is_whitespace()) {
                    in_quote = None;
                    tokens.push(std::mem::take(&mut current));
                } else {
                    current.push(c);
                }
            }
            None => {
                if c.is_whitespace() {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                } else if (c == '\'' || c == '"') && current.is_empty() {
                    in_quote = Some(c);
                } else {
                    current.push(c);
                }
            }
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn map_atom_site_indices(headers: &[String]) -> AtomSiteIndices {
    let mut indices = AtomSiteIndices::default();
    for (i, header) in headers.iter().enumerate() {
        match header.as_str() {
            "_atom_site.group_PDB" => indices.group_pdb = Some(i),
            "_atom_site.auth_atom_id" => indices.auth_atom_id = Some(i),
            "_atom_site.label_atom_id" => indices.label_atom_id = Some(i),
            "_atom_site.auth_comp_id" => indices.auth_comp_id = Some(i),
            "_atom_site.label_comp_id" => indices.label_comp_id = Some(i),
            "_atom_site.auth_asym_id" => indices.auth_asym_id = Some(i),
            "_atom_site.label_asym_id" => indices.label_asym_id = Some(i),
            "_atom_site.auth_seq_id" => indices.auth_seq_id = Some(i),
            "_atom_site.label_seq_id" => indices.label_seq_id = Some(i),
            "_atom_site.pdbx_PDB_ins_code" => indices.pdbx_pdb_ins_code = Some(i),
            "_atom_site.Cartn_x" => indices.cartn_x = Some(i),
            "_atom_site.Cartn_y" => indices.cartn_y = Some(i),
            "_atom_site.Cartn_z" => indices.cartn_z = Some(i),
            "_atom_site.occupancy" => indices.occupancy = Some(i),
            "_atom_site.B_iso_or_equiv" => indices.b_iso = Some(i),
            "_atom_site.type_symbol" => indices.type_symbol = Some(i),
            "_atom_site.pdbx_PDB_model_num" => indices.model_num = Some(i),
            _ => {}
        }
    }
    indices
}

fn token<'a>(tokens: &'a [String], idx: usize, line_num: usize) -> Result<&'a str, Error> {
    tokens.get(idx).map(|s| s.as_str()).ok_or_else(|| {
        Error::parse(
            "mmCIF",
            None,
            line_num,
            "Atom record shorter than _atom_site definition",
        )
    })
}

fn optional_token<'a>(
    tokens: &'a [String],
    idx: Option<usize>,
    line_num: usize,
) -> Result<Option<&'a str>, Error> {
    match idx {
        Some(idx) => token(tokens, idx, line_num)
            .map(|value| Some(value).filter(|v| !is_missing(v))),
        None => Ok(None),
    }
}

fn is_missing(value: &str) -> bool {
    matches!(value, "." | "?")
}

fn required_column(idx: Option<usize>, what: &str, line_num: usize) -> Result<usize, Error> {
    idx.ok_or_else(|| {
        Error::parse(
            "mmCIF",
            None,
            line_num,
            format!("_atom_site loop is missing {what} columns"),
        )
    })
}

fn parse_coordinate(value: &str, axis: &str, line_num: usize) -> Result<f64, Error> {
    f64::from_str(value).map_err(|_| {
        Error::parse(
            "mmCIF",
            None,
            line_num,
            format!("Invalid {axis} coordinate"),
        )
    })
}

fn parse_seq_id(value: &str, line_num: usize) -> Result<i32, Error> {
    value.parse::<i32>().map_err(|_| {
        Error::parse(
            "mmCIF",
            None,
            line_num,
            format!("Invalid residue sequence number '{value}'"),
        )
    })
}

fn process_atom_line(
    tokens: &[String],
    indices: &AtomSiteIndices,
    line_num: usize,
    scheme: NumberingScheme,
    first_model: &mut Option<String>,
    builder: &mut StructureBuilder,
) -> Result<(), Error> {
    if let Some(model) = optional_token(tokens, indices.model_num, line_num)? {
        match first_model {
            Some(first) if first != model => return Ok(()),
            Some(_) => {}
            None => *first_model = Some(model.to_string()),
        }
    }

    let atom_name_idx = required_column(
        indices.auth_atom_id.or(indices.label_atom_id),
        "atom identifier",
        line_num,
    )?;
    let res_name_idx = required_column(
        indices.auth_comp_id.or(indices.label_comp_id),
        "residue identifier",
        line_num,
    )?;
    let x_idx = required_column(indices.cartn_x, "Cartn_x", line_num)?;
    let y_idx = required_column(indices.cartn_y, "Cartn_y", line_num)?;
    let z_idx = required_column(indices.cartn_z, "Cartn_z", line_num)?;

    let author_chain_idx = indices.auth_asym_id.or(indices.label_asym_id);
    let author_seq_idx = indices.auth_seq_id.or(indices.label_seq_id);

    let author_chain = optional_token(tokens, author_chain_idx, line_num)?;
    let author_seq = optional_token(tokens, author_seq_idx, line_num)?;
    let ins_code = optional_token(tokens, indices.pdbx_pdb_ins_code, line_num)?
        .and_then(parse_insertion_code);

    let (chain, seq_num, insertion_code, origin) = match scheme {
        NumberingScheme::Author => {
            let chain = required_value(author_chain, "chain identifier", line_num)?;
            let seq = required_value(author_seq, "residue sequence", line_num)?;
            (chain.to_string(), parse_seq_id(seq, line_num)?, ins_code, None)
        }
        NumberingScheme::Label => {
            let chain = optional_token(tokens, indices.label_asym_id, line_num)?
                .or(author_chain);
            let chain = required_value(chain, "chain identifier", line_num)?;
            let author_seq = author_seq.map(|s| parse_seq_id(s, line_num)).transpose()?;
            let label_seq = optional_token(tokens, indices.label_seq_id, line_num)?
                .map(|s| parse_seq_id(s, line_num))
                .transpose()?;
            let seq = required_value(label_seq.or(author_seq), "residue sequence", line_num)?;
            let origin = match (author_chain, author_seq) {
                (Some(c), Some(s)) if indices.auth_asym_id.is_some() => {
                    Some(AuthorRef::new(c, s, ins_code))
                }
                _ => None,
            };
            (chain.to_string(), seq, None, origin)
        }
    };

    let group_pdb = optional_token(tokens, indices.group_pdb, line_num)?;
    let is_hetatm = matches!(group_pdb, Some(val) if val.eq_ignore_ascii_case("HETATM"));

    let atom_name = token(tokens, atom_name_idx, line_num)?;
    let res_name = token(tokens, res_name_idx, line_num)?;

    let x_str = token(tokens, x_idx, line_num)?;
    let y_str = token(tokens, y_idx, line_num)?;
    let z_str = token(tokens, z_idx, line_num)?;

    if is_missing(x_str) || is_missing(y_str) || is_missing(z_str) {
        return Ok(());
    }

    let pos = Point::new(
        parse_coordinate(x_str, "X", line_num)?,
        parse_coordinate(y_str, "Y", line_num)?,
        parse_coordinate(z_str, "Z", line_num)?,
    );

    let occupancy = optional_token(tokens, indices.occupancy, line_num)?
        .and_then(|occ| f64::from_str(occ).ok())
        .unwrap_or(1.0);
    let b_factor = optional_token(tokens, indices.b_iso, line_num)?
        .and_then(|b| f64::from_str(b).ok())
        .unwrap_or(0.0);

    let element = optional_token(tokens, indices.type_symbol, line_num)?
        .and_then(|elem| Element::from_str(elem).ok())
        .unwrap_or(Element::Unknown);

    builder.push(
        AtomRecord {
            chain,
            seq_num,
            insertion_code,
            res_name: res_name.to_string(),
            is_hetatm,
            origin,
            atom: Atom::new(atom_name, element, pos).with_crystallographic(occupancy, b_factor),
        },
        line_num,
    );

    Ok(())
}

fn required_value<T>(value: Option<T>, what: &str, line_num: usize) -> Result<T, Error> {
    value.ok_or_else(|| {
        Error::parse(
            "mmCIF",
            None,
            line_num,
            format!("Atom record has no {what}"),
        )
    })
}

fn process_cell_parameters(params: &HashMap<String, String>) -> Option<UnitCell> {
    let get_f64 = |key: &str, def: f64| -> f64 {
        params
            .get(key)
            .and_then(|s| f64::from_str(s).ok())
            .unwrap_or(def)
    };

    let cell = UnitCell {
        a: get_f64("_cell.length_a", 0.0),
        b: get_f64("_cell.length_b", 0.0),
        c: get_f64("_cell.length_c", 0.0),
        alpha: get_f64("_cell.angle_alpha", 90.0),
        beta: get_f64("_cell.angle_beta", 90.0),
        gamma: get_f64("_cell.angle_gamma", 90.0),
    };

    (cell.a > 0.0 && cell.b > 0.0 && cell.c > 0.0).then_some(cell)
}
