use super::error::{FormatError, ParseErrorKind};
use super::traits::FormatReader;
use crate::core::models::structure::{AtomSite, StructureModel};
use nalgebra::Point3;
use std::io::BufRead;

const MIN_COORDINATE_LINE_LEN: usize = 54;

fn slice_and_trim(line: &str, start: usize, end: usize) -> &str {
    line.get(start..end.min(line.len())).unwrap_or("").trim()
}

fn parse_float(line_num: usize, value: &str, field: &str) -> Result<f64, FormatError> {
    value.parse().map_err(|_| FormatError::Parse {
        line: line_num,
        kind: ParseErrorKind::InvalidFloat {
            field: field.into(),
            value: value.into(),
        },
    })
}

/// Infers an element symbol from an atom name when columns 77-78 are blank.
fn element_from_name(name: &str) -> String {
    name.chars()
        .find(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase().to_string())
        .unwrap_or_default()
}

/// Reader for the fixed-column PDB format. Only the first model is read.
pub struct PdbFile;

impl FormatReader for PdbFile {
    type Output = StructureModel;

    fn read_from(reader: &mut impl BufRead) -> Result<StructureModel, FormatError> {
        let mut model = StructureModel::new();

        for (line_num, line_res) in reader.lines().enumerate() {
            let line = line_res?;
            let line_num = line_num + 1;

            let record_type = slice_and_trim(&line, 0, 6);
            match record_type {
                "ENDMDL" if !model.is_empty() => break,
                "ATOM" | "HETATM" => {
                    if line.len() < MIN_COORDINATE_LINE_LEN {
                        return Err(FormatError::Parse {
                            line: line_num,
                            kind: ParseErrorKind::LineTooShort,
                        });
                    }

                    let alt_loc = slice_and_trim(&line, 16, 17);
                    if !alt_loc.is_empty() && alt_loc != "A" {
                        continue;
                    }

                    let name = slice_and_trim(&line, 12, 16);
                    if name.is_empty() {
                        return Err(FormatError::Parse {
                            line: line_num,
                            kind: ParseErrorKind::MissingRequiredField {
                                field: "columns 13-16".into(),
                            },
                        });
                    }
                    let res_seq_str = slice_and_trim(&line, 22, 26);
                    let residue_number: i32 =
                        res_seq_str.parse().map_err(|_| FormatError::Parse {
                            line: line_num,
                            kind: ParseErrorKind::InvalidInt {
                                field: "columns 23-26".into(),
                                value: res_seq_str.into(),
                            },
                        })?;

                    let x = parse_float(line_num, slice_and_trim(&line, 30, 38), "columns 31-38")?;
                    let y = parse_float(line_num, slice_and_trim(&line, 38, 46), "columns 39-46")?;
                    let z = parse_float(line_num, slice_and_trim(&line, 46, 54), "columns 47-54")?;

                    let element = match slice_and_trim(&line, 76, 78) {
                        "" => element_from_name(name),
                        symbol => symbol.to_ascii_uppercase(),
                    };

                    model.push(AtomSite {
                        name: name.to_string(),
                        residue_name: slice_and_trim(&line, 17, 20).to_string(),
                        chain_id: slice_and_trim(&line, 21, 22).to_string(),
                        residue_number,
                        element,
                        hetero: record_type == "HETATM",
                        position: Point3::new(x, y, z),
                    });
                }
                _ => {}
            }
        }

        if model.is_empty() {
            return Err(FormatError::MissingRecord("ATOM/HETATM records".into()));
        }
        Ok(model)
    }
}
