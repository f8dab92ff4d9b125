use super::error::{FormatError, ParseErrorKind};
use super::traits::FormatReader;
use crate::core::models::structure::{AtomSite, StructureModel};
use nalgebra::Point3;
use std::collections::HashMap;
use std::io::BufRead;

const ATOM_SITE_PREFIX: &str = "_atom_site.";

/// Splits one mmCIF line into tokens, honoring single and double quotes.
///
/// A quote only closes a value when followed by whitespace or the end of line,
/// so `'O5''` style names survive.
fn tokenize(line: &str, line_num: usize) -> Result<Vec<String>, FormatError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            break;
        }
        if c == '\'' || c == '"' {
            let quote = c;
            let start = i + 1;
            let mut end = None;
            let mut j = start;
            while j < chars.len() {
                if chars[j] == quote && chars.get(j + 1).is_none_or(|n| n.is_whitespace()) {
                    end = Some(j);
                    break;
                }
                j += 1;
            }
            let end = end.ok_or(FormatError::Parse {
                line: line_num,
                kind: ParseErrorKind::UnterminatedQuote,
            })?;
            tokens.push(chars[start..end].iter().collect());
            i = end + 1;
        } else {
            let start = i;
            while i < chars.len() && !chars[i].is_whitespace() {
                i += 1;
            }
            tokens.push(chars[start..i].iter().collect());
        }
    }
    Ok(tokens)
}

fn is_missing(value: &str) -> bool {
    value == "." || value == "?"
}

struct AtomSiteColumns {
    index: HashMap<String, usize>,
}

impl AtomSiteColumns {
    fn first_of(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| self.index.get(*name).copied())
    }

    fn required(&self, name: &str) -> Result<usize, FormatError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| FormatError::MissingRecord(format!("{}{}", ATOM_SITE_PREFIX, name)))
    }
}

/// Resolved column positions used to build atoms from `_atom_site` rows.
struct RowLayout {
    group: Option<usize>,
    atom_name: usize,
    residue_name: Option<usize>,
    chain: Option<usize>,
    seq: Vec<usize>,
    element: Option<usize>,
    alt: Option<usize>,
    model_num: Option<usize>,
    x: usize,
    y: usize,
    z: usize,
}

impl RowLayout {
    fn from_columns(columns: &AtomSiteColumns) -> Result<Self, FormatError> {
        let atom_name = columns
            .first_of(&["auth_atom_id", "label_atom_id"])
            .ok_or_else(|| FormatError::MissingRecord("_atom_site.label_atom_id".into()))?;
        let seq = ["auth_seq_id", "label_seq_id"]
            .iter()
            .filter_map(|name| columns.index.get(*name).copied())
            .collect();
        Ok(Self {
            group: columns.first_of(&["group_PDB"]),
            atom_name,
            residue_name: columns.first_of(&["auth_comp_id", "label_comp_id"]),
            chain: columns.first_of(&["auth_asym_id", "label_asym_id"]),
            seq,
            element: columns.first_of(&["type_symbol"]),
            alt: columns.first_of(&["label_alt_id"]),
            model_num: columns.first_of(&["pdbx_PDB_model_num"]),
            x: columns.required("Cartn_x")?,
            y: columns.required("Cartn_y")?,
            z: columns.required("Cartn_z")?,
        })
    }

    fn value<'a>(row: &'a [String], column: Option<usize>) -> Option<&'a str> {
        column
            .and_then(|c| row.get(c))
            .map(String::as_str)
            .filter(|v| !is_missing(v))
    }

    fn coordinate(&self, row: &[String], column: usize, line_num: usize, name: &str) -> Result<f64, FormatError> {
        let value = row[column].as_str();
        value.parse().map_err(|_| FormatError::Parse {
            line: line_num,
            kind: ParseErrorKind::InvalidFloat {
                field: format!("{}{}", ATOM_SITE_PREFIX, name),
                value: value.into(),
            },
        })
    }

    fn build(&self, row: &[String], line_num: usize) -> Result<Option<AtomSite>, FormatError> {
        if let Some(alt) = Self::value(row, self.alt) {
            if alt != "A" {
                return Ok(None);
            }
        }

        let name = Self::value(row, Some(self.atom_name)).ok_or_else(|| FormatError::Parse {
            line: line_num,
            kind: ParseErrorKind::MissingRequiredField {
                field: "_atom_site.atom_id".into(),
            },
        })?;
        let residue_number = self
            .seq
            .iter()
            .find_map(|&c| Self::value(row, Some(c)).and_then(|v| v.parse::<i32>().ok()))
            .unwrap_or(0);
        let element = Self::value(row, self.element)
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| name.chars().take(1).collect::<String>().to_ascii_uppercase());

        Ok(Some(AtomSite {
            name: name.to_string(),
            residue_name: Self::value(row, self.residue_name).unwrap_or("").to_string(),
            chain_id: Self::value(row, self.chain).unwrap_or("").to_string(),
            residue_number,
            element,
            hetero: Self::value(row, self.group) == Some("HETATM"),
            position: Point3::new(
                self.coordinate(row, self.x, line_num, "Cartn_x")?,
                self.coordinate(row, self.y, line_num, "Cartn_y")?,
                self.coordinate(row, self.z, line_num, "Cartn_z")?,
            ),
        }))
    }
}

#[derive(PartialEq)]
enum ScanState {
    Outside,
    LoopHeader,
    AtomSiteHeader,
    AtomSiteRows,
}

/// Reader for the `_atom_site` category of PDBx/mmCIF files. Only the first
/// model is read.
pub struct MmcifFile;

impl FormatReader for MmcifFile {
    type Output = StructureModel;

    fn read_from(reader: &mut impl BufRead) -> Result<StructureModel, FormatError> {
        let mut state = ScanState::Outside;
        let mut columns = AtomSiteColumns {
            index: HashMap::new(),
        };
        let mut layout: Option<RowLayout> = None;
        let mut pending: Vec<String> = Vec::new();
        let mut first_model: Option<String> = None;
        let mut model = StructureModel::new();

        for (line_num, line_res) in reader.lines().enumerate() {
            let line = line_res?;
            let line_num = line_num + 1;
            let trimmed = line.trim();

            if trimmed.is_empty() {
                continue;
            }

            if state == ScanState::AtomSiteRows
                && (trimmed.starts_with('_')
                    || trimmed.starts_with("loop_")
                    || trimmed.starts_with("data_")
                    || trimmed.starts_with('#'))
            {
                break;
            }

            match state {
                ScanState::Outside => {
                    if trimmed == "loop_" {
                        state = ScanState::LoopHeader;
                    }
                }
                ScanState::LoopHeader => {
                    if let Some(column) = trimmed.strip_prefix(ATOM_SITE_PREFIX) {
                        columns.index.insert(column.trim().to_string(), 0);
                        state = ScanState::AtomSiteHeader;
                    } else if trimmed != "loop_" {
                        state = ScanState::Outside;
                    }
                }
                ScanState::AtomSiteHeader => {
                    if let Some(column) = trimmed.strip_prefix(ATOM_SITE_PREFIX) {
                        let position = columns.index.len();
                        columns.index.insert(column.trim().to_string(), position);
                        continue;
                    }
                    layout = Some(RowLayout::from_columns(&columns)?);
                    state = ScanState::AtomSiteRows;
                }
                ScanState::AtomSiteRows => {}
            }

            if state != ScanState::AtomSiteRows {
                continue;
            }
            let Some(layout) = layout.as_ref() else {
                continue;
            };

            pending.extend(tokenize(trimmed, line_num)?);
            let width = columns.index.len();
            while pending.len() >= width {
                let row: Vec<String> = pending.drain(..width).collect();

                if let Some(model_num) = RowLayout::value(&row, layout.model_num) {
                    match &first_model {
                        None => first_model = Some(model_num.to_string()),
                        Some(first) if first != model_num => {
                            pending.clear();
                            break;
                        }
                        Some(_) => {}
                    }
                }
                if let Some(atom) = layout.build(&row, line_num)? {
                    model.push(atom);
                }
            }
        }

        if model.is_empty() {
            return Err(FormatError::MissingRecord("_atom_site loop".into()));
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &str = "data_TEST
#
loop_
_entity.id
_entity.type
1 polymer
#
loop_
_atom_site.group_PDB
_atom_site.id
_atom_site.type_symbol
_atom_site.label_atom_id
_atom_site.label_alt_id
_atom_site.label_comp_id
_atom_site.label_asym_id
_atom_site.label_seq_id
_atom_site.Cartn_x
_atom_site.Cartn_y
_atom_site.Cartn_z
_atom_site.auth_seq_id
_atom_site.auth_asym_id
_atom_site.pdbx_PDB_model_num
ATOM   1 N N   . ALA A 1 1.000 2.000 3.000 10 X 1
ATOM   2 C CA  . ALA A 1 2.500 2.000 3.000 10 X 1
ATOM   3 C CA  B ALA A 1 2.700 2.000 3.000 10 X 1
HETATM 4 O \"O5'\" . HOH B . -1.0 0.0 0.5 201 Y 1
ATOM   5 C CA  . ALA A 1 9.0 9.0 9.0 10 X 2
#
";

    fn read(text: &str) -> Result<StructureModel, FormatError> {
        MmcifFile::read_from(&mut Cursor::new(text.as_bytes()))
    }

    #[test]
    fn reads_atom_site_loop_preferring_author_fields() {
        let model = read(SAMPLE).unwrap();
        assert_eq!(model.len(), 3);

        let ca = &model.atoms()[1];
        assert_eq!(ca.name, "CA");
        assert_eq!(ca.chain_id, "X");
        assert_eq!(ca.residue_number, 10);
        assert_eq!(ca.position, Point3::new(2.5, 2.0, 3.0));

        let water = &model.atoms()[2];
        assert!(water.hetero);
        assert_eq!(water.name, "O5'");
        assert_eq!(water.residue_number, 201);
        assert_eq!(water.element, "O");
    }

    #[test]
    fn tokenize_keeps_embedded_quotes() {
        let tokens = tokenize("ATOM 'O5'' \"a b\" plain", 1).unwrap();
        assert_eq!(tokens, vec!["ATOM", "O5'", "a b", "plain"]);
    }

    #[test]
    fn tokenize_reports_unterminated_quote() {
        assert!(matches!(
            tokenize("ATOM 'open", 7),
            Err(FormatError::Parse {
                line: 7,
                kind: ParseErrorKind::UnterminatedQuote
            })
        ));
    }

    #[test]
    fn rows_may_span_multiple_lines() {
        let text = "data_X
loop_
_atom_site.group_PDB
_atom_site.label_atom_id
_atom_site.label_asym_id
_atom_site.label_seq_id
_atom_site.Cartn_x
_atom_site.Cartn_y
_atom_site.Cartn_z
ATOM CA A
1 1.0 2.0 3.0 ATOM CA A 2
4.0 5.0 6.0
";
        let model = read(text).unwrap();
        assert_eq!(model.len(), 2);
        assert_eq!(model.atoms()[1].residue_number, 2);
        assert_eq!(model.atoms()[1].position, Point3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn missing_coordinates_column_is_reported() {
        let text = "data_X
loop_
_atom_site.label_atom_id
_atom_site.Cartn_x
CA 1.0
";
        assert!(matches!(read(text), Err(FormatError::MissingRecord(_))));
    }

    #[test]
    fn file_without_atom_site_is_rejected() {
        assert!(matches!(
            read("data_X\n_cell.length_a 10.0\n"),
            Err(FormatError::MissingRecord(_))
        ));
    }
}
