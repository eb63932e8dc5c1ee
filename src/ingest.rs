use std::collections::HashMap;
use std::path::Path;

/// One data record from an upload file. Values are kept as raw strings;
/// schema checks belong to the mark validator, not the reader.
#[derive(Debug, Clone)]
pub struct RawRow {
    values: HashMap<String, String>,
}

impl RawRow {
    /// Returns the trimmed value for a column, or None when the column is
    /// absent or blank.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(|s| s.as_str())
    }
}

#[derive(Debug)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Reads a delimited upload file: first non-empty line is the header row,
/// every following non-empty line is one record. Values may be wrapped in
/// double quotes (spreadsheet CSV export does this for text cells).
///
/// Blank lines are dropped, matching how spreadsheet-to-JSON conversion
/// compacts empty rows before the portal ever sees them. Error messages
/// downstream use the record's position in `rows` plus the header offset.
pub fn parse_table_file(path: &Path) -> anyhow::Result<ParsedTable> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);

    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    let Some(header_line) = lines.next() else {
        anyhow::bail!("upload file is empty");
    };
    let headers: Vec<String> = header_line
        .split(',')
        .map(|c| strip_quotes(c).to_ascii_lowercase())
        .collect();
    if headers.iter().all(|c| c.is_empty()) {
        anyhow::bail!("upload file has an empty header row");
    }

    let mut rows: Vec<RawRow> = Vec::new();
    for line in lines {
        let mut values = HashMap::new();
        for (i, cell) in line.split(',').map(strip_quotes).enumerate() {
            let Some(name) = headers.get(i) else {
                break;
            };
            if name.is_empty() || cell.is_empty() {
                continue;
            }
            values.insert(name.clone(), cell);
        }
        rows.push(RawRow { values });
    }

    Ok(ParsedTable { headers, rows })
}

fn strip_quotes(s: &str) -> String {
    let mut out = s.trim().to_string();
    if out.starts_with('"') && out.ends_with('"') && out.len() >= 2 {
        out = out[1..out.len() - 1].to_string();
    }
    out.trim().to_string()
}
