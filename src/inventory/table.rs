//! Position-based splitting of fixed-width command output.
//!
//! Columns are found from the character offsets of the header tokens; every
//! data row is cut at the same offsets. The layout only knows about a header
//! signature and column names, not about what the rows mean.

/// Removes every whitespace character, for padding-insensitive comparisons.
pub fn compact(line: &str) -> String {
    line.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Non-empty lines of `raw`, with trailing `\r` removed.
pub fn content_lines(raw: &str) -> Vec<&str> {
    raw.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Start offset in characters.
    pub start: usize,
}

/// Header found in a block of output: where it sits and how its columns split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHeader {
    pub line_index: usize,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, Copy)]
pub struct TableLayout<'a> {
    signature: &'a str,
}

impl<'a> TableLayout<'a> {
    /// `signature` is the header line with all whitespace removed.
    pub const fn new(signature: &'a str) -> Self {
        Self { signature }
    }

    pub fn locate(&self, lines: &[&str]) -> Option<TableHeader> {
        let line_index = lines
            .iter()
            .position(|line| compact(line) == self.signature)?;
        let columns = column_offsets(lines[line_index]);
        Some(TableHeader {
            line_index,
            columns,
        })
    }
}

impl TableHeader {
    /// Index of the first data row.
    ///
    /// Every dash-only line straight after the header is treated as an
    /// underline, whether there are zero, one or several of them.
    pub fn data_start(&self, lines: &[&str]) -> usize {
        let mut idx = self.line_index + 1;
        while idx < lines.len() && is_separator(lines[idx]) {
            idx += 1;
        }
        idx
    }

    pub fn split_row(&self, line: &str) -> Row {
        let chars: Vec<char> = line.chars().collect();
        let fields = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let end = self
                    .columns
                    .get(i + 1)
                    .map_or(chars.len(), |next| next.start.min(chars.len()));
                let start = column.start.min(end);
                let value: String = chars[start..end].iter().collect();
                (column.name.clone(), value.trim().to_string())
            })
            .collect();
        Row { fields }
    }
}

/// One data line cut into named fields, in header order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    fields: Vec<(String, String)>,
}

impl Row {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value.as_str())
    }
}

fn is_separator(line: &str) -> bool {
    let compacted = compact(line);
    !compacted.is_empty() && compacted.chars().all(|c| c == '-')
}

/// Start offset of each whitespace-separated header token.
///
/// Single left-to-right scan: a header name that also occurs inside an
/// earlier name cannot alias it the way a plain substring search would.
fn column_offsets(header: &str) -> Vec<Column> {
    let mut columns = Vec::new();
    let mut in_token = false;
    let mut token = String::new();
    let mut start = 0;

    for (pos, ch) in header.chars().enumerate() {
        if ch.is_whitespace() {
            if in_token {
                columns.push(Column {
                    name: std::mem::take(&mut token),
                    start,
                });
                in_token = false;
            }
        } else {
            if !in_token {
                start = pos;
                in_token = true;
            }
            token.push(ch);
        }
    }
    if in_token {
        columns.push(Column { name: token, start });
    }

    columns
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Name    State   Status";

    #[test]
    fn compact_strips_all_whitespace() {
        assert_eq!(compact(" Name \t State  CPUUsage(%) "), "NameStateCPUUsage(%)");
    }

    #[test]
    fn content_lines_drops_blank_and_crlf() {
        let lines = content_lines("\r\nfirst\r\n   \r\nsecond\r\n");
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[test]
    fn offsets_follow_header_positions() {
        let layout = TableLayout::new("NameStateStatus");
        let header = layout.locate(&[HEADER]).expect("header present");
        let starts: Vec<_> = header
            .columns
            .iter()
            .map(|c| (c.name.as_str(), c.start))
            .collect();
        assert_eq!(starts, vec![("Name", 0), ("State", 8), ("Status", 16)]);
    }

    #[test]
    fn last_column_runs_to_end_of_line() {
        let layout = TableLayout::new("NameStateStatus");
        let header = layout.locate(&[HEADER]).expect("header present");
        let row = header.split_row("web     Running Operating normally");
        assert_eq!(row.get("Name"), Some("web"));
        assert_eq!(row.get("State"), Some("Running"));
        assert_eq!(row.get("Status"), Some("Operating normally"));
    }

    #[test]
    fn short_rows_yield_empty_fields() {
        let layout = TableLayout::new("NameStateStatus");
        let header = layout.locate(&[HEADER]).expect("header present");
        let row = header.split_row("db");
        assert_eq!(row.get("Name"), Some("db"));
        assert_eq!(row.get("State"), Some(""));
        assert_eq!(row.get("Status"), Some(""));
    }

    #[test]
    fn non_ascii_values_do_not_split_characters() {
        let layout = TableLayout::new("NameStateStatus");
        let header = layout.locate(&[HEADER]).expect("header present");
        let row = header.split_row("Ünïcødé Off     OK");
        assert_eq!(row.get("Name"), Some("Ünïcødé"));
        assert_eq!(row.get("State"), Some("Off"));
        assert_eq!(row.get("Status"), Some("OK"));
    }

    #[test]
    fn data_start_skips_any_number_of_separators() {
        let layout = TableLayout::new("NameStateStatus");

        let none = [HEADER, "web Running OK"];
        let header = layout.locate(&none).expect("header");
        assert_eq!(header.data_start(&none), 1);

        let one = [HEADER, "----    -----   ------", "web Running OK"];
        let header = layout.locate(&one).expect("header");
        assert_eq!(header.data_start(&one), 2);

        let two = ["preamble", HEADER, "----", "- -", "web Running OK"];
        let header = layout.locate(&two).expect("header");
        assert_eq!(header.line_index, 1);
        assert_eq!(header.data_start(&two), 4);
    }

    #[test]
    fn missing_signature_is_not_located() {
        let layout = TableLayout::new("NameStateStatus");
        assert!(layout.locate(&["Name State", "web Running"]).is_none());
    }
}
