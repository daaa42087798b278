use crate::inventory::table::{compact, content_lines, Row, TableLayout};
use crate::state::{VmRecord, VmState};
use thiserror::Error;
use tracing::warn;

/// Default `Get-VM` table header with whitespace removed.
pub const HEADER_SIGNATURE: &str = "NameStateCPUUsage(%)MemoryAssigned(M)UptimeStatusVersion";

/// Leading part of the error PowerShell prints without Hyper-V admin rights.
pub const PERMISSION_SIGNATURE: &str =
    "Get-VM:Youdonothavetherequiredpermissiontocompletethistask";

const NAME: &str = "Name";
const STATE: &str = "State";
const CPU_USAGE: &str = "CPUUsage(%)";
const MEMORY_ASSIGNED: &str = "MemoryAssigned(M)";
const UPTIME: &str = "Uptime";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("the inventory command was refused for lack of permission")]
    PermissionDenied,
    #[error("no inventory header found in {} lines of output", .lines.len())]
    MalformedOutput { lines: Vec<String> },
    #[error("row {row}: cannot parse {field} from {value:?}")]
    FieldParse {
        row: usize,
        field: &'static str,
        value: String,
    },
}

/// Parses `Get-VM` output into records, dropping rows that fail to parse.
///
/// An unreadable uptime does not drop its row; the record keeps `uptime: None`.
pub fn parse(raw: &str) -> Result<Vec<VmRecord>, ParseError> {
    let rows = parse_rows(raw)?;
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        match row {
            Ok(record) => records.push(record),
            Err(err) => warn!(error = %err, "dropping inventory row"),
        }
    }
    Ok(records)
}

/// Like [`parse`], but keeps the per-row outcome.
pub fn parse_rows(raw: &str) -> Result<Vec<Result<VmRecord, ParseError>>, ParseError> {
    let lines = content_lines(raw);

    if lines
        .iter()
        .any(|line| compact(line).starts_with(PERMISSION_SIGNATURE))
    {
        return Err(ParseError::PermissionDenied);
    }

    let Some(header) = TableLayout::new(HEADER_SIGNATURE).locate(&lines) else {
        return Err(ParseError::MalformedOutput {
            lines: lines.iter().map(|l| l.to_string()).collect(),
        });
    };

    let start = header.data_start(&lines);
    let rows = lines[start..]
        .iter()
        .enumerate()
        .map(|(i, line)| record_from_row(i + 1, &header.split_row(line)))
        .collect();

    Ok(rows)
}

fn record_from_row(row_number: usize, row: &Row) -> Result<VmRecord, ParseError> {
    let field = |name: &str| row.get(name).unwrap_or_default();
    let field_error = |name: &'static str| ParseError::FieldParse {
        row: row_number,
        field: name,
        value: field(name).to_string(),
    };

    let name = field(NAME);
    if name.is_empty() {
        return Err(field_error(NAME));
    }

    let cpu_usage_percent = field(CPU_USAGE)
        .parse::<f64>()
        .map_err(|_| field_error(CPU_USAGE))?;
    let memory_assigned_mb = field(MEMORY_ASSIGNED)
        .parse::<f64>()
        .map_err(|_| field_error(MEMORY_ASSIGNED))?;
    let uptime = normalize_uptime(field(UPTIME));
    if uptime.is_none() {
        warn!(
            row = row_number,
            vm = %name,
            value = %field(UPTIME),
            "unrecognised uptime format"
        );
    }

    Ok(VmRecord {
        name: name.to_string(),
        state: VmState::from_field(field(STATE)),
        cpu_usage_percent,
        memory_assigned_mb,
        uptime,
    })
}

/// Normalizes a PowerShell `TimeSpan` rendering.
///
/// `hh:mm:ss` and `hh:mm:ss.fraction` are kept as they are, `d.hh:mm:ss`
/// becomes `"<d>d hh:mm:ss"`. Anything else (days plus a fraction included)
/// is rejected with `None`.
pub fn normalize_uptime(raw: &str) -> Option<String> {
    let parts: Vec<&str> = raw.split('.').collect();
    match parts.as_slice() {
        [_] => Some(raw.to_string()),
        [days, clock] if is_digits(days) && clock.contains(':') => {
            Some(format!("{days}d {clock}"))
        }
        [clock, fraction] if clock.contains(':') && is_digits(fraction) => Some(raw.to_string()),
        _ => None,
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}
