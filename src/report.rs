use crate::collectors::sensors::{
    core_key, AVAILABLE_MEMORY, CPU_PACKAGE_TEMP, CPU_TOTAL_LOAD, GPU_CORE_CLOCK, GPU_CORE_LOAD,
    GPU_CORE_TEMP, GPU_MEMORY_LOAD, USED_MEMORY,
};
use crate::scheduler::RefreshableSource;
use crate::state::{
    DiskRecord, HostRecord, SensorSnapshot, SnapshotStore, SourceError, VmRecord, VmState,
};
use crossterm::style::{Color, Stylize};
use std::fmt::Write as _;

const NARROW: usize = 12;
const MEDIUM: usize = 16;
const WIDE: usize = 32;
const MISSING: &str = "--";

/// One section's worth of data: the last value (if any) and why it may be stale.
#[derive(Debug)]
pub struct Section<'a, T: ?Sized> {
    pub value: Option<&'a T>,
    pub error: Option<&'a SourceError>,
}

impl<'a, T> Section<'a, [T]> {
    fn from_list(source: &'a RefreshableSource<Vec<T>>) -> Self {
        Self {
            value: source.get().map(Vec::as_slice),
            error: source.last_error(),
        }
    }
}

/// Everything the report is rendered from.
#[derive(Debug)]
pub struct Report<'a> {
    pub sensors: Section<'a, SensorSnapshot>,
    pub disks: Section<'a, [DiskRecord]>,
    pub hosts: Section<'a, [HostRecord]>,
    pub vms: Section<'a, [VmRecord]>,
}

impl<'a> Report<'a> {
    pub fn from_store(store: &'a SnapshotStore) -> Self {
        Self {
            sensors: Section {
                value: store.sensors.get(),
                error: store.sensors.last_error(),
            },
            disks: Section::from_list(&store.disks),
            hosts: Section::from_list(&store.hosts),
            vms: Section::from_list(&store.vms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub title: String,
    pub show_cores: bool,
    pub color: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            title: concat!("tailwind ", env!("CARGO_PKG_VERSION")).to_string(),
            show_cores: true,
            color: false,
        }
    }
}

/// Renders the full report. Pure: the same input always gives the same text.
pub fn render(report: &Report<'_>, opts: &RenderOptions) -> String {
    let mut out = Table::new(opts.color);
    out.line(&opts.title);

    if let Some(sensors) = report.sensors.value {
        out.section("CPU", report.sensors.error);
        render_cpu(&mut out, sensors, opts.show_cores);

        if sensors.keys().any(|k| k.starts_with("GPU ")) {
            out.section("GPU", None);
            render_gpu(&mut out, sensors);
        }

        out.section("MEM", None);
        render_memory(&mut out, sensors);
    }

    if let Some(disks) = report.disks.value {
        out.section("STORAGE", report.disks.error);
        render_storage(&mut out, disks);
    }

    if let Some(hosts) = report.hosts.value {
        out.section("HOSTS", report.hosts.error);
        render_hosts(&mut out, hosts);
    }

    match (report.vms.value, report.vms.error) {
        (Some(vms), error) => {
            out.section("HYPERV", error);
            render_vms(&mut out, vms);
        }
        (None, Some(error)) => {
            out.section("HYPERV", None);
            out.line(&error.to_string());
            if let SourceError::MalformedOutput { head, .. } = error {
                for line in head {
                    out.line(&format!("  | {line}"));
                }
            }
        }
        (None, None) => {}
    }

    out.finish()
}

fn render_cpu(out: &mut Table, sensors: &SensorSnapshot, show_cores: bool) {
    let cores: Vec<usize> = (1..)
        .take_while(|n| sensors.contains_key(&core_key(*n, "Load")))
        .collect();
    let clocks: Vec<f64> = cores
        .iter()
        .filter_map(|n| sensors.get(&core_key(*n, "Clock")).copied())
        .collect();
    let package_clock = if clocks.is_empty() {
        None
    } else {
        Some(clocks.iter().sum::<f64>() / clocks.len() as f64)
    };

    out.header(&["Core", "Load", "Clock", "Temperature"], NARROW);
    out.row(
        &[
            Cell::plain("Package"),
            Cell::plain(percent(sensors.get(CPU_TOTAL_LOAD).copied())),
            Cell::plain(ghz(package_clock)),
            Cell::plain(celsius(sensors.get(CPU_PACKAGE_TEMP).copied())),
        ],
        NARROW,
    );

    if show_cores && !cores.is_empty() {
        out.blank();
        for n in cores {
            out.row(
                &[
                    Cell::plain(format!("Core #{n}")),
                    Cell::plain(percent(sensors.get(&core_key(n, "Load")).copied())),
                    Cell::plain(ghz(sensors.get(&core_key(n, "Clock")).copied())),
                    Cell::plain(celsius(
                        sensors.get(&core_key(n, "Temperature")).copied(),
                    )),
                ],
                NARROW,
            );
        }
    }
}

fn render_gpu(out: &mut Table, sensors: &SensorSnapshot) {
    out.header(&["Load", "VRAM", "Clock", "Temperature"], NARROW);
    out.row(
        &[
            Cell::plain(percent(sensors.get(GPU_CORE_LOAD).copied())),
            Cell::plain(percent(sensors.get(GPU_MEMORY_LOAD).copied())),
            Cell::plain(ghz(sensors.get(GPU_CORE_CLOCK).copied())),
            Cell::plain(celsius(sensors.get(GPU_CORE_TEMP).copied())),
        ],
        NARROW,
    );
}

fn render_memory(out: &mut Table, sensors: &SensorSnapshot) {
    let used = sensors.get(USED_MEMORY).copied();
    let total = match (used, sensors.get(AVAILABLE_MEMORY).copied()) {
        (Some(used), Some(available)) => Some(used + available),
        _ => None,
    };
    let load = match (used, total) {
        (Some(used), Some(total)) if total > 0.0 => Some(used / total * 100.0),
        _ => None,
    };

    out.header(&["Load", "Used", "Total"], NARROW);
    out.row(
        &[
            Cell::plain(percent(load)),
            Cell::plain(gigabytes(used, 2)),
            Cell::plain(gigabytes(total, 2)),
        ],
        NARROW,
    );
}

fn render_storage(out: &mut Table, disks: &[DiskRecord]) {
    out.header(&["Drive", "Free", "Used", "Total"], NARROW);
    for disk in disks {
        out.row(
            &[
                Cell::plain(disk.device.clone()),
                Cell::plain(gigabytes(Some(disk.free), 0)),
                Cell::plain(gigabytes(Some(disk.used), 0)),
                Cell::plain(gigabytes(Some(disk.total), 0)),
            ],
            NARROW,
        );
    }
}

fn render_hosts(out: &mut Table, hosts: &[HostRecord]) {
    out.header(&["Name", "URL", "Status"], WIDE);
    for host in hosts {
        let status = if host.online {
            Cell::colored("Online", Color::Green)
        } else {
            Cell::colored("Offline", Color::Red)
        };
        out.row(
            &[
                Cell::plain(host.name.clone()),
                Cell::plain(host.url.clone()),
                status,
            ],
            WIDE,
        );
    }
}

fn render_vms(out: &mut Table, vms: &[VmRecord]) {
    out.header(&["Name", "CPU Load", "Memory", "Uptime", "State"], MEDIUM);
    for vm in vms {
        let state = match &vm.state {
            VmState::Running => Cell::colored("Running", Color::Green),
            other => Cell::colored(other.to_string(), Color::Red),
        };
        out.row(
            &[
                Cell::plain(vm.name.clone()),
                Cell::plain(percent(Some(vm.cpu_usage_percent))),
                Cell::plain(format!("{:.0} MB", vm.memory_assigned_mb)),
                Cell::plain(vm.uptime.as_deref().unwrap_or(MISSING)),
                state,
            ],
            MEDIUM,
        );
    }
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| MISSING.to_string(), |v| format!("{v:04.1} %"))
}

/// Clock readings arrive in MHz.
fn ghz(mhz: Option<f64>) -> String {
    mhz.map_or_else(|| MISSING.to_string(), |v| format!("{:.2} GHz", v / 1000.0))
}

fn celsius(value: Option<f64>) -> String {
    value.map_or_else(|| MISSING.to_string(), |v| format!("{v:.1} C"))
}

fn gigabytes(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| MISSING.to_string(), |v| format!("{v:.precision$} GB"))
}

struct Cell {
    text: String,
    color: Option<Color>,
}

impl Cell {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: None,
        }
    }

    fn colored(text: impl Into<String>, color: Color) -> Self {
        Self {
            text: text.into(),
            color: Some(color),
        }
    }
}

/// Fixed-width text builder. Cells are padded before they are colored so
/// escape codes never count towards the column width.
struct Table {
    buf: String,
    color: bool,
}

impl Table {
    fn new(color: bool) -> Self {
        Self {
            buf: String::new(),
            color,
        }
    }

    fn line(&mut self, text: &str) {
        self.buf.push_str(text);
        self.buf.push('\n');
    }

    fn blank(&mut self) {
        self.buf.push('\n');
    }

    fn section(&mut self, name: &str, stale: Option<&SourceError>) {
        self.blank();
        self.line(&format!("{name:-^16}"));
        if let Some(err) = stale {
            let note = self.paint(format!("(stale: {err})"), Some(Color::Yellow));
            self.line(&note);
        }
        self.blank();
    }

    fn header(&mut self, names: &[&str], width: usize) {
        let cells: Vec<Cell> = names.iter().map(|n| Cell::plain(*n)).collect();
        self.row(&cells, width);
        let underline: Vec<Cell> = names
            .iter()
            .map(|n| Cell::plain("-".repeat(n.chars().count())))
            .collect();
        self.row(&underline, width);
    }

    fn row(&mut self, cells: &[Cell], width: usize) {
        let last = cells.len().saturating_sub(1);
        let mut line = String::new();
        for (i, cell) in cells.iter().enumerate() {
            let text = if i == last {
                cell.text.clone()
            } else {
                format!("{:<width$}", cell.text)
            };
            line.push_str(&self.paint(text, cell.color));
        }
        let _ = writeln!(self.buf, "{line}");
    }

    fn paint(&self, text: String, color: Option<Color>) -> String {
        match color {
            Some(color) if self.color => text.with(color).to_string(),
            _ => text,
        }
    }

    fn finish(self) -> String {
        self.buf
    }
}
