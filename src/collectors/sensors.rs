use crate::collectors::SensorSource;
use crate::state::SensorSnapshot;
use std::time::{Duration, Instant};
use sysinfo::{ComponentExt, CpuExt, System, SystemExt};
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Upper bound for a single run of `nvidia-smi` or the LHM query.
const HELPER_TIMEOUT: Duration = Duration::from_secs(3);

pub const CPU_TOTAL_LOAD: &str = "CPU Total/Load";
pub const CPU_PACKAGE_TEMP: &str = "CPU Package/Temperature";
pub const GPU_CORE_LOAD: &str = "GPU Core/Load";
pub const GPU_MEMORY_LOAD: &str = "GPU Memory/Load";
pub const GPU_CORE_CLOCK: &str = "GPU Core/Clock";
pub const GPU_CORE_TEMP: &str = "GPU Core/Temperature";
pub const USED_MEMORY: &str = "Used Memory/Data";
pub const AVAILABLE_MEMORY: &str = "Available Memory/Data";

pub fn core_key(core: usize, reading: &str) -> String {
    format!("CPU Core #{core}/{reading}")
}

/// Sensor readings keyed the way Open/LibreHardwareMonitor names them.
///
/// `sysinfo` supplies CPU load, clocks, temperatures and memory; `nvidia-smi`
/// fills in the GPU; on Windows a running LibreHardwareMonitor overrides both.
pub struct SysinfoSensors {
    system: System,
    cpu_refreshed_at: Instant,
    nvidia: HelperCommand,
    lhm: Option<HelperCommand>,
}

impl SysinfoSensors {
    pub fn new() -> Self {
        Self {
            system: System::new_all(),
            cpu_refreshed_at: Instant::now(),
            nvidia: HelperCommand::new(
                "nvidia-smi",
                &[
                    "--query-gpu=utilization.gpu,memory.used,memory.total,clocks.gr,temperature.gpu",
                    "--format=csv,noheader,nounits",
                ],
                HELPER_TIMEOUT,
            ),
            lhm: lhm_command(),
        }
    }
}

impl Default for SysinfoSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for SysinfoSensors {
    async fn sample(&mut self) -> Option<SensorSnapshot> {
        // CPU usage is a delta between two refreshes; too short a gap reads as 0.
        let wait = cpu_settle_delay(self.cpu_refreshed_at.elapsed());
        if !wait.is_zero() {
            time::sleep(wait).await;
        }

        let system = &mut self.system;
        system.refresh_cpu();
        self.cpu_refreshed_at = Instant::now();
        system.refresh_memory();
        system.refresh_components_list();
        system.refresh_components();

        if system.cpus().is_empty() {
            return None;
        }

        let mut out = SensorSnapshot::new();
        out.insert(
            CPU_TOTAL_LOAD.to_string(),
            system.global_cpu_info().cpu_usage() as f64,
        );
        for (i, cpu) in system.cpus().iter().enumerate() {
            out.insert(core_key(i + 1, "Load"), cpu.cpu_usage() as f64);
            out.insert(core_key(i + 1, "Clock"), cpu.frequency() as f64);
        }

        for component in system.components() {
            let celsius = component.temperature() as f64;
            if !celsius.is_finite() || celsius <= 0.0 {
                continue;
            }
            if let Some(key) = cpu_temperature_key(component.label()) {
                let slot = out.entry(key).or_insert(celsius);
                *slot = slot.max(celsius);
            }
        }

        out.insert(
            USED_MEMORY.to_string(),
            system.used_memory() as f64 / BYTES_PER_GB,
        );
        out.insert(
            AVAILABLE_MEMORY.to_string(),
            system.available_memory() as f64 / BYTES_PER_GB,
        );

        let gpu = self
            .nvidia
            .run()
            .await
            .map(|text| parse_nvidia_smi(&text))
            .unwrap_or_default();
        let lhm = match self.lhm.as_mut() {
            Some(cmd) => cmd
                .run()
                .await
                .map(|text| parse_lhm_lines(&text))
                .unwrap_or_default(),
            None => SensorSnapshot::new(),
        };
        debug!(
            sysinfo_sensors = out.len(),
            nvidia_sensors = gpu.len(),
            lhm_sensors = lhm.len(),
            "sensor sample per source"
        );
        out.extend(gpu);
        out.extend(lhm);

        Some(out)
    }
}

/// How long to wait before the next CPU refresh gives meaningful usage.
fn cpu_settle_delay(since_last_refresh: Duration) -> Duration {
    <System as SystemExt>::MINIMUM_CPU_UPDATE_INTERVAL.saturating_sub(since_last_refresh)
}

/// Optional external tool polled for extra readings.
///
/// Each run is bounded by `timeout` and the child is killed when it expires.
/// A tool that is missing, fails, hangs or prints nothing is switched off for
/// the rest of the process.
struct HelperCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    enabled: bool,
}

impl HelperCommand {
    fn new(program: &str, args: &[&str], timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout,
            enabled: true,
        }
    }

    async fn run(&mut self) -> Option<String> {
        if !self.enabled {
            return None;
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);

        let output = match time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                debug!(
                    program = %self.program,
                    error = %err,
                    "sensor helper unavailable, disabling"
                );
                self.enabled = false;
                return None;
            }
            Err(_elapsed) => {
                warn!(
                    program = %self.program,
                    timeout = %humantime::format_duration(self.timeout),
                    "sensor helper timed out, disabling"
                );
                self.enabled = false;
                return None;
            }
        };

        if !output.status.success() {
            debug!(
                program = %self.program,
                status = %output.status,
                "sensor helper failed, disabling"
            );
            self.enabled = false;
            return None;
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        if text.trim().is_empty() {
            debug!(program = %self.program, "sensor helper printed nothing, disabling");
            self.enabled = false;
            return None;
        }
        Some(text)
    }
}

/// Maps a `sysinfo` component label onto a CPU temperature key.
fn cpu_temperature_key(label: &str) -> Option<String> {
    let lower = label.to_lowercase();
    if ["gpu", "nvidia", "amdgpu", "radeon"]
        .iter()
        .any(|m| lower.contains(m))
    {
        return None;
    }
    if ["package", "tctl", "tdie"].iter().any(|m| lower.contains(m)) {
        return Some(CPU_PACKAGE_TEMP.to_string());
    }

    let rest = &lower[lower.find("core ")? + "core ".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let index: usize = digits.parse().ok()?;
    Some(core_key(index + 1, "Temperature"))
}

/// Reads the first GPU line of `nvidia-smi` CSV output.
fn parse_nvidia_smi(text: &str) -> SensorSnapshot {
    let mut out = SensorSnapshot::new();
    let Some(line) = text.lines().find(|l| !l.trim().is_empty()) else {
        return out;
    };
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 5 {
        return out;
    }

    if let Some(load) = parse_f64_loose(parts[0]) {
        out.insert(GPU_CORE_LOAD.to_string(), load);
    }
    if let (Some(used), Some(total)) = (parse_f64_loose(parts[1]), parse_f64_loose(parts[2])) {
        if total > 0.0 {
            out.insert(GPU_MEMORY_LOAD.to_string(), used / total * 100.0);
        }
    }
    if let Some(clock) = parse_f64_loose(parts[3]) {
        out.insert(GPU_CORE_CLOCK.to_string(), clock);
    }
    if let Some(temp) = parse_f64_loose(parts[4]) {
        out.insert(GPU_CORE_TEMP.to_string(), temp);
    }
    out
}

#[cfg(target_os = "windows")]
fn lhm_command() -> Option<HelperCommand> {
    let script = "$n=@('root/LibreHardwareMonitor','root/OpenHardwareMonitor'); foreach($ns in $n){ try { $s=Get-CimInstance -Namespace $ns -ClassName Sensor -ErrorAction Stop } catch { continue }; if($s){ $s | ForEach-Object { \"$($_.SensorType)|$($_.Name)|$($_.Value)\" }; break } }";
    let wrapped_script = format!(
        "[Console]::OutputEncoding=[System.Text.UTF8Encoding]::new($false); {script}"
    );
    Some(HelperCommand::new(
        "powershell",
        &["-NoProfile", "-Command", wrapped_script.as_str()],
        HELPER_TIMEOUT,
    ))
}

#[cfg(not(target_os = "windows"))]
fn lhm_command() -> Option<HelperCommand> {
    None
}

/// Parses `Type|Name|Value` lines into `"<Name>/<Type>"` keys.
fn parse_lhm_lines(text: &str) -> SensorSnapshot {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '|').map(str::trim);
            let sensor_type = parts.next()?;
            let name = parts.next()?;
            let value = parse_f64_loose(parts.next()?)?;
            if sensor_type.is_empty() || name.is_empty() || !value.is_finite() {
                return None;
            }
            Some((format!("{name}/{sensor_type}"), value))
        })
        .collect()
}

fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    // Windows locales print decimal commas.
    trimmed.replace(',', ".").parse::<f64>().ok()
}
