pub mod hyperv;
pub mod table;

use crate::config::InventoryConfig;
use crate::state::{SourceError, VmRecord};
use hyperv::ParseError;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Raw lines of unrecognised output kept for the report.
const MALFORMED_HEAD_LINES: usize = 5;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} did not finish within {}", humantime::format_duration(*.timeout))]
    Timeout { program: String, timeout: Duration },
    #[error("{program} exited with {status}: {message}")]
    Failed {
        program: String,
        status: ExitStatus,
        message: String,
    },
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl From<InventoryError> for SourceError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::Timeout { timeout, .. } => SourceError::Timeout(timeout),
            InventoryError::Parse(ParseError::PermissionDenied) => SourceError::PermissionDenied,
            InventoryError::Parse(ParseError::MalformedOutput { lines }) => {
                SourceError::MalformedOutput {
                    lines: lines.len(),
                    head: lines.into_iter().take(MALFORMED_HEAD_LINES).collect(),
                }
            }
            other => SourceError::Command(other.to_string()),
        }
    }
}

/// Anything that can produce the current VM inventory.
pub trait InventorySource {
    async fn fetch(&mut self) -> Result<Vec<VmRecord>, InventoryError>;
}

/// Runs an external command and parses its `Get-VM` style table.
#[derive(Debug, Clone)]
pub struct CommandInventory {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandInventory {
    pub fn new(cfg: &InventoryConfig) -> Self {
        Self {
            program: cfg.program.clone(),
            args: cfg.args.clone(),
            timeout: cfg.timeout(),
        }
    }

    async fn run(&self) -> Result<(ExitStatus, String, String), InventoryError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(InventoryError::Spawn {
                    program: self.program.clone(),
                    source,
                })
            }
            Err(_elapsed) => {
                return Err(InventoryError::Timeout {
                    program: self.program.clone(),
                    timeout: self.timeout,
                })
            }
        };

        Ok((
            output.status,
            decode_cmd_stdout(&output.stdout),
            decode_cmd_stdout(&output.stderr),
        ))
    }
}

impl InventorySource for CommandInventory {
    async fn fetch(&mut self) -> Result<Vec<VmRecord>, InventoryError> {
        let start = Instant::now();
        let (status, stdout, stderr) = self.run().await?;
        debug!(
            program = %self.program,
            %status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "inventory command finished"
        );

        // PowerShell prints the permission error on stderr; parse both streams
        // so it is recognised wherever it lands.
        let combined = format!("{stdout}\n{stderr}");
        match hyperv::parse(&combined) {
            Ok(records) => Ok(records),
            Err(ParseError::MalformedOutput { lines }) => {
                if !status.success() {
                    return Err(InventoryError::Failed {
                        program: self.program.clone(),
                        status,
                        message: first_line(&stderr),
                    });
                }
                warn!(
                    program = %self.program,
                    line_count = lines.len(),
                    raw = ?lines,
                    "inventory output has no recognisable header"
                );
                Err(ParseError::MalformedOutput { lines }.into())
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no error output")
        .to_string()
}

/// Decodes command output that may be UTF-8 or UTF-16LE (PowerShell redirection).
fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        return utf8.to_string();
    }

    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let u16buf: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&u16buf) {
            return s.trim_start_matches('\u{feff}').to_string();
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_utf16le_output() {
        let text = "Name State";
        let mut bytes = vec![0xff, 0xfe];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_cmd_stdout(&bytes), text);
    }

    #[test]
    fn decodes_plain_utf8() {
        assert_eq!(decode_cmd_stdout("Ünïcødé".as_bytes()), "Ünïcødé");
    }

    #[test]
    fn parse_errors_map_to_source_errors() {
        let denied: SourceError = InventoryError::Parse(ParseError::PermissionDenied).into();
        assert_eq!(denied, SourceError::PermissionDenied);

        let malformed: SourceError = InventoryError::Parse(ParseError::MalformedOutput {
            lines: vec!["a".to_string(), "b".to_string()],
        })
        .into();
        assert_eq!(
            malformed,
            SourceError::MalformedOutput {
                lines: 2,
                head: vec!["a".to_string(), "b".to_string()],
            }
        );

        let long: SourceError = InventoryError::Parse(ParseError::MalformedOutput {
            lines: (0..20).map(|i| format!("line {i}")).collect(),
        })
        .into();
        match long {
            SourceError::MalformedOutput { lines, head } => {
                assert_eq!(lines, 20);
                assert_eq!(head.len(), MALFORMED_HEAD_LINES);
                assert_eq!(head[0], "line 0");
            }
            other => panic!("expected MalformedOutput, got {other:?}"),
        }

        let timeout: SourceError = InventoryError::Timeout {
            program: "powershell.exe".to_string(),
            timeout: Duration::from_secs(15),
        }
        .into();
        assert_eq!(timeout, SourceError::Timeout(Duration::from_secs(15)));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let mut inventory = CommandInventory::new(&InventoryConfig {
            program: "tailwind-no-such-inventory-command".to_string(),
            ..InventoryConfig::default()
        });
        let err = inventory.fetch().await.expect_err("spawn must fail");
        assert!(matches!(err, InventoryError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn parses_table_from_real_process() {
        let table = "Name  State   CPUUsage(%) MemoryAssigned(M) Uptime   Status Version\n\
                     ----  -----   ----------- ----------------- ------   ------ -------\n\
                     web   Running 7           1024              01:02:03 OK     9.0\n";
        let mut inventory = CommandInventory::new(&InventoryConfig {
            program: "printf".to_string(),
            args: vec!["%s".to_string(), table.to_string()],
            ..InventoryConfig::default()
        });
        let records = inventory.fetch().await.expect("printf output parses");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "web");
        assert_eq!(records[0].cpu_usage_percent, 7.0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let mut inventory = CommandInventory::new(&InventoryConfig {
            program: "sleep".to_string(),
            args: vec!["5".to_string()],
            timeout_ms: 50,
            ..InventoryConfig::default()
        });
        let err = inventory.fetch().await.expect_err("must time out");
        assert!(matches!(err, InventoryError::Timeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn permission_error_on_stderr_wins_over_exit_status() {
        let mut inventory = CommandInventory::new(&InventoryConfig {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo 'Get-VM : You do not have the required permission to complete this task. Contact the administrator.' >&2; exit 1"
                    .to_string(),
            ],
            ..InventoryConfig::default()
        });
        match inventory.fetch().await {
            Err(InventoryError::Parse(ParseError::PermissionDenied)) => {}
            other => panic!("expected PermissionDenied, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_without_table_reports_exit() {
        let mut inventory = CommandInventory::new(&InventoryConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()],
            ..InventoryConfig::default()
        });
        match inventory.fetch().await {
            Err(InventoryError::Failed { message, .. }) => assert_eq!(message, "boom"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
