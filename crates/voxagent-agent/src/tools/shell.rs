//! Shell tool — execute commands in a subprocess.
//!
//! Commands run through `sh -c` (`cmd /C` on Windows) on the shared runtime.
//! A deny-pattern guard blocks destructive commands before they spawn, and a
//! timed-out child is killed when its future is dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{info, warn};

use voxagent_core::async_bridge;

use super::base::{optional_string, require_string, Tool};

/// Maximum output length before truncation (bytes).
const MAX_OUTPUT_LEN: usize = 10_000;

/// Dangerous command patterns that are always blocked.
const DENY_PATTERNS: &[&str] = &[
    r"\brm\s+-[rf]{1,2}\b",
    r"\bdel\s+/[fq]\b",
    r"\brmdir\s+/s\b",
    r"\b(format|mkfs|diskpart)\b",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r"\b(shutdown|reboot|poweroff)\b",
    r":\(\)\s*\{.*\};\s*:",
];

// ─────────────────────────────────────────────
// ExecTool
// ─────────────────────────────────────────────

/// Execute shell commands in a subprocess.
pub struct ExecTool {
    working_dir: PathBuf,
    timeout: Duration,
    /// If true, block commands that reference paths outside `working_dir`.
    restrict_to_workspace: bool,
    deny_regexes: Vec<Regex>,
    abs_path_re: Option<Regex>,
}

impl ExecTool {
    pub fn new(working_dir: PathBuf, timeout: Duration, restrict_to_workspace: bool) -> Self {
        let deny_regexes = DENY_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();

        Self {
            working_dir,
            timeout,
            restrict_to_workspace,
            deny_regexes,
            abs_path_re: Regex::new(r#"(?:/[^\s"']+|[A-Za-z]:\\[^\s"']+)"#).ok(),
        }
    }

    /// Returns a model-readable refusal if the command must not run.
    fn guard_command(&self, command: &str, cwd: &Path) -> Option<String> {
        let lower = command.to_lowercase();
        if self.deny_regexes.iter().any(|re| re.is_match(&lower)) {
            warn!(command = command, "command blocked by safety guard");
            return Some("Error: Command blocked by safety guard (dangerous pattern detected)".into());
        }

        if !self.restrict_to_workspace {
            return None;
        }
        if command.contains("../") || command.contains("..\\") {
            return Some("Error: Command blocked: path traversal (../) not allowed in restricted mode".into());
        }
        let root = self.working_dir.canonicalize().unwrap_or_else(|_| self.working_dir.clone());
        if !cwd.starts_with(&root) {
            return Some(format!(
                "Error: Working directory '{}' is outside workspace",
                cwd.display()
            ));
        }
        let re = self.abs_path_re.as_ref()?;
        for m in re.find_iter(command) {
            let p = PathBuf::from(m.as_str());
            let resolved = p.canonicalize().unwrap_or(p);
            if !resolved.starts_with(&root) {
                return Some(format!(
                    "Error: Command references path '{}' outside workspace",
                    m.as_str()
                ));
            }
        }
        None
    }

    fn shell_command(command: &str) -> Command {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output. \
         Use this for running builds, tests, git, or any CLI tool."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Optional working directory (defaults to workspace root)"
                }
            },
            "required": ["command"]
        })
    }

    fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let command = require_string(&params, "command")?;
        let cwd = optional_string(&params, "working_dir")
            .map(|d| {
                let p = PathBuf::from(d);
                if p.is_absolute() {
                    p
                } else {
                    self.working_dir.join(p)
                }
            })
            .unwrap_or_else(|| self.working_dir.clone());
        let cwd = cwd.canonicalize().unwrap_or(cwd);

        if let Some(refusal) = self.guard_command(&command, &cwd) {
            return Ok(refusal);
        }

        info!(command = %command, cwd = %cwd.display(), "executing shell command");

        let mut cmd = Self::shell_command(&command);
        cmd.current_dir(&cwd);
        let result = async_bridge::block_on_timeout(self.timeout, async move {
            let child = cmd.spawn()?;
            child.wait_with_output().await
        });

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => anyhow::bail!("Command failed: {e}"),
            Err(_) => {
                warn!(command = %command, timeout_secs = self.timeout.as_secs(), "command timed out");
                return Ok(format!(
                    "Error: Command timed out after {} seconds",
                    self.timeout.as_secs()
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);

        let mut parts = Vec::new();
        if !stdout.is_empty() {
            parts.push(stdout.into_owned());
        }
        if !stderr.is_empty() {
            parts.push(format!("STDERR:\n{stderr}"));
        }
        if code != 0 {
            parts.push(format!("Exit code: {code}"));
        }

        let mut combined = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        };

        if combined.len() > MAX_OUTPUT_LEN {
            let mut cut = MAX_OUTPUT_LEN;
            while !combined.is_char_boundary(cut) {
                cut -= 1;
            }
            let remaining = combined.len() - cut;
            combined.truncate(cut);
            combined.push_str(&format!("\n... (truncated, {remaining} more bytes)"));
        }

        Ok(combined)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
