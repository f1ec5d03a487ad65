//! Filesystem tools — read, write, list directory.
//!
//! Relative paths resolve against the agent's working directory. When an
//! `allowed_dir` is set, anything that resolves outside it is refused.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{json, Value};
use tracing::debug;

use voxagent_core::utils::expand_home;

use super::base::{optional_i64, require_string, Tool};

/// Lines returned by `read_file` when no limit is given.
const DEFAULT_READ_LIMIT: usize = 2000;

// ─────────────────────────────────────────────
// Shared path helper
// ─────────────────────────────────────────────

/// Where filesystem tools operate.
#[derive(Debug, Clone)]
pub struct FsScope {
    working_dir: PathBuf,
    allowed_dir: Option<PathBuf>,
}

impl FsScope {
    /// Resolve relative paths against `working_dir`; restrict to it when
    /// `restrict` is set.
    pub fn new(working_dir: PathBuf, restrict: bool) -> Self {
        let allowed_dir = restrict.then(|| working_dir.clone());
        Self {
            working_dir,
            allowed_dir,
        }
    }

    /// Resolve a user-supplied path.
    ///
    /// Returns `Err` if the resolved path is outside the allowed directory.
    fn resolve(&self, path: &str) -> anyhow::Result<PathBuf> {
        let expanded = expand_home(path);
        let joined = if expanded.is_absolute() {
            expanded
        } else {
            self.working_dir.join(expanded)
        };

        let resolved = canonicalize_lenient(&joined);

        if let Some(allowed) = &self.allowed_dir {
            let allowed_canon = canonicalize_lenient(allowed);
            if !resolved.starts_with(&allowed_canon) {
                anyhow::bail!(
                    "Access denied: path '{}' is outside allowed directory '{}'",
                    resolved.display(),
                    allowed_canon.display()
                );
            }
        }
        Ok(resolved)
    }
}

/// Canonicalize if the path exists; for a file about to be created,
/// canonicalize the parent and re-attach the name.
fn canonicalize_lenient(path: &Path) -> PathBuf {
    if let Ok(canon) = path.canonicalize() {
        return canon;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(canon_parent) => canon_parent.join(name),
            Err(_) => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

// ─────────────────────────────────────────────
// ReadFileTool
// ─────────────────────────────────────────────

/// Reads a text file with line numbers.
pub struct ReadFileTool {
    scope: FsScope,
}

impl ReadFileTool {
    pub fn new(scope: FsScope) -> Self {
        Self { scope }
    }
}

impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file. Output lines are numbered. Use offset and limit to page through large files."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path, absolute or relative to the working directory"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line to start from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines (default 2000)"
                }
            },
            "required": ["path"]
        })
    }

    fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path = require_string(&params, "path")?;
        let offset = optional_i64(&params, "offset").unwrap_or(1).max(1) as usize;
        let limit = optional_i64(&params, "limit")
            .map(|l| l.max(1) as usize)
            .unwrap_or(DEFAULT_READ_LIMIT);

        let resolved = self.scope.resolve(&path)?;
        if !resolved.exists() {
            anyhow::bail!("File not found: {path}");
        }
        if !resolved.is_file() {
            anyhow::bail!("Not a file: {path}");
        }

        let content = std::fs::read_to_string(&resolved)
            .with_context(|| format!("Failed to read {}", resolved.display()))?;
        debug!(path = %resolved.display(), bytes = content.len(), "read file");

        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        if total == 0 {
            return Ok("(empty file)".into());
        }
        if offset > total {
            anyhow::bail!("Offset {offset} is past the end of the file ({total} lines)");
        }

        let start = offset - 1;
        let end = (start + limit).min(total);
        let mut out = String::new();
        for (i, line) in lines[start..end].iter().enumerate() {
            out.push_str(&format!("{:>6}\t{line}\n", start + i + 1));
        }
        if end < total {
            out.push_str(&format!("... ({} more lines, {total} total)\n", total - end));
        }
        Ok(out)
    }
}

// ─────────────────────────────────────────────
// WriteFileTool
// ─────────────────────────────────────────────

/// Writes content to a file, creating parent directories as needed.
pub struct WriteFileTool {
    scope: FsScope,
}

impl WriteFileTool {
    pub fn new(scope: FsScope) -> Self {
        Self { scope }
    }
}

impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates parent directories if needed. Overwrites existing files."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path to write"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path = require_string(&params, "path")?;
        let content = require_string(&params, "content")?;
        let resolved = self.scope.resolve(&path)?;

        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&resolved, &content)
            .with_context(|| format!("Failed to write {}", resolved.display()))?;

        Ok(format!(
            "Successfully wrote {} bytes to {}",
            content.len(),
            resolved.display()
        ))
    }
}

// ─────────────────────────────────────────────
// ListDirTool
// ─────────────────────────────────────────────

/// Lists directory entries, directories first.
pub struct ListDirTool {
    scope: FsScope,
}

impl ListDirTool {
    pub fn new(scope: FsScope) -> Self {
        Self { scope }
    }
}

impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the contents of a directory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path (default: working directory)"
                }
            },
            "required": []
        })
    }

    fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path = params
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();
        let resolved = self.scope.resolve(&path)?;

        if !resolved.is_dir() {
            anyhow::bail!("Not a directory: {path}");
        }

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&resolved)
            .with_context(|| format!("Failed to list {}", resolved.display()))?
        {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                dirs.push(name);
            } else {
                files.push(name);
            }
        }

        if dirs.is_empty() && files.is_empty() {
            return Ok("(empty directory)".into());
        }
        dirs.sort();
        files.sort();

        let lines: Vec<String> = dirs
            .iter()
            .map(|d| format!("📁 {d}/"))
            .chain(files.iter().map(|f| format!("📄 {f}")))
            .collect();
        Ok(lines.join("\n"))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
