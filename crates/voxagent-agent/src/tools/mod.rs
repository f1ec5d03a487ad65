//! Built-in tools and the registry that dispatches them.

pub mod base;
pub mod filesystem;
pub mod registry;
pub mod shell;
pub mod tasks;
pub mod web;

pub use base::{optional_i64, optional_string, params_from_value, require_string, Tool};
pub use filesystem::{FsScope, ListDirTool, ReadFileTool, WriteFileTool};
pub use registry::{FilteredToolRegistry, ToolAccess, ToolRegistry};
pub use shell::ExecTool;
pub use tasks::TaskTool;
pub use web::WebFetchTool;
