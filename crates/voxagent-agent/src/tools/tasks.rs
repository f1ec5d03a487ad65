//! In-memory task list the model can use to track multi-step work.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{json, Value};

use super::base::{optional_i64, optional_string, require_string, Tool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    fn marker(self) -> &'static str {
        match self {
            Self::Completed => "[x]",
            Self::InProgress => "[~]",
            Self::Pending => "[ ]",
        }
    }
}

#[derive(Debug, Clone)]
struct TaskItem {
    id: u32,
    subject: String,
    description: String,
    status: TaskStatus,
}

#[derive(Debug, Default)]
struct TaskList {
    items: Vec<TaskItem>,
    next_id: u32,
}

/// `tasks` tool: create, update and list.
#[derive(Debug, Default)]
pub struct TaskTool {
    list: Mutex<TaskList>,
}

impl TaskTool {
    pub fn new() -> Self {
        Self::default()
    }

    fn create(&self, params: &HashMap<String, Value>) -> String {
        let subject = optional_string(params, "subject").unwrap_or_else(|| "Untitled task".into());
        let description = optional_string(params, "description").unwrap_or_default();

        let mut list = self.list.lock().unwrap_or_else(|e| e.into_inner());
        list.next_id += 1;
        let id = list.next_id;
        list.items.push(TaskItem {
            id,
            subject: subject.clone(),
            description,
            status: TaskStatus::Pending,
        });
        format!("Created task #{id}: {subject}")
    }

    fn update(&self, params: &HashMap<String, Value>) -> anyhow::Result<String> {
        let id = optional_i64(params, "task_id")
            .ok_or_else(|| anyhow::anyhow!("Missing task_id for update"))?;
        let status_str = require_string(params, "status")?;
        let status = TaskStatus::parse(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Unknown status: {status_str}"))?;

        let mut list = self.list.lock().unwrap_or_else(|e| e.into_inner());
        let task = list
            .items
            .iter_mut()
            .find(|t| i64::from(t.id) == id)
            .ok_or_else(|| anyhow::anyhow!("Task #{id} not found"))?;
        task.status = status;
        Ok(format!(
            "Updated task #{id} '{}' → {}",
            task.subject,
            status.as_str()
        ))
    }

    fn render(&self) -> String {
        let list = self.list.lock().unwrap_or_else(|e| e.into_inner());
        if list.items.is_empty() {
            return "No tasks.".into();
        }
        let mut out = String::from("Tasks:\n");
        for task in &list.items {
            out.push_str(&format!(
                "  #{} {} {} - {}\n",
                task.id,
                task.status.marker(),
                task.subject,
                task.status.as_str()
            ));
            if !task.description.is_empty() {
                out.push_str(&format!("       {}\n", task.description));
            }
        }
        out
    }
}

impl Tool for TaskTool {
    fn name(&self) -> &str {
        "tasks"
    }

    fn description(&self) -> &str {
        "Manage an in-memory task list. Actions: create (new task), update (change status), list (show all tasks)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "description": "Action to perform",
                    "enum": ["create", "update", "list"]
                },
                "subject": { "type": "string", "description": "Task title (create)" },
                "description": { "type": "string", "description": "Task details (create)" },
                "task_id": { "type": "integer", "description": "Task id (update)" },
                "status": {
                    "type": "string",
                    "description": "New status (update)",
                    "enum": ["pending", "in_progress", "completed"]
                }
            },
            "required": ["action"]
        })
    }

    fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let action = require_string(&params, "action")?;
        match action.as_str() {
            "create" => Ok(self.create(&params)),
            "update" => self.update(&params),
            "list" => Ok(self.render()),
            other => anyhow::bail!("Unknown action: {other}. Use 'create', 'update', or 'list'."),
        }
    }
}
