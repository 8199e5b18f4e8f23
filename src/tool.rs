//! Tool system for agents
//!
//! A tool is a named [`ToolBackend`]: `execute` hands back an execution id
//! straight away, `poll` reports whether that execution finished and
//! `result` reads its output. [`FunctionTool`] finishes inside `execute`;
//! [`RemoteTool`] waits on an external responder through the pending table.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::auth::Principal;
use crate::backend::{Outbound, Outbox};
use crate::error::{AgentsError, Result};
use crate::ids::{Id, IdAllocator};
use crate::pending::PendingRequestTable;
use crate::registry::Registrable;

/// Execution capability behind a tool.
pub trait ToolBackend: Send + Sync {
    /// Start an execution with `arguments` and return its id.
    fn execute(&self, arguments: &str) -> Result<Id>;

    /// Whether the execution has finished.
    fn poll(&self, execution_id: &Id) -> Result<bool>;

    /// Output of a finished execution.
    ///
    /// In-process tools hand each output out once and then forget the
    /// execution; pending-backed tools keep answering from the table.
    fn result(&self, execution_id: &Id) -> Result<String>;
}

/// Trait for all tools that can be used by agents
pub trait Tool: ToolBackend + Debug {
    /// Get the name of the tool
    fn name(&self) -> &str;

    /// Get the description of the tool
    fn description(&self) -> &str;

    /// Kind of tool, published when it is registered
    fn tool_type(&self) -> &str {
        "function"
    }
}

impl Registrable for dyn Tool {
    fn display_name(&self) -> String {
        self.name().to_string()
    }

    fn metadata(&self) -> Value {
        serde_json::json!({
            "tool_type": self.tool_type(),
            "description": self.description(),
        })
    }
}

type ToolFn = dyn Fn(&str) -> Result<String> + Send + Sync;

/// A function-based tool that completes synchronously
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    function: Arc<ToolFn>,
    ids: Arc<IdAllocator>,
    outputs: Arc<Mutex<HashMap<Id, String>>>,
}

impl Debug for FunctionTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

impl FunctionTool {
    /// Create a new function tool
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, function: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            function: Arc::new(function),
            ids: Arc::new(IdAllocator::new()),
            outputs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a function tool with a simple string-to-string function
    pub fn simple<F>(name: &str, description: &str, function: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        Self::new(name, description, move |args: &str| Ok(function(args.to_string())))
    }
}

impl ToolBackend for FunctionTool {
    fn execute(&self, arguments: &str) -> Result<Id> {
        let id = self
            .ids
            .next(&Principal::new(self.name.as_str()), arguments.as_bytes());
        let output = match (self.function)(arguments) {
            Ok(output) => output,
            Err(e) => format!("Error: {}", e),
        };
        self.outputs.lock().insert(id, output);
        Ok(id)
    }

    fn poll(&self, execution_id: &Id) -> Result<bool> {
        if self.outputs.lock().contains_key(execution_id) {
            Ok(true)
        } else {
            Err(AgentsError::not_found("execution", execution_id))
        }
    }

    fn result(&self, execution_id: &Id) -> Result<String> {
        self.outputs
            .lock()
            .remove(execution_id)
            .ok_or_else(|| AgentsError::not_found("execution", execution_id))
    }
}

impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// A tool executed off-system; results arrive through the pending table.
#[derive(Debug, Clone)]
pub struct RemoteTool {
    name: String,
    description: String,
    table: Arc<PendingRequestTable>,
    outbox: Arc<Outbox>,
    requester: Principal,
}

impl RemoteTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        table: Arc<PendingRequestTable>,
        outbox: Arc<Outbox>,
    ) -> Self {
        let name = name.into();
        Self {
            requester: Principal::new(format!("tool:{}", name)),
            name,
            description: description.into(),
            table,
            outbox,
        }
    }
}

impl ToolBackend for RemoteTool {
    fn execute(&self, arguments: &str) -> Result<Id> {
        let id = self.table.open(&self.requester);
        self.outbox.push(Outbound::Tool {
            id,
            tool: self.name.clone(),
            arguments: arguments.to_string(),
        });
        Ok(id)
    }

    fn poll(&self, execution_id: &Id) -> Result<bool> {
        Ok(self.table.poll(execution_id)?.is_ready())
    }

    fn result(&self, execution_id: &Id) -> Result<String> {
        self.table
            .poll(execution_id)?
            .into_payload()
            .ok_or_else(|| AgentsError::NotCompleted {
                id: execution_id.to_string(),
            })
    }
}

impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn tool_type(&self) -> &str {
        "remote"
    }
}

/// Macro to create a function tool from a Rust function
#[macro_export]
macro_rules! function_tool {
    ($name:expr, $description:expr, $func:expr) => {
        $crate::tool::FunctionTool::simple($name, $description, $func)
    };
}
