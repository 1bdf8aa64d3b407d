//! Closed tool registry: name → descriptor + handler, resolved once at
//! registration time. Invocation goes through the uniform [`Tool`] trait
//! rather than any runtime inspection.

use parley_core::{ExecutionMode, ParleyError, Result, Tool, ToolDescriptor};
use std::collections::HashMap;
use std::sync::Arc;

/// The set of tools available to a session.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Duplicate names are rejected; the registry is
    /// resolved once and never mutated behind a running session.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(ParleyError::config("tool name must not be empty"));
        }
        if self.tools.contains_key(&name) {
            return Err(ParleyError::config(format!("tool '{name}' is already registered")));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Declared scheduling mode of a registered tool.
    pub fn mode_of(&self, name: &str) -> Option<ExecutionMode> {
        self.tools.get(name).map(|t| t.execution_mode())
    }

    /// Descriptors for every registered tool, for handing to the model.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<_> =
            self.tools.values().map(|t| ToolDescriptor::of(t.as_ref())).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// True when no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
