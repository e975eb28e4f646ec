use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::JSONSchema;
use serde_json::Value;

use super::{Tool, ToolError};
use crate::types::ToolSpec;
use crate::Error;

/// A tool together with its compiled input schema.
#[derive(Clone)]
pub(crate) struct DeclaredTool {
    pub(crate) tool: Arc<dyn Tool>,
    schema: Arc<JSONSchema>,
}

impl DeclaredTool {
    /// Check `input` against the tool's schema, listing every violation.
    pub(crate) fn validate(&self, input: &Value) -> Result<(), ToolError> {
        if let Err(errors) = self.schema.validate(input) {
            let details = errors
                .map(|error| {
                    let path = error.instance_path.to_string();
                    if path.is_empty() {
                        error.to_string()
                    } else {
                        format!("{path}: {error}")
                    }
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ToolError::invalid_input(format!(
                "invalid input for tool '{}': {details}",
                self.tool.name()
            )));
        }
        Ok(())
    }
}

/// The set of tools declared for a request, in declaration order.
#[derive(Clone, Default)]
pub struct ToolSet {
    order: Vec<String>,
    tools: HashMap<String, DeclaredTool>,
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet").field("tools", &self.order).finish()
    }
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a tool. Fails on a duplicate name or an uncompilable schema.
    pub fn declare(&mut self, tool: Arc<dyn Tool>) -> Result<(), Error> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(Error::config(format!("tool '{name}' declared twice")));
        }

        let schema = tool.input_schema();
        let compiled = JSONSchema::compile(&schema).map_err(|error| {
            Error::config(format!("invalid JSON schema for tool '{name}': {error}"))
        })?;

        self.order.push(name.clone());
        self.tools.insert(
            name,
            DeclaredTool {
                tool,
                schema: Arc::new(compiled),
            },
        );
        Ok(())
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Result<Self, Error> {
        self.declare(tool)?;
        Ok(self)
    }

    /// The subset of this set named by `names`, keeping the given order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<ToolSet, Error> {
        let mut selected = ToolSet::new();
        for name in names {
            let name = name.as_ref();
            let declared = self
                .tools
                .get(name)
                .ok_or_else(|| Error::config(format!("unknown tool '{name}'")))?;
            if !selected.tools.contains_key(name) {
                selected.order.push(name.to_string());
                selected.tools.insert(name.to_string(), declared.clone());
            }
        }
        Ok(selected)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&DeclaredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Declarations sent to the backend.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|declared| ToolSpec {
                name: declared.tool.name().to_string(),
                description: declared.tool.description().to_string(),
                parameters: declared.tool.input_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
