use pipecore::{NodeDescriptor, NodeExecutor, NodePorts};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Node type as listed for the authoring UI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeTypeInfo {
    #[serde(rename = "type")]
    pub node_type: String,
    pub label: String,
    pub color: String,
    pub icon: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub required_inputs: Vec<String>,
}

struct Registration {
    executor: Arc<dyn NodeExecutor>,
    descriptor: NodeDescriptor,
}

/// Registry of available node types.
///
/// Adding a node kind means registering one executor; the planner and the
/// executor loop never branch on type tags.
pub struct NodeRegistry {
    entries: Vec<Registration>,
    by_type: HashMap<String, usize>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_type: HashMap::new(),
        }
    }

    /// Register an executor. A later registration for the same tag replaces the earlier one.
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        let node_type = executor.node_type().to_string();
        let descriptor = executor.descriptor();
        tracing::info!("Registering node type: {}", node_type);

        let registration = Registration {
            executor,
            descriptor,
        };
        match self.by_type.get(&node_type) {
            Some(&idx) => self.entries[idx] = registration,
            None => {
                self.by_type.insert(node_type, self.entries.len());
                self.entries.push(registration);
            }
        }
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.by_type.contains_key(node_type)
    }

    pub fn executor(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.entry(node_type).map(|e| e.executor.clone())
    }

    /// Declared ports, the only part of a descriptor execution looks at.
    pub fn ports(&self, node_type: &str) -> Option<&NodePorts> {
        self.entry(node_type).map(|e| &e.descriptor.ports)
    }

    pub fn is_long_running(&self, node_type: &str) -> bool {
        self.entry(node_type)
            .map(|e| e.descriptor.long_running)
            .unwrap_or(false)
    }

    pub fn is_output(&self, node_type: &str) -> bool {
        self.entry(node_type)
            .map(|e| e.descriptor.is_output)
            .unwrap_or(false)
    }

    /// Get all registered node types, in registration order
    pub fn list_node_types(&self) -> Vec<NodeTypeInfo> {
        self.entries
            .iter()
            .map(|entry| {
                let d = &entry.descriptor;
                NodeTypeInfo {
                    node_type: entry.executor.node_type().to_string(),
                    label: d.presentation.label.clone(),
                    color: d.presentation.color.clone(),
                    icon: d.presentation.icon.clone(),
                    inputs: d.ports.inputs.iter().map(|p| p.name.clone()).collect(),
                    outputs: d.ports.outputs.clone(),
                    required_inputs: d
                        .ports
                        .inputs
                        .iter()
                        .filter(|p| p.required)
                        .map(|p| p.name.clone())
                        .collect(),
                }
            })
            .collect()
    }

    fn entry(&self, node_type: &str) -> Option<&Registration> {
        self.by_type.get(node_type).map(|&idx| &self.entries[idx])
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
