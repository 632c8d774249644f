use crate::graph::PipelineGraph;
use crate::registry::NodeRegistry;
use pipecore::{GraphError, NodeError, NodeId, NodeValues, PipelineError, ValueMap};
use std::collections::HashSet;

/// Where a node input comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Output port of an upstream node, read once that node has run
    Edge { source: NodeId, port: String },
    /// The node's own `data` / `config`
    Literal(serde_json::Value),
    /// The run's `input_data`
    External(serde_json::Value),
    /// Manual values supplied with a preview request
    Override(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedInput {
    pub port: String,
    pub required: bool,
    pub binding: Binding,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub node_id: NodeId,
    pub node_type: String,
    pub inputs: Vec<PlannedInput>,
    /// External or override values for ports the type does not declare
    pub extra: ValueMap,
    pub config: ValueMap,
    pub data: ValueMap,
}

impl PlannedStep {
    /// Materialise the step's inputs from the results recorded so far.
    pub fn resolve_inputs(&self, node_results: &NodeValues) -> Result<ValueMap, NodeError> {
        let mut inputs = self.extra.clone();
        for input in &self.inputs {
            let value = match &input.binding {
                Binding::Edge { source, port } => node_results
                    .get(source)
                    .and_then(|outputs| outputs.get_present(port))
                    .cloned(),
                Binding::Literal(v) | Binding::External(v) | Binding::Override(v) => Some(v.clone()),
            };
            match value {
                Some(v) => inputs.insert(input.port.clone(), v),
                None if input.required => return Err(NodeError::MissingInput(input.port.clone())),
                None => {}
            }
        }
        Ok(inputs)
    }
}

/// Ordered steps plus the nodes whose outputs form the result.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub target: Option<NodeId>,
    pub steps: Vec<PlannedStep>,
    pub output_nodes: Vec<NodeId>,
}

impl ExecutionPlan {
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.steps.iter().map(|s| &s.node_id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Turns a validated graph into an ordered list of steps with bound inputs.
pub struct ExecutionPlanner<'a> {
    registry: &'a NodeRegistry,
}

impl<'a> ExecutionPlanner<'a> {
    pub fn new(registry: &'a NodeRegistry) -> Self {
        Self { registry }
    }

    /// Plan the whole graph, or only `target` and its ancestors.
    ///
    /// Every required input is checked here, so a plan that comes back
    /// `Ok` cannot fail for lack of an input that was never going to exist.
    pub fn plan(
        &self,
        graph: &PipelineGraph,
        target: Option<&str>,
        input_data: &NodeValues,
        overrides: &ValueMap,
    ) -> Result<ExecutionPlan, PipelineError> {
        let subset: Option<HashSet<NodeId>> = match target {
            Some(node_id) => Some(
                graph
                    .ancestors(node_id)
                    .ok_or_else(|| PipelineError::NodeNotFound(node_id.to_string()))?,
            ),
            None => None,
        };

        let order = graph.topological_order(subset.as_ref());
        let mut steps = Vec::with_capacity(order.len());

        for node_id in &order {
            let node = graph
                .node(node_id)
                .ok_or_else(|| PipelineError::NodeNotFound(node_id.clone()))?;
            let ports = self.registry.ports(&node.node_type).ok_or_else(|| {
                GraphError::UnknownNodeType {
                    node_id: node.node_id.clone(),
                    node_type: node.node_type.clone(),
                }
            })?;

            let empty = ValueMap::new();
            let external = input_data.get(node_id).unwrap_or(&empty);
            let manual = if target == Some(node_id.as_str()) {
                overrides
            } else {
                &empty
            };

            let mut inputs = Vec::with_capacity(ports.inputs.len());
            for port in &ports.inputs {
                let binding = if let Some(v) = manual.get_present(&port.name) {
                    Some(Binding::Override(v.clone()))
                } else if let Some(edge) = graph.inbound(node_id).find(|e| e.target_port == port.name) {
                    Some(Binding::Edge {
                        source: edge.source.clone(),
                        port: edge.source_port.clone(),
                    })
                } else if let Some(v) = literal(&node.data, &node.config, &port.name, port.fallback_key.as_deref()) {
                    Some(Binding::Literal(v.clone()))
                } else {
                    external.get_present(&port.name).cloned().map(Binding::External)
                };

                match binding {
                    Some(binding) => inputs.push(PlannedInput {
                        port: port.name.clone(),
                        required: port.required,
                        binding,
                    }),
                    None if port.required => {
                        return Err(GraphError::MissingRequiredInput {
                            node_id: node_id.clone(),
                            port: port.name.clone(),
                        }
                        .into())
                    }
                    None => {}
                }
            }

            let mut extra = ValueMap::new();
            for (key, value) in external.iter().chain(manual.iter()) {
                if ports.input(key).is_none() {
                    extra.insert(key.clone(), value.clone());
                }
            }

            steps.push(PlannedStep {
                node_id: node_id.clone(),
                node_type: node.node_type.clone(),
                inputs,
                extra,
                config: node.config.clone(),
                data: node.data.clone(),
            });
        }

        let output_nodes = match target {
            Some(node_id) => vec![node_id.to_string()],
            None => {
                let tagged: Vec<NodeId> = order
                    .iter()
                    .filter(|id| {
                        graph
                            .node(id)
                            .map(|n| self.registry.is_output(&n.node_type))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                if tagged.is_empty() {
                    order.iter().filter(|id| graph.is_terminal(id)).cloned().collect()
                } else {
                    tagged
                }
            }
        };

        Ok(ExecutionPlan {
            target: target.map(str::to_string),
            steps,
            output_nodes,
        })
    }
}

/// Same key in data, then config; then the fallback key in the same order.
/// Blank strings count as unset.
fn literal<'v>(
    data: &'v ValueMap,
    config: &'v ValueMap,
    port: &str,
    fallback: Option<&str>,
) -> Option<&'v serde_json::Value> {
    let lookup = |key: &str| {
        [data, config]
            .into_iter()
            .filter_map(|map| map.get_present(key))
            .find(|v| v.as_str().map_or(true, |s| !s.trim().is_empty()))
    };
    lookup(port).or_else(|| fallback.and_then(lookup))
}
