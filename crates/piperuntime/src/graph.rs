use crate::registry::NodeRegistry;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use petgraph::Direction;
use pipecore::{GraphError, NodeId, PipelineEdge, PipelineNode};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// An edge whose handles have been resolved against the node types' ports.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEdge {
    pub edge_id: String,
    pub source: NodeId,
    pub source_port: String,
    pub target: NodeId,
    pub target_port: String,
}

/// A validated, acyclic pipeline graph.
///
/// Node indices follow the order nodes were authored in, which is what
/// makes scheduling ties deterministic.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    graph: DiGraph<NodeId, ()>,
    nodes: Vec<PipelineNode>,
    edges: Vec<ResolvedEdge>,
    index: HashMap<NodeId, NodeIndex>,
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Grey,
    Black,
}

impl PipelineGraph {
    /// Validate nodes and edges against the registry and build the dependency graph
    pub fn build(
        nodes: &[PipelineNode],
        edges: &[PipelineEdge],
        registry: &NodeRegistry,
    ) -> Result<Self, GraphError> {
        if nodes.is_empty() {
            return Err(GraphError::EmptyPipeline);
        }

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for node in nodes {
            if index.contains_key(&node.node_id) {
                return Err(GraphError::DuplicateNodeId(node.node_id.clone()));
            }
            if !registry.contains(&node.node_type) {
                return Err(GraphError::UnknownNodeType {
                    node_id: node.node_id.clone(),
                    node_type: node.node_type.clone(),
                });
            }
            let idx = graph.add_node(node.node_id.clone());
            index.insert(node.node_id.clone(), idx);
        }

        let mut resolved = Vec::with_capacity(edges.len());
        let mut bound_inputs = HashSet::new();

        for edge in edges {
            let (Some(&from), Some(&to)) = (
                index.get(&edge.source_node_id),
                index.get(&edge.target_node_id),
            ) else {
                return Err(GraphError::DanglingEdge(edge.edge_id.clone()));
            };

            let resolved_edge = resolve_handles(edge, nodes, &index, registry)?;

            if !bound_inputs.insert((resolved_edge.target.clone(), resolved_edge.target_port.clone())) {
                return Err(GraphError::DuplicateInputBinding {
                    node_id: resolved_edge.target,
                    port: resolved_edge.target_port,
                });
            }

            graph.add_edge(from, to, ());
            resolved.push(resolved_edge);
        }

        let built = Self {
            graph,
            nodes: nodes.to_vec(),
            edges: resolved,
            index,
        };

        if let Some(cycle) = built.find_cycle() {
            return Err(GraphError::CycleDetected(cycle));
        }

        Ok(built)
    }

    /// Nodes in authoring order
    pub fn nodes(&self) -> &[PipelineNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[ResolvedEdge] {
        &self.edges
    }

    pub fn node(&self, node_id: &str) -> Option<&PipelineNode> {
        self.index.get(node_id).map(|idx| &self.nodes[idx.index()])
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.index.contains_key(node_id)
    }

    /// Edges feeding into `node_id`
    pub fn inbound<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a ResolvedEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// True when nothing consumes this node's outputs.
    pub fn is_terminal(&self, node_id: &str) -> bool {
        self.index
            .get(node_id)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .unwrap_or(false)
    }

    /// `node_id` plus every node it transitively depends on.
    pub fn ancestors(&self, node_id: &str) -> Option<HashSet<NodeId>> {
        let start = *self.index.get(node_id)?;
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        let mut found = HashSet::new();
        while let Some(idx) = dfs.next(reversed) {
            found.insert(self.graph[idx].clone());
        }
        Some(found)
    }

    /// Kahn's algorithm over the nodes in `subset` (all nodes when `None`).
    ///
    /// Among ready nodes the earliest-authored runs first.
    pub fn topological_order(&self, subset: Option<&HashSet<NodeId>>) -> Vec<NodeId> {
        let included = |idx: NodeIndex| subset.map_or(true, |s| s.contains(&self.graph[idx]));

        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
        for idx in self.graph.node_indices().filter(|&i| included(i)) {
            let degree = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter(|&src| included(src))
                .count();
            in_degree.insert(idx, degree);
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(idx, _)| Reverse(idx.index()))
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(raw)) = ready.pop() {
            let idx = NodeIndex::new(raw);
            order.push(self.graph[idx].clone());

            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(next.index()));
                    }
                }
            }
        }

        order
    }

    /// Depth-first white/grey/black colouring; returns the first cycle met.
    fn find_cycle(&self) -> Option<Vec<NodeId>> {
        let mut colors = vec![Color::White; self.graph.node_count()];
        let mut path = Vec::new();

        for start in self.graph.node_indices() {
            if colors[start.index()] == Color::White {
                if let Some(cycle) = self.visit(start, &mut colors, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit(
        &self,
        idx: NodeIndex,
        colors: &mut [Color],
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeId>> {
        colors[idx.index()] = Color::Grey;
        path.push(idx);

        let mut successors: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        successors.sort();
        successors.dedup();

        for next in successors {
            match colors[next.index()] {
                Color::Grey => {
                    let start = path.iter().position(|&p| p == next).unwrap_or(0);
                    return Some(path[start..].iter().map(|&p| self.graph[p].clone()).collect());
                }
                Color::White => {
                    if let Some(cycle) = self.visit(next, colors, path) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }

        path.pop();
        colors[idx.index()] = Color::Black;
        None
    }
}

/// Missing source handle means the first declared output; missing target
/// handle means an input of the same name as the source port.
fn resolve_handles(
    edge: &PipelineEdge,
    nodes: &[PipelineNode],
    index: &HashMap<NodeId, NodeIndex>,
    registry: &NodeRegistry,
) -> Result<ResolvedEdge, GraphError> {
    let source = &nodes[index[&edge.source_node_id].index()];
    let target = &nodes[index[&edge.target_node_id].index()];

    let unknown_port = |node_id: &str, port: &str| GraphError::UnknownPort {
        edge_id: edge.edge_id.clone(),
        node_id: node_id.to_string(),
        port: port.to_string(),
    };

    let source_ports = registry
        .ports(&source.node_type)
        .ok_or_else(|| GraphError::UnknownNodeType {
            node_id: source.node_id.clone(),
            node_type: source.node_type.clone(),
        })?;
    let target_ports = registry
        .ports(&target.node_type)
        .ok_or_else(|| GraphError::UnknownNodeType {
            node_id: target.node_id.clone(),
            node_type: target.node_type.clone(),
        })?;

    let source_port = match edge.source_handle.as_deref().filter(|h| !h.is_empty()) {
        Some(handle) if source_ports.has_output(handle) => handle.to_string(),
        Some(handle) => return Err(unknown_port(&source.node_id, handle)),
        None => source_ports
            .outputs
            .first()
            .cloned()
            .ok_or_else(|| unknown_port(&source.node_id, "<default output>"))?,
    };

    let target_port = edge
        .target_handle
        .as_deref()
        .filter(|h| !h.is_empty())
        .unwrap_or(&source_port)
        .to_string();
    if target_ports.input(&target_port).is_none() {
        return Err(unknown_port(&target.node_id, &target_port));
    }

    Ok(ResolvedEdge {
        edge_id: edge.edge_id.clone(),
        source: source.node_id.clone(),
        source_port,
        target: target.node_id.clone(),
        target_port,
    })
}
