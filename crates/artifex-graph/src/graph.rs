use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use artifex_model::{Edge, Node};

use crate::error::GraphError;

/// Indexed node graph for one evaluation session.
#[derive(Debug, Clone, Default)]
pub struct Graph {
  nodes: HashMap<String, Node>,
  edges: Vec<Edge>,
  /// Incoming edges per target node, in edge list order.
  incoming: HashMap<String, Vec<Edge>>,
  /// Adjacency list: node_id -> list of downstream node_ids.
  adjacency: HashMap<String, Vec<String>>,
  /// Ids that appeared more than once in the node list (last one kept).
  duplicates: Vec<String>,
}

impl Graph {
  /// Build a graph from nodes and edges.
  ///
  /// Nothing is validated here; see [`Graph::validate`].
  pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
    let mut by_id: HashMap<String, Node> = HashMap::with_capacity(nodes.len());
    let mut duplicates = Vec::new();
    for node in nodes {
      if let Some(previous) = by_id.insert(node.id.clone(), node) {
        duplicates.push(previous.id);
      }
    }

    let mut incoming: HashMap<String, Vec<Edge>> = HashMap::new();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    for edge in &edges {
      incoming
        .entry(edge.target.clone())
        .or_default()
        .push(edge.clone());
      adjacency
        .entry(edge.source.clone())
        .or_default()
        .push(edge.target.clone());
    }

    Self {
      nodes: by_id,
      edges,
      incoming,
      adjacency,
      duplicates,
    }
  }

  /// Get a node by ID.
  pub fn node(&self, node_id: &str) -> Option<&Node> {
    self.nodes.get(node_id)
  }

  /// Edges whose target is `node_id`.
  pub fn incoming_edges(&self, node_id: &str) -> &[Edge] {
    self
      .incoming
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get downstream nodes for a given node.
  pub fn downstream(&self, node_id: &str) -> &[String] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  pub fn nodes(&self) -> impl Iterator<Item = &Node> {
    self.nodes.values()
  }

  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  pub fn edge_count(&self) -> usize {
    self.edges.len()
  }

  /// Nodes with no incoming edges, sorted by id.
  pub fn entry_points(&self) -> Vec<String> {
    let mut entries: Vec<String> = self
      .nodes
      .keys()
      .filter(|id| self.incoming_edges(id).is_empty())
      .cloned()
      .collect();
    entries.sort();
    entries
  }

  /// Check the graph can be evaluated: unique ids, no dangling edges, no cycles.
  pub fn validate(&self) -> Result<(), GraphError> {
    if let Some(id) = self.duplicates.first() {
      return Err(GraphError::DuplicateNode(id.clone()));
    }

    for edge in &self.edges {
      if !self.nodes.contains_key(&edge.source) || !self.nodes.contains_key(&edge.target) {
        return Err(GraphError::InvalidEdge {
          from: edge.source.clone(),
          to: edge.target.clone(),
        });
      }
    }

    self.topological_order().map(|_| ())
  }

  /// All nodes ordered so that every node comes after its sources.
  ///
  /// Kahn's algorithm; ties are broken by id so the order is stable.
  pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
    let mut in_degree: HashMap<&str, usize> =
      self.nodes.keys().map(|id| (id.as_str(), 0)).collect();
    for edge in &self.edges {
      if self.nodes.contains_key(&edge.source) {
        if let Some(degree) = in_degree.get_mut(edge.target.as_str()) {
          *degree += 1;
        }
      }
    }

    let mut ready: BTreeSet<&str> = in_degree
      .iter()
      .filter(|(_, degree)| **degree == 0)
      .map(|(id, _)| *id)
      .collect();
    let mut order = Vec::with_capacity(self.nodes.len());

    while let Some(id) = ready.pop_first() {
      order.push(id.to_string());
      for next in self.downstream(id) {
        if let Some(degree) = in_degree.get_mut(next.as_str()) {
          *degree -= 1;
          if *degree == 0 {
            ready.insert(next.as_str());
          }
        }
      }
    }

    if order.len() == self.nodes.len() {
      return Ok(order);
    }

    let done: HashSet<&str> = order.iter().map(String::as_str).collect();
    let mut remaining: Vec<&str> = self
      .nodes
      .keys()
      .map(String::as_str)
      .filter(|id| !done.contains(id))
      .collect();
    remaining.sort();
    let path = remaining
      .iter()
      .find_map(|start| self.find_cycle_from(start))
      .unwrap_or_else(|| remaining.iter().map(|id| id.to_string()).collect());
    Err(GraphError::Cycle { path })
  }

  /// Nodes `target` depends on (itself included), dependency-first.
  pub fn upstream_order(&self, target: &str) -> Result<Vec<String>, GraphError> {
    if !self.nodes.contains_key(target) {
      return Err(GraphError::NodeNotFound(target.to_string()));
    }

    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = Vec::new();
    self.visit_upstream(target, &mut visited, &mut stack, &mut order)?;
    Ok(order)
  }

  fn visit_upstream(
    &self,
    node_id: &str,
    visited: &mut HashSet<String>,
    stack: &mut Vec<String>,
    order: &mut Vec<String>,
  ) -> Result<(), GraphError> {
    if let Some(pos) = stack.iter().position(|id| id == node_id) {
      let mut path = stack[pos..].to_vec();
      path.push(node_id.to_string());
      return Err(GraphError::Cycle { path });
    }
    if visited.contains(node_id) {
      return Ok(());
    }
    if !self.nodes.contains_key(node_id) {
      return Err(GraphError::NodeNotFound(node_id.to_string()));
    }

    stack.push(node_id.to_string());
    for edge in self.incoming_edges(node_id) {
      self.visit_upstream(&edge.source, visited, stack, order)?;
    }
    stack.pop();

    visited.insert(node_id.to_string());
    order.push(node_id.to_string());
    Ok(())
  }

  /// Walk downstream from `start` looking for a path back to it.
  fn find_cycle_from(&self, start: &str) -> Option<Vec<String>> {
    let mut parents: HashMap<&str, &str> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    let mut seen = HashSet::from([start]);

    while let Some(id) = queue.pop_front() {
      for next in self.downstream(id) {
        if next == start {
          let mut path = vec![start.to_string()];
          let mut cursor = id;
          let mut back = Vec::new();
          while cursor != start {
            back.push(cursor.to_string());
            cursor = *parents.get(cursor)?;
          }
          back.reverse();
          path.extend(back);
          path.push(start.to_string());
          return Some(path);
        }
        if self.nodes.contains_key(next) && seen.insert(next.as_str()) {
          parents.insert(next.as_str(), id);
          queue.push_back(next.as_str());
        }
      }
    }
    None
  }

  /// Nodes whose results may differ between `previous` and `next`.
  ///
  /// A node is dirty when it was added, removed or redefined, when its
  /// incoming edges changed, or when it is downstream of a dirty node in
  /// either graph.
  pub fn dirty_nodes(previous: &Graph, next: &Graph) -> HashSet<String> {
    let ids: HashSet<&String> = previous.nodes.keys().chain(next.nodes.keys()).collect();

    let mut dirty: HashSet<String> = ids
      .into_iter()
      .filter(|id| {
        previous.node(id) != next.node(id)
          || sorted_edges(previous.incoming_edges(id)) != sorted_edges(next.incoming_edges(id))
      })
      .cloned()
      .collect();

    let mut queue: VecDeque<String> = dirty.iter().cloned().collect();
    while let Some(id) = queue.pop_front() {
      for graph in [previous, next] {
        for child in graph.downstream(&id) {
          if dirty.insert(child.clone()) {
            queue.push_back(child.clone());
          }
        }
      }
    }
    dirty
  }
}

fn sorted_edges(edges: &[Edge]) -> Vec<&Edge> {
  let mut sorted: Vec<&Edge> = edges.iter().collect();
  sorted.sort_by(|a, b| {
    (&a.target_handle, &a.source, &a.source_handle).cmp(&(
      &b.target_handle,
      &b.source,
      &b.source_handle,
    ))
  });
  sorted
}
