use std::collections::HashMap;
use std::ops::Deref;

use crate::graph::Graph;
use crate::types::EdgeType;
use crate::types::NodeId;

/// A [`Graph`] whose nodes are also addressable by a stable string key.
///
/// Reads go through `Deref`; every removal is routed through this type so that nodes pruned as
/// orphans lose their keys too.
#[derive(Clone, Debug)]
pub struct ContentGraph<N, E = u32> {
  graph: Graph<N, E>,
  content_key_to_node_id: HashMap<String, NodeId>,
  node_id_to_content_key: HashMap<NodeId, String>,
}

impl<N, E: EdgeType> Default for ContentGraph<N, E> {
  fn default() -> Self {
    Self::new()
  }
}

impl<N, E: EdgeType> Deref for ContentGraph<N, E> {
  type Target = Graph<N, E>;

  fn deref(&self) -> &Self::Target {
    &self.graph
  }
}

impl<N, E: EdgeType> ContentGraph<N, E> {
  pub fn new() -> Self {
    Self {
      graph: Graph::new(),
      content_key_to_node_id: HashMap::new(),
      node_id_to_content_key: HashMap::new(),
    }
  }

  /// Adds a node under `content_key`, which must not be in use.
  pub fn add_node_by_content_key(&mut self, content_key: impl Into<String>, node: N) -> NodeId {
    let content_key = content_key.into();
    assert!(
      !self.has_content_key(&content_key),
      "Graph already has content key {content_key}"
    );

    let node_id = self.graph.add_node(node);
    self
      .content_key_to_node_id
      .insert(content_key.clone(), node_id);
    self.node_id_to_content_key.insert(node_id, content_key);
    node_id
  }

  /// Returns the existing node for `content_key`, or adds one built by `node`.
  pub fn add_node_by_content_key_if_needed(
    &mut self,
    content_key: &str,
    node: impl FnOnce() -> N,
  ) -> NodeId {
    match self.get_node_id_by_content_key(content_key) {
      Some(node_id) => node_id,
      None => self.add_node_by_content_key(content_key, node()),
    }
  }

  /// Adds a node that has no content key.
  pub fn add_node(&mut self, node: N) -> NodeId {
    self.graph.add_node(node)
  }

  pub fn has_content_key(&self, content_key: &str) -> bool {
    self.content_key_to_node_id.contains_key(content_key)
  }

  pub fn get_node_id_by_content_key(&self, content_key: &str) -> Option<NodeId> {
    self.content_key_to_node_id.get(content_key).copied()
  }

  pub fn get_content_key_by_node_id(&self, node_id: NodeId) -> Option<&str> {
    self.node_id_to_content_key.get(&node_id).map(String::as_str)
  }

  pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut N> {
    self.graph.get_node_mut(node_id)
  }

  pub fn update_node(&mut self, node_id: NodeId, node: N) {
    self.graph.update_node(node_id, node);
  }

  pub fn set_root_node_id(&mut self, node_id: NodeId) {
    self.graph.set_root_node_id(node_id);
  }

  pub fn add_edge(&mut self, from: NodeId, to: NodeId, edge_type: E) -> bool {
    self.graph.add_edge(from, to, edge_type)
  }

  pub fn remove_node(&mut self, node_id: NodeId) -> Vec<NodeId> {
    let removed = self.graph.remove_node(node_id);
    self.forget(&removed);
    removed
  }

  pub fn remove_edge(
    &mut self,
    from: NodeId,
    to: NodeId,
    edge_type: E,
    remove_orphans: bool,
  ) -> Vec<NodeId> {
    let removed = self.graph.remove_edge(from, to, edge_type, remove_orphans);
    self.forget(&removed);
    removed
  }

  pub fn replace_node_ids_connected_to(
    &mut self,
    from: NodeId,
    to_node_ids: &[NodeId],
    replace_filter: Option<&dyn Fn(NodeId) -> bool>,
    edge_type: E,
  ) -> Vec<NodeId> {
    let removed = self
      .graph
      .replace_node_ids_connected_to(from, to_node_ids, replace_filter, edge_type);
    self.forget(&removed);
    removed
  }

  fn forget(&mut self, removed: &[NodeId]) {
    for node_id in removed {
      if let Some(content_key) = self.node_id_to_content_key.remove(node_id) {
        self.content_key_to_node_id.remove(&content_key);
      }
    }
  }
}
